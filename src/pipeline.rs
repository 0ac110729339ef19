//! Pipeline orchestration: fold overlays into the base tree, normalize every
//! node, and hash the canonical result.
//!
//! One `normalize` call is pure given a canon snapshot: diagnostics are
//! accumulated, never thrown, and any error empties the artifact so callers
//! fail closed onto their last known-good configuration.

use crate::canon::CanonSet;
use crate::diagnostics::{
    Diagnostic, Diagnostics, E_MENU_NORMALIZATION_INPUT_SHAPE, E_MENU_OVERLAY_STACK_DRIFT,
    E_PLUGIN_MENU_OVERLAY_POLICY_VIOLATION,
};
use crate::dsl::EvalContext;
use crate::guard;
use crate::namespace::ResolveOptions;
use crate::node::{self, NodeContext, NormalizedMenuNode};
use crate::overlay::{self, Overlay, OverlayOrigin};
use crate::util;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const NORMALIZED_SHAPE_VERSION: u32 = 1;

/// Who is asking: promotion runs fail on plugin violations, release runs
/// record them as warnings. The engine only classifies either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Release,
    Promotion,
}

/// A generic overlay contributed outside the named layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOverlay {
    pub origin: String,
    pub source_ref: String,
    pub config: Value,
}

/// Full raw input for one normalization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NormalizeInput {
    pub base_config: Value,
    pub platform_overlay: Option<Value>,
    pub profile_overlay: Option<Value>,
    pub workspace_overlay: Option<Value>,
    pub user_overlay: Option<Value>,
    pub plugin_overlays: Vec<Value>,
    pub extra_overlays: Vec<RawOverlay>,
    pub context: EvalContext,
    pub execution_mode: ExecutionMode,
    pub enforce_sunset: bool,
    pub today: Option<NaiveDate>,
}

/// The canonical artifact, stable-key-sorted before hashing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConfig {
    pub normalized_shape_version: u32,
    pub menu_config_version: u32,
    pub visibility_matrix_version: u32,
    pub menus: Vec<NormalizedMenuNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeOutcome {
    pub ok: bool,
    pub normalized_config: Option<NormalizedConfig>,
    pub diagnostics: Diagnostics,
    pub overlay_stack_applied: Vec<String>,
    pub input_fingerprint_sha256: String,
    pub normalized_hash_sha256: String,
}

/// Run the full normalization pipeline over one input snapshot.
pub fn normalize(input: &NormalizeInput, canons: &CanonSet) -> NormalizeOutcome {
    let input_fingerprint_sha256 = util::canonical_sha256(input).unwrap_or_default();
    let mut diagnostics = Diagnostics::default();

    let Some(base_menus) = input.base_config.get("menus").and_then(Value::as_array) else {
        diagnostics.error(Diagnostic::new(
            E_MENU_NORMALIZATION_INPUT_SHAPE,
            "base config must carry a menus array",
        ));
        return NormalizeOutcome {
            ok: false,
            normalized_config: None,
            diagnostics,
            overlay_stack_applied: Vec::new(),
            input_fingerprint_sha256,
            normalized_hash_sha256: String::new(),
        };
    };

    let mut menus: Vec<Value> = base_menus.clone();
    for node in &mut menus {
        overlay::annotate_provenance(node, OverlayOrigin::Base, "base");
    }

    let overlays = collect_overlays(input, canons, &mut diagnostics);
    let ordered = overlay::order_overlays(overlays, &canons.overlay_stack, &mut diagnostics);
    let overlay_stack_applied = diagnostics.overlay_order.clone();
    tracing::debug!(
        overlays = overlay_stack_applied.len(),
        "applying overlay stack"
    );
    for item in &ordered {
        overlay::merge_overlay(&mut menus, item);
    }

    let node_ctx = NodeContext {
        ctx: &input.context,
        canons,
        resolve_opts: ResolveOptions {
            enforce_sunset: input.enforce_sunset,
            today: input.today,
        },
    };
    let normalized = node::normalize_items(&menus, "", &node_ctx, &mut diagnostics);

    let ok = diagnostics.ok();
    let (normalized_config, normalized_hash_sha256) = if ok {
        let config = NormalizedConfig {
            normalized_shape_version: NORMALIZED_SHAPE_VERSION,
            menu_config_version: input
                .base_config
                .get("menuConfigVersion")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            visibility_matrix_version: canons.visibility.visibility_matrix_version,
            menus: normalized,
        };
        let hash = util::canonical_sha256(&config).unwrap_or_default();
        (Some(config), hash)
    } else {
        (None, String::new())
    };
    tracing::info!(
        ok,
        errors = diagnostics.errors.len(),
        warnings = diagnostics.warnings.len(),
        "normalization finished"
    );

    NormalizeOutcome {
        ok,
        normalized_config,
        diagnostics,
        overlay_stack_applied,
        input_fingerprint_sha256,
        normalized_hash_sha256,
    }
}

fn collect_overlays(
    input: &NormalizeInput,
    canons: &CanonSet,
    diagnostics: &mut Diagnostics,
) -> Vec<Overlay> {
    let mut overlays = Vec::new();
    let named = [
        (OverlayOrigin::Platform, &input.platform_overlay),
        (OverlayOrigin::Profile, &input.profile_overlay),
        (OverlayOrigin::Workspace, &input.workspace_overlay),
        (OverlayOrigin::User, &input.user_overlay),
    ];
    for (origin, config) in named {
        if let Some(config) = config {
            let source_ref = config
                .get("sourceRef")
                .and_then(Value::as_str)
                .unwrap_or(origin.as_str())
                .to_string();
            overlays.push(Overlay {
                origin,
                source_ref,
                config: config.clone(),
            });
        }
    }

    for raw in &input.plugin_overlays {
        let screened = guard::screen_plugin_overlay(
            raw,
            &canons.plugin_policy,
            &canons.visibility,
            &canons.dsl,
        );
        if let Some(overlay) = screened.overlay {
            overlays.push(overlay);
            continue;
        }
        tracing::debug!(source_ref = %screened.source_ref, "plugin overlay rejected");
        let mut rejected = vec![Diagnostic::new(
            E_PLUGIN_MENU_OVERLAY_POLICY_VIOLATION,
            format!("plugin overlay {} excluded from the stack", screened.source_ref),
        )
        .with_source_ref(screened.source_ref.clone())];
        rejected.extend(screened.violations);
        for violation in rejected {
            match input.execution_mode {
                ExecutionMode::Promotion => diagnostics.error(violation),
                ExecutionMode::Release => diagnostics.warning(violation),
            }
        }
    }

    for raw in &input.extra_overlays {
        let origin = match OverlayOrigin::parse(&raw.origin) {
            Some(origin) => origin,
            None => {
                diagnostics.warning(
                    Diagnostic::new(
                        E_MENU_OVERLAY_STACK_DRIFT,
                        format!("unknown overlay origin {}; treating as plugin", raw.origin),
                    )
                    .with_source_ref(raw.source_ref.clone()),
                );
                OverlayOrigin::Plugin
            }
        };
        overlays.push(Overlay {
            origin,
            source_ref: raw.source_ref.clone(),
            config: raw.config.clone(),
        });
    }
    overlays
}
