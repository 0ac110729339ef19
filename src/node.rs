//! Per-node canonicalization: ids, commands, expressions, and gates.
//!
//! Runs after the merge, so every node already carries provenance. Each node
//! resolves its command id through the namespace canon, parses its gating
//! expression, normalizes the mode/profile/stage gate arrays, and receives a
//! visibility decision. Siblings are sorted by id for determinism.

use crate::canon::CanonSet;
use crate::diagnostics::{
    Diagnostic, Diagnostics, E_MENU_NORMALIZATION_CORE_HIDDEN,
    E_MENU_NORMALIZATION_ENABLEDWHEN_STRING_FORM, E_MENU_NORMALIZATION_UNKNOWN_STAGE,
    W_COMMAND_NAMESPACE_DEPRECATED_ALIAS, W_COMMAND_NAMESPACE_UNMANAGED_ID,
    W_MENU_NORMALIZATION_CORE_HIDDEN,
};
use crate::dsl::{self, EvalContext, Expression};
use crate::namespace::{self, ResolveOptions};
use crate::overlay::{PROVENANCE_ORIGIN_KEY, PROVENANCE_SOURCE_REFS_KEY};
use crate::visibility::{self, VisibilityInputs, VisibilityPolicy, MINIMAL_PROFILE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub const DEFAULT_MODES: &[&str] = &["offline"];
pub const DEFAULT_PROFILES: &[&str] = &["minimal", "pro", "guru"];

/// Canonical node shape in the normalized artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMenuNode {
    pub id: String,
    pub canonical_cmd_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub enabled_when_ast: Option<Expression>,
    pub visibility_policy: VisibilityPolicy,
    pub disabled_reason_code: Option<String>,
    pub origin: String,
    pub source_refs: Vec<String>,
    pub mode: Vec<String>,
    pub profile: Vec<String>,
    pub stage: Vec<String>,
    pub items: Vec<NormalizedMenuNode>,
}

/// Shared inputs for one normalization pass over a tree.
pub struct NodeContext<'a> {
    pub ctx: &'a EvalContext,
    pub canons: &'a CanonSet,
    pub resolve_opts: ResolveOptions,
}

/// Normalize a sibling list, recursing into `items`, sorted by id.
pub fn normalize_items(
    items: &[Value],
    parent_path: &str,
    node_ctx: &NodeContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Vec<NormalizedMenuNode> {
    let mut separators = 0usize;
    let mut normalized: Vec<NormalizedMenuNode> = items
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let fallback = fallback_id(raw, index, &mut separators);
            normalize_node(raw, parent_path, fallback, node_ctx, diagnostics)
        })
        .collect();
    normalized.sort_by(|a, b| a.id.cmp(&b.id));
    normalized
}

fn fallback_id(raw: &Value, index: usize, separators: &mut usize) -> String {
    if let Some(id) = raw.get("id").and_then(Value::as_str) {
        if !id.is_empty() {
            return id.to_string();
        }
    }
    if raw.get("type").and_then(Value::as_str) == Some("separator") {
        let ordinal = *separators;
        *separators += 1;
        return format!("sep#{ordinal}");
    }
    if let Some(label) = raw.get("label").and_then(Value::as_str) {
        if !label.is_empty() {
            return label.to_lowercase();
        }
    }
    format!("node#{index}")
}

fn normalize_node(
    raw: &Value,
    parent_path: &str,
    id: String,
    node_ctx: &NodeContext<'_>,
    diagnostics: &mut Diagnostics,
) -> NormalizedMenuNode {
    let path = if parent_path.is_empty() {
        id.clone()
    } else {
        format!("{parent_path}/{id}")
    };

    let canonical_cmd_id = resolve_command(raw, &path, node_ctx, diagnostics);
    let (enabled_when_ast, enabled_when_invalid) =
        resolve_expression(raw, &path, canonical_cmd_id.as_deref(), node_ctx, diagnostics);

    let mode = normalize_gate_values(raw.get("mode"), DEFAULT_MODES);
    let profile = normalize_gate_values(raw.get("profile"), DEFAULT_PROFILES);
    let stage = normalize_stage_values(raw.get("stage"), &path, node_ctx, diagnostics);

    let inputs = VisibilityInputs {
        explicit_visible: raw.get("visible").and_then(Value::as_bool),
        canonical_cmd_id: canonical_cmd_id.as_deref(),
        enabled_when: enabled_when_ast.as_ref(),
        enabled_when_invalid,
        mode: &mode,
        profile: &profile,
        stage: &stage,
    };
    let decision = visibility::decide(
        &inputs,
        node_ctx.ctx,
        &node_ctx.canons.visibility,
        &node_ctx.canons.dsl,
    );
    if decision.core_hide_rejected {
        let message = format!(
            "node {path} attempted to hide core-safety command; kept visible_disabled"
        );
        if node_ctx.ctx.profile == MINIMAL_PROFILE {
            diagnostics.error(
                Diagnostic::new(E_MENU_NORMALIZATION_CORE_HIDDEN, message).with_path(path.clone()),
            );
        } else {
            diagnostics.warning(
                Diagnostic::new(W_MENU_NORMALIZATION_CORE_HIDDEN, message).with_path(path.clone()),
            );
        }
    }

    let items = raw
        .get("items")
        .and_then(Value::as_array)
        .map(|children| normalize_items(children, &path, node_ctx, diagnostics))
        .unwrap_or_default();

    NormalizedMenuNode {
        id,
        canonical_cmd_id,
        label: string_field(raw, "label"),
        role: string_field(raw, "role"),
        accelerator: string_field(raw, "accelerator"),
        node_type: string_field(raw, "type"),
        enabled_when_ast,
        visibility_policy: decision.policy,
        disabled_reason_code: decision.reason_code.map(str::to_string),
        origin: string_field(raw, PROVENANCE_ORIGIN_KEY).unwrap_or_else(|| "base".to_string()),
        source_refs: source_refs(raw),
        mode,
        profile,
        stage,
        items,
    }
}

fn resolve_command(
    raw: &Value,
    path: &str,
    node_ctx: &NodeContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Option<String> {
    let namespace_canon = &node_ctx.canons.namespace;
    let input_id = if let Some(command) = string_field(raw, "command") {
        command
    } else if let Some(action_id) = string_field(raw, "actionId") {
        match namespace::resolve_action(&action_id, namespace_canon) {
            Ok(command) => command,
            Err(error) => {
                diagnostics.error(Diagnostic::new(error.code, error.message).with_path(path));
                return None;
            }
        }
    } else if let Some(existing) = string_field(raw, "canonicalCmdId") {
        existing
    } else {
        return None;
    };
    match namespace::resolve(&input_id, namespace_canon, node_ctx.resolve_opts) {
        Ok(resolution) => {
            if resolution.deprecated {
                diagnostics.warning(
                    Diagnostic::new(
                        W_COMMAND_NAMESPACE_DEPRECATED_ALIAS,
                        format!(
                            "deprecated id {input_id} resolved to {}",
                            resolution.canonical_id
                        ),
                    )
                    .with_path(path),
                );
            }
            if resolution.unmanaged && !namespace::looks_like_command_id(&resolution.canonical_id) {
                diagnostics.warning(
                    Diagnostic::new(
                        W_COMMAND_NAMESPACE_UNMANAGED_ID,
                        format!("unmanaged id {input_id} does not look like a command id"),
                    )
                    .with_path(path),
                );
            }
            Some(resolution.canonical_id)
        }
        Err(error) => {
            diagnostics.error(Diagnostic::new(error.code, error.message).with_path(path));
            None
        }
    }
}

fn resolve_expression(
    raw: &Value,
    path: &str,
    canonical_cmd_id: Option<&str>,
    node_ctx: &NodeContext<'_>,
    diagnostics: &mut Diagnostics,
) -> (Option<Expression>, bool) {
    let raw_expression = raw.get("enabledWhen").or_else(|| raw.get("enabledWhenAst"));
    match raw_expression {
        None | Some(Value::Null) => {
            if canonical_cmd_id.is_some() {
                (Some(dsl::always_true()), false)
            } else {
                (None, false)
            }
        }
        Some(Value::String(_)) => {
            diagnostics.error(
                Diagnostic::new(
                    E_MENU_NORMALIZATION_ENABLEDWHEN_STRING_FORM,
                    "enabledWhen must be an expression object, not a string",
                )
                .with_path(path),
            );
            (None, true)
        }
        Some(value) => match dsl::parse_expression(value, &node_ctx.canons.dsl) {
            Ok(expression) => (Some(expression), false),
            Err(violation) => {
                diagnostics.error(Diagnostic::new(violation.code, violation.detail).with_path(path));
                (None, true)
            }
        },
    }
}

fn normalize_gate_values(raw: Option<&Value>, defaults: &[&str]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut values = Vec::new();
    if let Some(items) = raw.and_then(Value::as_array) {
        for token in items.iter().filter_map(Value::as_str) {
            let token = token.trim().to_lowercase();
            if !token.is_empty() && seen.insert(token.clone()) {
                values.push(token);
            }
        }
    }
    if values.is_empty() {
        return defaults.iter().map(|value| value.to_string()).collect();
    }
    values.sort();
    values
}

fn normalize_stage_values(
    raw: Option<&Value>,
    path: &str,
    node_ctx: &NodeContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Vec<String> {
    let stage_order = &node_ctx.canons.dsl.stage_order;
    let mut seen = BTreeSet::new();
    let mut values = Vec::new();
    if let Some(items) = raw.and_then(Value::as_array) {
        for token in items.iter().filter_map(Value::as_str) {
            let token = token.trim();
            if token.is_empty() || !seen.insert(token.to_string()) {
                continue;
            }
            if stage_order.iter().any(|stage| stage == token) {
                values.push(token.to_string());
            } else {
                diagnostics.error(
                    Diagnostic::new(
                        E_MENU_NORMALIZATION_UNKNOWN_STAGE,
                        format!("unknown stage token {token}"),
                    )
                    .with_path(path),
                );
            }
        }
    }
    if values.is_empty() {
        return stage_order.clone();
    }
    values.sort_by_key(|token| stage_order.iter().position(|stage| stage == token));
    values
}

fn string_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(|value| value.to_string())
}

fn source_refs(raw: &Value) -> Vec<String> {
    let mut refs: BTreeSet<String> = raw
        .get(PROVENANCE_SOURCE_REFS_KEY)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if refs.is_empty() {
        refs.insert("base".to_string());
    }
    refs.into_iter().collect()
}
