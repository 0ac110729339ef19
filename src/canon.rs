//! Canon documents: immutable, versioned policy inputs for normalization.
//!
//! Canons are loaded once per pack (builtin defaults fill any gap) and never
//! mutate afterward; every engine function is pure given a canon snapshot.
//! The builtin set lives behind a `OnceLock` so concurrent first loads race
//! harmlessly on structurally identical data.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const CANON_SCHEMA_VERSION: u32 = 1;

pub const COMMAND_NAMESPACE_CANON_FILE: &str = "command_namespace.json";
pub const DSL_CANON_FILE: &str = "enabledwhen_dsl.json";
pub const OVERLAY_STACK_CANON_FILE: &str = "menu_overlay_stack.json";
pub const VISIBILITY_MATRIX_FILE: &str = "command_visibility_matrix.json";
pub const PLUGIN_OVERLAY_POLICY_FILE: &str = "plugin_menu_overlay_policy.json";

/// Alias lifecycle policy for deprecated command prefixes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AliasPolicy {
    /// ISO date after which deprecated aliases stop resolving under
    /// sunset enforcement.
    pub allow_deprecated_in_configs_until: String,
    pub resolution_rule: String,
}

impl Default for AliasPolicy {
    fn default() -> Self {
        AliasPolicy {
            allow_deprecated_in_configs_until: "2027-06-30".to_string(),
            resolution_rule: "alias_map_then_fail".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandNamespaceCanon {
    pub schema_version: u32,
    pub canonical_prefix: String,
    pub deprecated_prefixes: Vec<String>,
    pub alias_map: BTreeMap<String, String>,
    pub action_map: BTreeMap<String, String>,
    pub alias_policy: AliasPolicy,
}

impl Default for CommandNamespaceCanon {
    fn default() -> Self {
        let mut alias_map = BTreeMap::new();
        alias_map.insert("legacy.save".to_string(), "cmd.project.save".to_string());
        alias_map.insert("legacy.open".to_string(), "cmd.project.open".to_string());
        alias_map.insert(
            "app.preferences".to_string(),
            "cmd.app.preferences".to_string(),
        );
        let mut action_map = BTreeMap::new();
        action_map.insert("save".to_string(), "cmd.project.save".to_string());
        action_map.insert("open".to_string(), "cmd.project.open".to_string());
        action_map.insert("quit".to_string(), "cmd.app.quit".to_string());
        action_map.insert(
            "exportDocx".to_string(),
            "cmd.project.export.docxMin".to_string(),
        );
        CommandNamespaceCanon {
            schema_version: CANON_SCHEMA_VERSION,
            canonical_prefix: "cmd.".to_string(),
            deprecated_prefixes: vec!["legacy.".to_string(), "app.".to_string()],
            alias_map,
            action_map,
            alias_policy: AliasPolicy::default(),
        }
    }
}

/// Validation limits and known names for the enabledWhen gating DSL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DslCanon {
    pub schema_version: u32,
    pub max_depth: usize,
    pub max_nodes: usize,
    pub known_operands: Vec<String>,
    /// Ordered development stages used by `stageGte` ordinal comparison.
    pub stage_order: Vec<String>,
}

impl Default for DslCanon {
    fn default() -> Self {
        DslCanon {
            schema_version: CANON_SCHEMA_VERSION,
            max_depth: 4,
            max_nodes: 32,
            known_operands: vec![
                "documentOpen".to_string(),
                "documentDirty".to_string(),
                "selectionPresent".to_string(),
                "clipboardHasContent".to_string(),
                "networkAvailable".to_string(),
                "pluginsEnabled".to_string(),
                "telemetryOptIn".to_string(),
            ],
            stage_order: vec![
                "X0".to_string(),
                "X1".to_string(),
                "X2".to_string(),
                "X3".to_string(),
                "X4".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    Allow,
    Forbid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeRules {
    pub insert: MergeRule,
    pub hide: MergeRule,
    pub reorder: MergeRule,
    pub replace: MergeRule,
}

impl Default for MergeRules {
    fn default() -> Self {
        MergeRules {
            insert: MergeRule::Allow,
            hide: MergeRule::Allow,
            reorder: MergeRule::Allow,
            replace: MergeRule::Forbid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayStackCanon {
    pub schema_version: u32,
    pub stack_order: Vec<String>,
    pub merge_rules: MergeRules,
    pub conflict_policy: String,
}

impl Default for OverlayStackCanon {
    fn default() -> Self {
        OverlayStackCanon {
            schema_version: CANON_SCHEMA_VERSION,
            stack_order: vec![
                "base".to_string(),
                "platform".to_string(),
                "profile".to_string(),
                "workspace".to_string(),
                "user".to_string(),
                "plugin".to_string(),
            ],
            merge_rules: MergeRules::default(),
            conflict_policy: "last_writer_wins".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisibilityMatrix {
    pub schema_version: u32,
    pub visibility_matrix_version: u32,
    /// Commands that must stay visible in every profile, even under plugin
    /// or minimal-profile hiding rules.
    pub core_safety_command_allowlist: Vec<String>,
    pub minimal_profile_hidden_allowlist: Vec<String>,
    pub minimal_profile_hiding_enabled: bool,
}

impl Default for VisibilityMatrix {
    fn default() -> Self {
        VisibilityMatrix {
            schema_version: CANON_SCHEMA_VERSION,
            visibility_matrix_version: 1,
            core_safety_command_allowlist: vec![
                "cmd.app.quit".to_string(),
                "cmd.app.preferences".to_string(),
                "cmd.project.save".to_string(),
                "cmd.project.open".to_string(),
            ],
            minimal_profile_hidden_allowlist: vec![
                "cmd.project.export.docxMin".to_string(),
                "cmd.view.devtools".to_string(),
            ],
            minimal_profile_hiding_enabled: true,
        }
    }
}

impl VisibilityMatrix {
    pub fn is_core_safety(&self, command_id: &str) -> bool {
        self.core_safety_command_allowlist
            .iter()
            .any(|id| id == command_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignaturePolicy {
    pub allow_unsigned: bool,
    pub accepted_statuses: Vec<String>,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        SignaturePolicy {
            allow_unsigned: false,
            accepted_statuses: vec!["signed".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginOverlayPolicy {
    pub schema_version: u32,
    /// Top-level fields a plugin overlay may carry beyond the identity set.
    pub allowed_fields: Vec<String>,
    pub signature_policy: SignaturePolicy,
}

impl Default for PluginOverlayPolicy {
    fn default() -> Self {
        PluginOverlayPolicy {
            schema_version: CANON_SCHEMA_VERSION,
            allowed_fields: vec!["menus".to_string(), "inserts".to_string()],
            signature_policy: SignaturePolicy::default(),
        }
    }
}

/// The full canon snapshot one normalization run reads from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanonSet {
    pub namespace: CommandNamespaceCanon,
    pub dsl: DslCanon,
    pub overlay_stack: OverlayStackCanon,
    pub visibility: VisibilityMatrix,
    pub plugin_policy: PluginOverlayPolicy,
}

/// Builtin canon defaults, shared process-wide.
pub fn builtin() -> &'static CanonSet {
    static BUILTIN: OnceLock<CanonSet> = OnceLock::new();
    BUILTIN.get_or_init(CanonSet::default)
}

/// Canon set loaded from a pack's `canon/` directory plus the names of
/// documents that fell back to builtin defaults.
#[derive(Debug)]
pub struct LoadedCanons {
    pub canons: CanonSet,
    pub defaulted: Vec<String>,
}

/// Load the canon documents under `canon_dir`, defaulting each missing file.
pub fn load_canons(canon_dir: &Path) -> Result<LoadedCanons> {
    if !canon_dir.is_dir() {
        return Ok(LoadedCanons {
            canons: builtin().clone(),
            defaulted: vec![
                COMMAND_NAMESPACE_CANON_FILE.to_string(),
                DSL_CANON_FILE.to_string(),
                OVERLAY_STACK_CANON_FILE.to_string(),
                VISIBILITY_MATRIX_FILE.to_string(),
                PLUGIN_OVERLAY_POLICY_FILE.to_string(),
            ],
        });
    }
    let mut defaulted = Vec::new();
    let canons = CanonSet {
        namespace: load_doc(canon_dir, COMMAND_NAMESPACE_CANON_FILE, &mut defaulted)?,
        dsl: load_doc(canon_dir, DSL_CANON_FILE, &mut defaulted)?,
        overlay_stack: load_doc(canon_dir, OVERLAY_STACK_CANON_FILE, &mut defaulted)?,
        visibility: load_doc(canon_dir, VISIBILITY_MATRIX_FILE, &mut defaulted)?,
        plugin_policy: load_doc(canon_dir, PLUGIN_OVERLAY_POLICY_FILE, &mut defaulted)?,
    };
    Ok(LoadedCanons { canons, defaulted })
}

fn load_doc<T: DeserializeOwned + Default>(
    canon_dir: &Path,
    file_name: &str,
    defaulted: &mut Vec<String>,
) -> Result<T> {
    let path = canon_dir.join(file_name);
    if !path.is_file() {
        defaulted.push(file_name.to_string());
        return Ok(T::default());
    }
    let bytes = fs::read(&path).with_context(|| format!("read canon {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse canon {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_defaults_are_internally_consistent() {
        let canons = builtin();
        for canonical in canons.namespace.alias_map.values() {
            assert!(canonical.starts_with(&canons.namespace.canonical_prefix));
        }
        for canonical in canons.namespace.action_map.values() {
            assert!(canonical.starts_with(&canons.namespace.canonical_prefix));
        }
        assert!(canons
            .overlay_stack
            .stack_order
            .iter()
            .any(|origin| origin == "plugin"));
        assert_eq!(canons.overlay_stack.merge_rules.replace, MergeRule::Forbid);
    }

    #[test]
    fn missing_canon_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = load_canons(dir.path()).expect("load canons");
        assert_eq!(loaded.defaulted.len(), 5);
        assert_eq!(loaded.canons.dsl.max_depth, 4);
        assert_eq!(loaded.canons.dsl.max_nodes, 32);
    }

    #[test]
    fn pack_canon_overrides_builtin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let doc = serde_json::json!({
            "schemaVersion": 1,
            "maxDepth": 6,
            "maxNodes": 64,
            "knownOperands": ["documentOpen"],
            "stageOrder": ["X0", "X1"],
        });
        std::fs::write(
            dir.path().join(DSL_CANON_FILE),
            serde_json::to_vec(&doc).expect("serialize"),
        )
        .expect("write");
        let loaded = load_canons(dir.path()).expect("load canons");
        assert_eq!(loaded.canons.dsl.max_depth, 6);
        assert_eq!(loaded.defaulted.len(), 4);
        assert!(!loaded.defaulted.contains(&DSL_CANON_FILE.to_string()));
    }
}
