//! Plugin overlay screening.
//!
//! Plugin overlays are untrusted input. Screening never throws: it returns a
//! normalized overlay plus the violations found, and any violation excludes
//! the overlay from the merge. Whether a recorded violation warns or fails
//! the run is the caller's execution-mode decision, not the guard's.

use crate::canon::{DslCanon, PluginOverlayPolicy, VisibilityMatrix};
use crate::diagnostics::{
    Diagnostic, PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN, PLUGIN_OVERLAY_ENABLEDWHEN_INVALID,
    PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN, PLUGIN_OVERLAY_FIELD_NOT_ALLOWED,
    PLUGIN_OVERLAY_MALFORMED, PLUGIN_OVERLAY_REQUIRED_FIELD_MISSING,
    PLUGIN_OVERLAY_SIGNATURE_REJECTED, PLUGIN_OVERLAY_UNSERIALIZABLE_VALUE,
    PLUGIN_OVERLAY_UNSIGNED_FORBIDDEN, PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID,
};
use crate::dsl;
use crate::overlay::{Overlay, OverlayOrigin};
use serde_json::{json, Map, Value};

/// Key substrings that mark a field as code-injection-shaped. Matched against
/// lower-cased keys at any nesting depth, unconditionally.
const EXECUTABLE_HINTS: &[&str] = &[
    "handler",
    "ipc",
    "jscode",
    "eval",
    "script",
    "callback",
    "function",
    "commandexec",
];

/// Identity fields every plugin overlay carries regardless of policy.
const IDENTITY_FIELDS: &[&str] = &[
    "pluginId",
    "pluginVersion",
    "overlayId",
    "signatureStatus",
    "sourceRef",
];

const REQUIRED_FIELDS: &[&str] = &["pluginId", "pluginVersion", "overlayId", "signatureStatus"];

const VISIBILITY_POLICY_VALUES: &[&str] = &["visible_enabled", "visible_disabled", "hidden"];

/// Screening result: the overlay is only populated when no violation fired.
#[derive(Debug)]
pub struct ScreenedOverlay {
    pub source_ref: String,
    pub overlay: Option<Overlay>,
    pub violations: Vec<Diagnostic>,
}

/// Screen one raw plugin overlay against the sandbox policy.
pub fn screen_plugin_overlay(
    raw: &Value,
    policy: &PluginOverlayPolicy,
    visibility: &VisibilityMatrix,
    dsl_canon: &DslCanon,
) -> ScreenedOverlay {
    let mut violations = Vec::new();
    let Some(object) = raw.as_object() else {
        return ScreenedOverlay {
            source_ref: "plugin:unidentified".to_string(),
            overlay: None,
            violations: vec![Diagnostic::new(
                PLUGIN_OVERLAY_MALFORMED,
                "plugin overlay must be a JSON object",
            )],
        };
    };

    let source_ref = derive_source_ref(object);
    check_required_fields(object, &source_ref, &mut violations);
    check_signature(object, policy, &source_ref, &mut violations);
    check_allowed_fields(object, policy, &source_ref, &mut violations);
    scan_value(raw, "", visibility, dsl_canon, &source_ref, &mut violations);

    let overlay = if violations.is_empty() {
        Some(Overlay {
            origin: OverlayOrigin::Plugin,
            source_ref: source_ref.clone(),
            config: json!({ "menus": collect_menu_nodes(object) }),
        })
    } else {
        None
    };
    ScreenedOverlay {
        source_ref,
        overlay,
        violations,
    }
}

fn derive_source_ref(object: &Map<String, Value>) -> String {
    if let Some(source_ref) = object.get("sourceRef").and_then(Value::as_str) {
        if !source_ref.trim().is_empty() {
            return source_ref.trim().to_string();
        }
    }
    let plugin_id = object
        .get("pluginId")
        .and_then(Value::as_str)
        .unwrap_or("unidentified");
    let overlay_id = object
        .get("overlayId")
        .and_then(Value::as_str)
        .unwrap_or("overlay");
    format!("plugin:{plugin_id}/{overlay_id}")
}

fn check_required_fields(
    object: &Map<String, Value>,
    source_ref: &str,
    violations: &mut Vec<Diagnostic>,
) {
    for field in REQUIRED_FIELDS {
        let present = object
            .get(*field)
            .and_then(Value::as_str)
            .is_some_and(|value| !value.trim().is_empty());
        if !present {
            violations.push(
                Diagnostic::new(
                    PLUGIN_OVERLAY_REQUIRED_FIELD_MISSING,
                    format!("plugin overlay requires a non-empty {field}"),
                )
                .with_path(*field)
                .with_source_ref(source_ref),
            );
        }
    }
}

fn check_signature(
    object: &Map<String, Value>,
    policy: &PluginOverlayPolicy,
    source_ref: &str,
    violations: &mut Vec<Diagnostic>,
) {
    let Some(status) = object.get("signatureStatus").and_then(Value::as_str) else {
        return;
    };
    if status == "unsigned" {
        if !policy.signature_policy.allow_unsigned {
            violations.push(
                Diagnostic::new(
                    PLUGIN_OVERLAY_UNSIGNED_FORBIDDEN,
                    "unsigned plugin overlays are forbidden by policy",
                )
                .with_source_ref(source_ref),
            );
        }
        return;
    }
    let accepted = policy
        .signature_policy
        .accepted_statuses
        .iter()
        .any(|candidate| candidate == status);
    if !accepted {
        violations.push(
            Diagnostic::new(
                PLUGIN_OVERLAY_SIGNATURE_REJECTED,
                format!("signature status {status} is not accepted by policy"),
            )
            .with_source_ref(source_ref),
        );
    }
}

fn check_allowed_fields(
    object: &Map<String, Value>,
    policy: &PluginOverlayPolicy,
    source_ref: &str,
    violations: &mut Vec<Diagnostic>,
) {
    for key in object.keys() {
        let known = IDENTITY_FIELDS.contains(&key.as_str())
            || policy.allowed_fields.iter().any(|field| field == key);
        if !known {
            violations.push(
                Diagnostic::new(
                    PLUGIN_OVERLAY_FIELD_NOT_ALLOWED,
                    format!("top-level field {key} is not in the overlay policy allowlist"),
                )
                .with_path(key.clone())
                .with_source_ref(source_ref),
            );
        }
    }
}

fn scan_value(
    value: &Value,
    path: &str,
    visibility: &VisibilityMatrix,
    dsl_canon: &DslCanon,
    source_ref: &str,
    violations: &mut Vec<Diagnostic>,
) {
    match value {
        Value::Object(object) => {
            check_visibility_policy(object, path, visibility, source_ref, violations);
            for (key, child) in object {
                let child_path = join_path(path, key);
                if key_has_executable_hint(key) {
                    violations.push(
                        Diagnostic::new(
                            PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN,
                            format!("field {child_path} looks executable and is forbidden"),
                        )
                        .with_path(child_path.clone())
                        .with_source_ref(source_ref),
                    );
                }
                if (key == "enabledWhen" || key == "enabledWhenAst") && !child.is_null() {
                    if let Err(violation) = dsl::parse_expression(child, dsl_canon) {
                        violations.push(
                            Diagnostic::new(
                                PLUGIN_OVERLAY_ENABLEDWHEN_INVALID,
                                format!("{} ({})", violation.detail, violation.code),
                            )
                            .with_path(child_path.clone())
                            .with_source_ref(source_ref),
                        );
                    }
                }
                scan_value(child, &child_path, visibility, dsl_canon, source_ref, violations);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let child_path = format!("{path}[{index}]");
                scan_value(item, &child_path, visibility, dsl_canon, source_ref, violations);
            }
        }
        Value::Number(number) => {
            if !number.as_f64().is_some_and(f64::is_finite) {
                violations.push(
                    Diagnostic::new(
                        PLUGIN_OVERLAY_UNSERIALIZABLE_VALUE,
                        format!("field {path} holds a non-serializable number"),
                    )
                    .with_path(path)
                    .with_source_ref(source_ref),
                );
            }
        }
        Value::Null | Value::Bool(_) | Value::String(_) => {}
    }
}

/// Visibility checks that need sibling context (the node's own command id).
fn check_visibility_policy(
    object: &Map<String, Value>,
    path: &str,
    visibility: &VisibilityMatrix,
    source_ref: &str,
    violations: &mut Vec<Diagnostic>,
) {
    let Some(policy_value) = object.get("visibilityPolicy") else {
        return;
    };
    let policy_path = join_path(path, "visibilityPolicy");
    let Some(policy_name) = policy_value.as_str() else {
        violations.push(
            Diagnostic::new(
                PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID,
                "visibilityPolicy must be a string",
            )
            .with_path(policy_path)
            .with_source_ref(source_ref),
        );
        return;
    };
    if !VISIBILITY_POLICY_VALUES.contains(&policy_name) {
        violations.push(
            Diagnostic::new(
                PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID,
                format!("visibilityPolicy {policy_name} is not in the closed set"),
            )
            .with_path(policy_path)
            .with_source_ref(source_ref),
        );
        return;
    }
    if policy_name != "hidden" {
        return;
    }
    let command = object
        .get("command")
        .or_else(|| object.get("canonicalCmdId"))
        .and_then(Value::as_str);
    if let Some(command) = command {
        if visibility.is_core_safety(command) {
            violations.push(
                Diagnostic::new(
                    PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN,
                    format!("plugin overlays may not hide core-safety command {command}"),
                )
                .with_path(policy_path)
                .with_source_ref(source_ref),
            );
        }
    }
}

fn key_has_executable_hint(key: &str) -> bool {
    let lowered = key.to_lowercase();
    EXECUTABLE_HINTS.iter().any(|hint| lowered.contains(hint))
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn collect_menu_nodes(object: &Map<String, Value>) -> Vec<Value> {
    let mut menus = Vec::new();
    for field in ["menus", "inserts"] {
        if let Some(nodes) = object.get(field).and_then(Value::as_array) {
            menus.extend(nodes.iter().cloned());
        }
    }
    menus
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> PluginOverlayPolicy {
        PluginOverlayPolicy::default()
    }

    fn matrix() -> VisibilityMatrix {
        VisibilityMatrix::default()
    }

    fn dsl_canon() -> DslCanon {
        DslCanon::default()
    }

    fn screen(raw: serde_json::Value) -> ScreenedOverlay {
        screen_plugin_overlay(&raw, &policy(), &matrix(), &dsl_canon())
    }

    fn signed_overlay(extra: serde_json::Value) -> serde_json::Value {
        let mut overlay = json!({
            "pluginId": "exporter",
            "pluginVersion": "1.2.0",
            "overlayId": "export-menu",
            "signatureStatus": "signed",
        });
        if let (Some(target), Some(source)) = (overlay.as_object_mut(), extra.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        overlay
    }

    fn codes(screened: &ScreenedOverlay) -> Vec<&str> {
        screened
            .violations
            .iter()
            .map(|violation| violation.code.as_str())
            .collect()
    }

    #[test]
    fn clean_overlay_passes_and_combines_menus_with_inserts() {
        let screened = screen(signed_overlay(json!({
            "menus": [{"id": "file", "items": [{"id": "exportDocx", "command": "cmd.project.export.docxMin"}]}],
            "inserts": [{"id": "help", "label": "Exporter Help"}],
        })));
        assert!(screened.violations.is_empty());
        let overlay = screened.overlay.expect("overlay accepted");
        assert_eq!(overlay.source_ref, "plugin:exporter/export-menu");
        let menus = overlay.config["menus"].as_array().expect("menus");
        assert_eq!(menus.len(), 2);
    }

    #[test]
    fn executable_hint_is_rejected_at_any_depth() {
        let screened = screen(signed_overlay(json!({
            "inserts": [{"id": "x", "handlerCallback": "require('fs')"}],
        })));
        assert!(screened.overlay.is_none());
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN"));

        let nested = screen(signed_overlay(json!({
            "menus": [{"id": "file", "items": [{"id": "y", "meta": {"onIpcMessage": 1}}]}],
        })));
        assert!(codes(&nested).contains(&"PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN"));
    }

    #[test]
    fn unsigned_overlays_are_forbidden_by_default() {
        let mut raw = signed_overlay(json!({"menus": []}));
        raw["signatureStatus"] = json!("unsigned");
        let screened = screen(raw);
        assert!(screened.overlay.is_none());
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_UNSIGNED_FORBIDDEN"));
    }

    #[test]
    fn missing_identity_fields_are_reported_together() {
        let screened = screen(json!({"menus": []}));
        let found = codes(&screened);
        assert_eq!(
            found
                .iter()
                .filter(|code| **code == "PLUGIN_OVERLAY_REQUIRED_FIELD_MISSING")
                .count(),
            4
        );
    }

    #[test]
    fn unknown_top_level_fields_are_rejected() {
        let screened = screen(signed_overlay(json!({"autoRun": true})));
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_FIELD_NOT_ALLOWED"));
    }

    #[test]
    fn embedded_expressions_are_validated() {
        let screened = screen(signed_overlay(json!({
            "inserts": [{"id": "x", "enabledWhen": {"op": "launch", "args": []}}],
        })));
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_ENABLEDWHEN_INVALID"));
    }

    #[test]
    fn hiding_core_safety_commands_is_forbidden() {
        let screened = screen(signed_overlay(json!({
            "inserts": [{
                "id": "save",
                "command": "cmd.project.save",
                "visibilityPolicy": "hidden",
            }],
        })));
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN"));

        let allowed = screen(signed_overlay(json!({
            "inserts": [{
                "id": "devtools",
                "command": "cmd.view.devtools",
                "visibilityPolicy": "hidden",
            }],
        })));
        assert!(!codes(&allowed).contains(&"PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN"));
    }

    #[test]
    fn unknown_visibility_policy_values_are_rejected() {
        let screened = screen(signed_overlay(json!({
            "inserts": [{"id": "x", "visibilityPolicy": "invisible"}],
        })));
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID"));
    }

    #[test]
    fn non_object_overlay_is_malformed() {
        let screened = screen(json!(["not", "an", "object"]));
        assert!(screened.overlay.is_none());
        assert!(codes(&screened).contains(&"PLUGIN_OVERLAY_MALFORMED"));
    }
}
