//! Diagnostic records accumulated across a normalization run.
//!
//! Everything past the top-level shape check is collected, never thrown, so a
//! single run surfaces every problem at once. Non-empty `errors` means the
//! caller must fail closed and keep its last known-good artifact.

use serde::{Deserialize, Serialize};

// Pipeline and node-shape errors.
pub const E_MENU_NORMALIZATION_INPUT_SHAPE: &str = "E_MENU_NORMALIZATION_INPUT_SHAPE";
pub const E_MENU_NORMALIZATION_ENABLEDWHEN_STRING_FORM: &str =
    "E_MENU_NORMALIZATION_ENABLEDWHEN_STRING_FORM";
pub const E_MENU_NORMALIZATION_UNKNOWN_STAGE: &str = "E_MENU_NORMALIZATION_UNKNOWN_STAGE";
pub const E_MENU_NORMALIZATION_CORE_HIDDEN: &str = "E_MENU_NORMALIZATION_CORE_HIDDEN";
pub const W_MENU_NORMALIZATION_CORE_HIDDEN: &str = "W_MENU_NORMALIZATION_CORE_HIDDEN";

// EnabledWhen DSL validation errors.
pub const E_ENABLEDWHEN_DSL_UNKNOWN_OPERATOR: &str = "E_ENABLEDWHEN_DSL_UNKNOWN_OPERATOR";
pub const E_ENABLEDWHEN_DSL_MAX_DEPTH_EXCEEDED: &str = "E_ENABLEDWHEN_DSL_MAX_DEPTH_EXCEEDED";
pub const E_ENABLEDWHEN_DSL_MAX_NODES_EXCEEDED: &str = "E_ENABLEDWHEN_DSL_MAX_NODES_EXCEEDED";
pub const E_ENABLEDWHEN_DSL_INVALID_VALUE: &str = "E_ENABLEDWHEN_DSL_INVALID_VALUE";
pub const E_ENABLEDWHEN_DSL_UNKNOWN_OPERAND: &str = "E_ENABLEDWHEN_DSL_UNKNOWN_OPERAND";
pub const E_ENABLEDWHEN_DSL_UNEXPECTED_KEY: &str = "E_ENABLEDWHEN_DSL_UNEXPECTED_KEY";
pub const E_ENABLEDWHEN_DSL_MALFORMED_NODE: &str = "E_ENABLEDWHEN_DSL_MALFORMED_NODE";

// Command namespace errors and warnings.
pub const E_COMMAND_NAMESPACE_UNKNOWN: &str = "E_COMMAND_NAMESPACE_UNKNOWN";
pub const E_COMMAND_NAMESPACE_SUNSET_EXPIRED: &str = "E_COMMAND_NAMESPACE_SUNSET_EXPIRED";
pub const E_COMMAND_NAMESPACE_UNKNOWN_ACTION: &str = "E_COMMAND_NAMESPACE_UNKNOWN_ACTION";
pub const W_COMMAND_NAMESPACE_DEPRECATED_ALIAS: &str = "W_COMMAND_NAMESPACE_DEPRECATED_ALIAS";
pub const W_COMMAND_NAMESPACE_UNMANAGED_ID: &str = "W_COMMAND_NAMESPACE_UNMANAGED_ID";

// Plugin overlay screening violations.
pub const PLUGIN_OVERLAY_MALFORMED: &str = "PLUGIN_OVERLAY_MALFORMED";
pub const PLUGIN_OVERLAY_REQUIRED_FIELD_MISSING: &str = "PLUGIN_OVERLAY_REQUIRED_FIELD_MISSING";
pub const PLUGIN_OVERLAY_UNSIGNED_FORBIDDEN: &str = "PLUGIN_OVERLAY_UNSIGNED_FORBIDDEN";
pub const PLUGIN_OVERLAY_SIGNATURE_REJECTED: &str = "PLUGIN_OVERLAY_SIGNATURE_REJECTED";
pub const PLUGIN_OVERLAY_FIELD_NOT_ALLOWED: &str = "PLUGIN_OVERLAY_FIELD_NOT_ALLOWED";
pub const PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN: &str =
    "PLUGIN_OVERLAY_EXECUTABLE_FIELD_FORBIDDEN";
pub const PLUGIN_OVERLAY_UNSERIALIZABLE_VALUE: &str = "PLUGIN_OVERLAY_UNSERIALIZABLE_VALUE";
pub const PLUGIN_OVERLAY_ENABLEDWHEN_INVALID: &str = "PLUGIN_OVERLAY_ENABLEDWHEN_INVALID";
pub const PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID: &str =
    "PLUGIN_OVERLAY_VISIBILITY_POLICY_INVALID";
pub const PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN: &str = "PLUGIN_OVERLAY_CORE_HIDE_FORBIDDEN";
pub const E_PLUGIN_MENU_OVERLAY_POLICY_VIOLATION: &str = "E_PLUGIN_MENU_OVERLAY_POLICY_VIOLATION";

// Overlay stack ordering.
pub const E_MENU_OVERLAY_STACK_DRIFT: &str = "E_MENU_OVERLAY_STACK_DRIFT";

// Pack loading.
pub const W_CANON_DOCUMENT_DEFAULTED: &str = "W_CANON_DOCUMENT_DEFAULTED";

/// One diagnostic record: a stable code plus human-readable context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.to_string(),
            message: message.into(),
            path: None,
            source_ref: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }
}

/// Accumulated diagnostics for one normalization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub overlay_order: Vec<String>,
}

impl Diagnostics {
    pub fn error(&mut self, diagnostic: Diagnostic) {
        self.errors.push(diagnostic);
    }

    pub fn warning(&mut self, diagnostic: Diagnostic) {
        self.warnings.push(diagnostic);
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().chain(self.warnings.iter()).any(|diagnostic| diagnostic.code == code)
    }
}
