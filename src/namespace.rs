//! Command namespace canonicalization.
//!
//! Every command reference in a menu tree funnels through [`resolve`] so the
//! normalized artifact only ever carries canonical ids. Deprecated prefixes
//! resolve through the alias map until their sunset date; ids outside the
//! managed namespaces pass through for external integrations.

use crate::canon::CommandNamespaceCanon;
use crate::diagnostics::{
    E_COMMAND_NAMESPACE_SUNSET_EXPIRED, E_COMMAND_NAMESPACE_UNKNOWN,
    E_COMMAND_NAMESPACE_UNKNOWN_ACTION,
};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Result of resolving one command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub canonical_id: String,
    pub deprecated: bool,
    /// True when the id matched neither the canonical nor a deprecated
    /// prefix and passed through unmanaged.
    pub unmanaged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub enforce_sunset: bool,
    pub today: Option<NaiveDate>,
}

/// Resolve a raw command id to its canonical form.
pub fn resolve(
    input_id: &str,
    canon: &CommandNamespaceCanon,
    opts: ResolveOptions,
) -> Result<Resolution, ResolveError> {
    if input_id.starts_with(&canon.canonical_prefix) {
        return Ok(Resolution {
            canonical_id: input_id.to_string(),
            deprecated: false,
            unmanaged: false,
        });
    }

    let is_deprecated = canon
        .deprecated_prefixes
        .iter()
        .any(|prefix| input_id.starts_with(prefix.as_str()));
    if !is_deprecated {
        return Ok(Resolution {
            canonical_id: input_id.to_string(),
            deprecated: false,
            unmanaged: true,
        });
    }

    let Some(canonical_id) = canon.alias_map.get(input_id) else {
        return Err(ResolveError {
            code: E_COMMAND_NAMESPACE_UNKNOWN,
            message: format!("deprecated id {input_id} has no alias mapping"),
        });
    };
    if opts.enforce_sunset {
        if let (Some(today), Some(sunset)) = (opts.today, sunset_date(canon)) {
            if today > sunset {
                return Err(ResolveError {
                    code: E_COMMAND_NAMESPACE_SUNSET_EXPIRED,
                    message: format!(
                        "deprecated id {input_id} expired on {sunset}; use {canonical_id}"
                    ),
                });
            }
        }
    }
    Ok(Resolution {
        canonical_id: canonical_id.clone(),
        deprecated: true,
        unmanaged: false,
    })
}

/// Map an action id through the fixed action table. Unknown actions are hard
/// errors; the returned command id still goes through [`resolve`].
pub fn resolve_action(
    action_id: &str,
    canon: &CommandNamespaceCanon,
) -> Result<String, ResolveError> {
    canon
        .action_map
        .get(action_id)
        .cloned()
        .ok_or_else(|| ResolveError {
            code: E_COMMAND_NAMESPACE_UNKNOWN_ACTION,
            message: format!("unknown action id {action_id}"),
        })
}

/// Whether an unmanaged id at least looks like a well-formed command id.
pub fn looks_like_command_id(id: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9]*(\.[a-zA-Z][a-zA-Z0-9]*)+$").expect("regex for command ids")
    })
    .is_match(id)
}

fn sunset_date(canon: &CommandNamespaceCanon) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(
        &canon.alias_policy.allow_deprecated_in_configs_until,
        "%Y-%m-%d",
    )
    .ok()
}
