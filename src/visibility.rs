//! Visibility policy decisions.
//!
//! A first-match-wins decision table assigns every node one of the three
//! policies plus a reason code. Core-safety commands can never end up hidden;
//! an attempted hide falls back to `visible_disabled` and the caller records
//! the conflict at the severity the profile demands.

use crate::canon::{DslCanon, VisibilityMatrix};
use crate::dsl::{self, EvalContext, Expression};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REASON_CORE_HIDDEN_REJECTED: &str = "CORE_HIDDEN_REJECTED";
pub const REASON_EXPLICIT_HIDDEN: &str = "EXPLICIT_HIDDEN";
pub const REASON_PROFILE_MINIMAL_HIDDEN: &str = "PROFILE_MINIMAL_HIDDEN";
pub const REASON_MODE_GATED: &str = "MODE_GATED";
pub const REASON_PROFILE_GATED: &str = "PROFILE_GATED";
pub const REASON_STAGE_GATED: &str = "STAGE_GATED";
pub const REASON_ENABLEDWHEN_INVALID: &str = "ENABLEDWHEN_INVALID";
pub const REASON_ENABLEDWHEN_FALSE: &str = "ENABLEDWHEN_FALSE";

pub const MINIMAL_PROFILE: &str = "minimal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    VisibleEnabled,
    VisibleDisabled,
    Hidden,
}

impl VisibilityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityPolicy::VisibleEnabled => "visible_enabled",
            VisibilityPolicy::VisibleDisabled => "visible_disabled",
            VisibilityPolicy::Hidden => "hidden",
        }
    }
}

impl fmt::Display for VisibilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node-shaped inputs the decision table reads.
#[derive(Debug)]
pub struct VisibilityInputs<'a> {
    pub explicit_visible: Option<bool>,
    pub canonical_cmd_id: Option<&'a str>,
    pub enabled_when: Option<&'a Expression>,
    pub enabled_when_invalid: bool,
    pub mode: &'a [String],
    pub profile: &'a [String],
    pub stage: &'a [String],
}

#[derive(Debug, PartialEq, Eq)]
pub struct VisibilityDecision {
    pub policy: VisibilityPolicy,
    pub reason_code: Option<&'static str>,
    /// Set when an explicit hide of a core-safety command was refused.
    pub core_hide_rejected: bool,
}

impl VisibilityDecision {
    fn plain(policy: VisibilityPolicy, reason_code: Option<&'static str>) -> Self {
        VisibilityDecision {
            policy,
            reason_code,
            core_hide_rejected: false,
        }
    }
}

/// Apply the decision table to one node.
pub fn decide(
    inputs: &VisibilityInputs<'_>,
    ctx: &EvalContext,
    matrix: &VisibilityMatrix,
    dsl_canon: &DslCanon,
) -> VisibilityDecision {
    let is_core = inputs
        .canonical_cmd_id
        .is_some_and(|command| matrix.is_core_safety(command));

    if inputs.explicit_visible == Some(false) {
        if is_core {
            return VisibilityDecision {
                policy: VisibilityPolicy::VisibleDisabled,
                reason_code: Some(REASON_CORE_HIDDEN_REJECTED),
                core_hide_rejected: true,
            };
        }
        return VisibilityDecision::plain(
            VisibilityPolicy::Hidden,
            Some(REASON_EXPLICIT_HIDDEN),
        );
    }

    if ctx.profile == MINIMAL_PROFILE
        && matrix.minimal_profile_hiding_enabled
        && !is_core
        && inputs.canonical_cmd_id.is_some_and(|command| {
            matrix
                .minimal_profile_hidden_allowlist
                .iter()
                .any(|hidden| hidden == command)
        })
    {
        return VisibilityDecision::plain(
            VisibilityPolicy::Hidden,
            Some(REASON_PROFILE_MINIMAL_HIDDEN),
        );
    }

    if !inputs.mode.iter().any(|mode| *mode == ctx.mode) {
        return VisibilityDecision::plain(
            VisibilityPolicy::VisibleDisabled,
            Some(REASON_MODE_GATED),
        );
    }
    if !inputs.profile.iter().any(|profile| *profile == ctx.profile) {
        return VisibilityDecision::plain(
            VisibilityPolicy::VisibleDisabled,
            Some(REASON_PROFILE_GATED),
        );
    }
    if !inputs.stage.iter().any(|stage| *stage == ctx.stage) {
        return VisibilityDecision::plain(
            VisibilityPolicy::VisibleDisabled,
            Some(REASON_STAGE_GATED),
        );
    }

    if inputs.enabled_when_invalid {
        return VisibilityDecision::plain(
            VisibilityPolicy::VisibleDisabled,
            Some(REASON_ENABLEDWHEN_INVALID),
        );
    }
    let (Some(_), Some(expression)) = (inputs.canonical_cmd_id, inputs.enabled_when) else {
        return VisibilityDecision::plain(VisibilityPolicy::VisibleEnabled, None);
    };
    if dsl::evaluate(expression, ctx, dsl_canon) {
        VisibilityDecision::plain(VisibilityPolicy::VisibleEnabled, None)
    } else {
        VisibilityDecision::plain(
            VisibilityPolicy::VisibleDisabled,
            Some(REASON_ENABLEDWHEN_FALSE),
        )
    }
}
