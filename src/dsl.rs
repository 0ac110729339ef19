//! The enabledWhen gating DSL: bounded parsing and pure evaluation.
//!
//! Expressions arrive as tagged JSON objects (`{"op": "...", ...}`). Parsing
//! fails closed on the first violation with a specific reason code; the depth
//! and node-count bounds make every traversal terminating. Evaluation is
//! total over parsed expressions and performs no I/O.

use crate::canon::DslCanon;
use crate::diagnostics::{
    E_ENABLEDWHEN_DSL_INVALID_VALUE, E_ENABLEDWHEN_DSL_MALFORMED_NODE,
    E_ENABLEDWHEN_DSL_MAX_DEPTH_EXCEEDED, E_ENABLEDWHEN_DSL_MAX_NODES_EXCEEDED,
    E_ENABLEDWHEN_DSL_UNEXPECTED_KEY, E_ENABLEDWHEN_DSL_UNKNOWN_OPERAND,
    E_ENABLEDWHEN_DSL_UNKNOWN_OPERATOR,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Scalar literal allowed in expression leaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    pub fn from_value(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(flag) => Some(Scalar::Bool(*flag)),
            Value::Number(number) => number.as_f64().map(Scalar::Number),
            Value::String(text) => Some(Scalar::String(text.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Scalar::Bool(true))
    }
}

/// Closed operator set. Adding an operator requires updating both
/// [`parse_expression`] and [`evaluate`]; the exhaustive matches make the
/// compiler enforce that.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op")]
pub enum Expression {
    #[serde(rename = "all")]
    All { args: Vec<Expression> },
    #[serde(rename = "any")]
    Any { args: Vec<Expression> },
    #[serde(rename = "not")]
    Not { arg: Box<Expression> },
    #[serde(rename = "eq")]
    Eq { operand: String, value: Scalar },
    #[serde(rename = "neq")]
    Neq { operand: String, value: Scalar },
    #[serde(rename = "in")]
    In { operand: String, values: Vec<Scalar> },
    #[serde(rename = "flag")]
    Flag { name: String },
    #[serde(rename = "modeIs")]
    ModeIs { value: String },
    #[serde(rename = "profileIs")]
    ProfileIs { value: String },
    #[serde(rename = "platformIs")]
    PlatformIs { value: String },
    #[serde(rename = "stageGte")]
    StageGte { stage: String },
}

/// The default gate for command nodes that declare no expression.
pub fn always_true() -> Expression {
    Expression::All { args: Vec::new() }
}

/// One parse/validation failure with its reason code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslViolation {
    pub code: &'static str,
    pub detail: String,
}

impl DslViolation {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        DslViolation {
            code,
            detail: detail.into(),
        }
    }
}

/// Evaluation context snapshot for one normalization run.
///
/// Named operands resolve through `values`, then `flags`, then `scope_flags`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalContext {
    pub mode: String,
    pub profile: String,
    pub platform: String,
    pub stage: String,
    pub values: BTreeMap<String, Scalar>,
    pub flags: BTreeMap<String, Scalar>,
    pub scope_flags: BTreeMap<String, Scalar>,
}

impl EvalContext {
    fn lookup(&self, name: &str) -> Option<&Scalar> {
        self.values
            .get(name)
            .or_else(|| self.flags.get(name))
            .or_else(|| self.scope_flags.get(name))
    }
}

/// Parse and validate a raw expression tree against the canon limits.
pub fn parse_expression(value: &Value, canon: &DslCanon) -> Result<Expression, DslViolation> {
    let mut nodes = 0usize;
    parse_node(value, canon, 1, &mut nodes)
}

fn parse_node(
    value: &Value,
    canon: &DslCanon,
    depth: usize,
    nodes: &mut usize,
) -> Result<Expression, DslViolation> {
    if depth > canon.max_depth {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_MAX_DEPTH_EXCEEDED,
            format!("expression depth exceeds {}", canon.max_depth),
        ));
    }
    *nodes += 1;
    if *nodes > canon.max_nodes {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_MAX_NODES_EXCEEDED,
            format!("expression node count exceeds {}", canon.max_nodes),
        ));
    }
    let Some(object) = value.as_object() else {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_MALFORMED_NODE,
            "expression nodes must be objects with an op tag",
        ));
    };
    let Some(op) = object.get("op").and_then(Value::as_str) else {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_MALFORMED_NODE,
            "expression node is missing a string op tag",
        ));
    };

    match op {
        "all" | "any" => {
            check_keys(object, op, &["op", "args"])?;
            let args = parse_children(object.get("args"), canon, depth, nodes, op)?;
            if op == "all" {
                Ok(Expression::All { args })
            } else {
                Ok(Expression::Any { args })
            }
        }
        "not" => {
            check_keys(object, op, &["op", "arg"])?;
            let Some(inner) = object.get("arg") else {
                return Err(DslViolation::new(
                    E_ENABLEDWHEN_DSL_INVALID_VALUE,
                    "not requires an arg expression",
                ));
            };
            let arg = parse_node(inner, canon, depth + 1, nodes)?;
            Ok(Expression::Not { arg: Box::new(arg) })
        }
        "eq" | "neq" => {
            check_keys(object, op, &["op", "operand", "value"])?;
            let operand = required_operand(object, op, canon)?;
            let value = required_scalar(object.get("value"), op)?;
            if op == "eq" {
                Ok(Expression::Eq { operand, value })
            } else {
                Ok(Expression::Neq { operand, value })
            }
        }
        "in" => {
            check_keys(object, op, &["op", "operand", "values"])?;
            let operand = required_operand(object, op, canon)?;
            let Some(raw_values) = object.get("values").and_then(Value::as_array) else {
                return Err(DslViolation::new(
                    E_ENABLEDWHEN_DSL_INVALID_VALUE,
                    "in requires an array of scalar values",
                ));
            };
            let mut values = Vec::with_capacity(raw_values.len());
            for raw in raw_values {
                let Some(scalar) = Scalar::from_value(raw) else {
                    return Err(DslViolation::new(
                        E_ENABLEDWHEN_DSL_INVALID_VALUE,
                        "in values must be scalars",
                    ));
                };
                values.push(scalar);
            }
            Ok(Expression::In { operand, values })
        }
        "flag" => {
            check_keys(object, op, &["op", "name"])?;
            let Some(name) = object.get("name").and_then(Value::as_str) else {
                return Err(DslViolation::new(
                    E_ENABLEDWHEN_DSL_INVALID_VALUE,
                    "flag requires a string name",
                ));
            };
            known_operand(name, canon)?;
            Ok(Expression::Flag {
                name: name.to_string(),
            })
        }
        "modeIs" | "profileIs" | "platformIs" => {
            check_keys(object, op, &["op", "value"])?;
            let Some(value) = object.get("value").and_then(Value::as_str) else {
                return Err(DslViolation::new(
                    E_ENABLEDWHEN_DSL_INVALID_VALUE,
                    format!("{op} requires a string value"),
                ));
            };
            let value = value.to_string();
            Ok(match op {
                "modeIs" => Expression::ModeIs { value },
                "profileIs" => Expression::ProfileIs { value },
                _ => Expression::PlatformIs { value },
            })
        }
        "stageGte" => {
            check_keys(object, op, &["op", "stage"])?;
            let Some(stage) = object.get("stage").and_then(Value::as_str) else {
                return Err(DslViolation::new(
                    E_ENABLEDWHEN_DSL_INVALID_VALUE,
                    "stageGte requires a string stage",
                ));
            };
            Ok(Expression::StageGte {
                stage: stage.to_string(),
            })
        }
        other => Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_UNKNOWN_OPERATOR,
            format!("unknown operator {other}"),
        )),
    }
}

fn parse_children(
    raw: Option<&Value>,
    canon: &DslCanon,
    depth: usize,
    nodes: &mut usize,
    op: &str,
) -> Result<Vec<Expression>, DslViolation> {
    let Some(children) = raw.and_then(Value::as_array) else {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_INVALID_VALUE,
            format!("{op} requires an args array"),
        ));
    };
    let mut parsed = Vec::with_capacity(children.len());
    for child in children {
        parsed.push(parse_node(child, canon, depth + 1, nodes)?);
    }
    Ok(parsed)
}

fn check_keys(
    object: &Map<String, Value>,
    op: &str,
    allowed: &[&str],
) -> Result<(), DslViolation> {
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(DslViolation::new(
                E_ENABLEDWHEN_DSL_UNEXPECTED_KEY,
                format!("{op} does not accept key {key}"),
            ));
        }
    }
    Ok(())
}

fn required_operand(
    object: &Map<String, Value>,
    op: &str,
    canon: &DslCanon,
) -> Result<String, DslViolation> {
    let Some(operand) = object.get("operand").and_then(Value::as_str) else {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_INVALID_VALUE,
            format!("{op} requires a string operand"),
        ));
    };
    known_operand(operand, canon)?;
    Ok(operand.to_string())
}

fn known_operand(name: &str, canon: &DslCanon) -> Result<(), DslViolation> {
    if canon.known_operands.iter().any(|known| known == name) {
        Ok(())
    } else {
        Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_UNKNOWN_OPERAND,
            format!("unknown operand {name}"),
        ))
    }
}

fn required_scalar(raw: Option<&Value>, op: &str) -> Result<Scalar, DslViolation> {
    let Some(value) = raw else {
        return Err(DslViolation::new(
            E_ENABLEDWHEN_DSL_INVALID_VALUE,
            format!("{op} requires a scalar value"),
        ));
    };
    Scalar::from_value(value).ok_or_else(|| {
        DslViolation::new(
            E_ENABLEDWHEN_DSL_INVALID_VALUE,
            format!("{op} value must be a scalar"),
        )
    })
}

/// Evaluate a parsed expression against the context. Pure; `all`/`any`
/// short-circuit; unknown stages make `stageGte` false rather than erroring.
pub fn evaluate(expression: &Expression, ctx: &EvalContext, canon: &DslCanon) -> bool {
    match expression {
        Expression::All { args } => args.iter().all(|arg| evaluate(arg, ctx, canon)),
        Expression::Any { args } => args.iter().any(|arg| evaluate(arg, ctx, canon)),
        Expression::Not { arg } => !evaluate(arg, ctx, canon),
        Expression::Eq { operand, value } => {
            ctx.lookup(operand).is_some_and(|found| found == value)
        }
        Expression::Neq { operand, value } => {
            !ctx.lookup(operand).is_some_and(|found| found == value)
        }
        Expression::In { operand, values } => ctx
            .lookup(operand)
            .is_some_and(|found| values.iter().any(|value| value == found)),
        Expression::Flag { name } => ctx.lookup(name).is_some_and(Scalar::is_true),
        Expression::ModeIs { value } => ctx.mode == *value,
        Expression::ProfileIs { value } => ctx.profile == *value,
        Expression::PlatformIs { value } => ctx.platform == *value,
        Expression::StageGte { stage } => {
            let rank = |name: &str| canon.stage_order.iter().position(|candidate| candidate == name);
            match (rank(&ctx.stage), rank(stage)) {
                (Some(current), Some(required)) => current >= required,
                _ => false,
            }
        }
    }
}
