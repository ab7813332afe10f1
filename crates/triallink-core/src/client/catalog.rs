//! Discovered tool catalog - descriptors, schema shape, argument validation
//!
//! Validation happens on our side of the pipe: bad arguments fail fast and
//! never produce outbound traffic.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::rpc::{Result, RpcError};

/// One entry in the catalog a tool server advertises. Immutable after
/// discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: ParamSchema,
}

/// Parameter schema: named properties plus a required list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Absent means unconstrained.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ParamKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The basic JSON kinds a parameter may be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn label(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

/// Parse the catalog-listing result into descriptors, rejecting malformed
/// entries, then collapse duplicate names (last wins, warning logged).
pub fn parse_catalog(result: &Value) -> Result<HashMap<String, ToolDescriptor>> {
    let entries = result.as_array().ok_or_else(|| RpcError::Catalog {
        reason: format!("expected an array of tool descriptors, got {}", kind_name(result)),
    })?;

    let mut tools: HashMap<String, ToolDescriptor> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let descriptor: ToolDescriptor =
            serde_json::from_value(entry.clone()).map_err(|e| RpcError::Catalog {
                reason: format!("descriptor {} is malformed: {}", index, e),
            })?;
        if descriptor.name.is_empty() {
            return Err(RpcError::Catalog {
                reason: format!("descriptor {} has an empty name", index),
            });
        }
        if tools.insert(descriptor.name.clone(), descriptor.clone()).is_some() {
            warn!(
                tool = %descriptor.name,
                "catalog advertises duplicate tool name, keeping the last entry"
            );
        }
    }
    Ok(tools)
}

/// Check `args` against the descriptor before any I/O happens. Missing
/// required parameters, values of the wrong kind, and unknown extras are all
/// rejected, with the offending field names collected into the error.
pub fn validate_args(descriptor: &ToolDescriptor, args: &Value) -> Result<()> {
    let Some(args) = args.as_object() else {
        return Err(RpcError::Validation {
            tool: descriptor.name.clone(),
            fields: vec![format!("arguments must be an object, got {}", kind_name(args))],
        });
    };

    let schema = &descriptor.parameters;
    let mut offending = Vec::new();

    for required in &schema.required {
        if !args.contains_key(required) {
            offending.push(format!("{} (missing)", required));
        }
    }

    for (name, value) in args {
        match schema.properties.get(name) {
            None => offending.push(format!("{} (unknown)", name)),
            Some(spec) => {
                if let Some(kind) = spec.kind {
                    if !kind.matches(value) {
                        offending.push(format!(
                            "{} (expected {}, got {})",
                            name,
                            kind.label(),
                            kind_name(value)
                        ));
                    }
                }
            }
        }
    }

    if offending.is_empty() {
        Ok(())
    } else {
        offending.sort();
        Err(RpcError::Validation {
            tool: descriptor.name.clone(),
            fields: offending,
        })
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
