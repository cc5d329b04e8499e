//! Typed variable values
//!
//! Terraform stores every variable value as text; the management API wants
//! the JSON value matching the variable's type tag. This module converts
//! between the two and defines the canonical text of each type so that
//! values read back from the API compare equal to what was configured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    String,
    Boolean,
    Number,
    #[serde(rename = "JSON")]
    Json,
}

impl VariableType {
    pub const TAGS: [&'static str; 4] = ["String", "Boolean", "Number", "JSON"];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::String => "String",
            VariableType::Boolean => "Boolean",
            VariableType::Number => "Number",
            VariableType::Json => "JSON",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "String" => Ok(VariableType::String),
            "Boolean" => Ok(VariableType::Boolean),
            "Number" => Ok(VariableType::Number),
            "JSON" => Ok(VariableType::Json),
            other => Err(CodecError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("expected a {expected} value, got {actual}")]
    TypeMismatch {
        expected: VariableType,
        actual: String,
    },

    #[error("{text:?} is not a valid {variable_type} value: {reason}")]
    Decode {
        variable_type: VariableType,
        text: String,
        reason: String,
    },

    #[error("variation {variation:?} sets {variable:?}, which is not a variable of this feature")]
    UnknownVariable { variation: String, variable: String },

    #[error("variation {variation:?}, variable {variable:?}: {source}")]
    InvalidVariation {
        variation: String,
        variable: String,
        #[source]
        source: Box<CodecError>,
    },

    #[error("unknown variable type {0:?}, expected one of String, Boolean, Number, JSON")]
    UnknownType(String),
}

/// A variable value tagged with its type
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    String(String),
    Boolean(bool),
    Number(f64),
    Json(serde_json::Value),
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl VariableValue {
    pub fn variable_type(&self) -> VariableType {
        match self {
            VariableValue::String(_) => VariableType::String,
            VariableValue::Boolean(_) => VariableType::Boolean,
            VariableValue::Number(_) => VariableType::Number,
            VariableValue::Json(_) => VariableType::Json,
        }
    }

    /// Parses Terraform text as a value of `variable_type`
    pub fn parse(text: &str, variable_type: VariableType) -> Result<Self, CodecError> {
        let decode_error = |reason: String| CodecError::Decode {
            variable_type,
            text: text.to_string(),
            reason,
        };

        match variable_type {
            VariableType::String => Ok(VariableValue::String(text.to_string())),
            VariableType::Boolean => match text {
                "true" => Ok(VariableValue::Boolean(true)),
                "false" => Ok(VariableValue::Boolean(false)),
                _ => Err(decode_error("expected true or false".to_string())),
            },
            VariableType::Number => {
                let n: f64 = text.parse().map_err(|e| decode_error(format!("{}", e)))?;
                Self::number(n)
            }
            VariableType::Json => serde_json::from_str(text)
                .map(VariableValue::Json)
                .map_err(|e| decode_error(e.to_string())),
        }
    }

    fn number(n: f64) -> Result<Self, CodecError> {
        if n.is_finite() {
            Ok(VariableValue::Number(n))
        } else {
            Err(CodecError::TypeMismatch {
                expected: VariableType::Number,
                actual: format!("non-finite number {}", n),
            })
        }
    }

    /// Reads a wire value, which must have the JSON kind of `variable_type`
    pub fn from_wire(
        value: &serde_json::Value,
        variable_type: VariableType,
    ) -> Result<Self, CodecError> {
        let mismatch = || CodecError::TypeMismatch {
            expected: variable_type,
            actual: json_kind(value).to_string(),
        };

        match (variable_type, value) {
            (VariableType::String, serde_json::Value::String(s)) => {
                Ok(VariableValue::String(s.clone()))
            }
            (VariableType::Boolean, serde_json::Value::Bool(b)) => Ok(VariableValue::Boolean(*b)),
            (VariableType::Number, serde_json::Value::Number(n)) => {
                Self::number(n.as_f64().ok_or_else(mismatch)?)
            }
            (VariableType::Json, serde_json::Value::Null) => Err(mismatch()),
            (VariableType::Json, v) => Ok(VariableValue::Json(v.clone())),
            _ => Err(mismatch()),
        }
    }

    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            VariableValue::String(s) => serde_json::Value::String(s.clone()),
            VariableValue::Boolean(b) => serde_json::Value::Bool(*b),
            VariableValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            VariableValue::Json(v) => v.clone(),
        }
    }

    /// Canonical Terraform text
    pub fn to_text(&self) -> String {
        match self {
            VariableValue::String(s) => s.clone(),
            VariableValue::Boolean(b) => b.to_string(),
            VariableValue::Number(n) => n.to_string(),
            VariableValue::Json(v) => v.to_string(),
        }
    }
}

/// Terraform text to wire value
pub fn encode(text: &str, variable_type: VariableType) -> Result<serde_json::Value, CodecError> {
    VariableValue::parse(text, variable_type).map(|v| v.to_wire())
}

/// Wire value to canonical Terraform text
pub fn decode(value: &serde_json::Value, variable_type: VariableType) -> Result<String, CodecError> {
    VariableValue::from_wire(value, variable_type).map(|v| v.to_text())
}

/// Rewrites `text` in the form a read from the API will produce
pub fn canonicalize(text: &str, variable_type: VariableType) -> Result<String, CodecError> {
    VariableValue::parse(text, variable_type).map(|v| v.to_text())
}

/// Checks that every variation only sets declared variables, with values
/// of the declared type. Reports the first offending pair.
pub fn validate_variations<'a, I>(
    variables: &BTreeMap<String, VariableType>,
    variations: I,
) -> Result<(), CodecError>
where
    I: IntoIterator<Item = (&'a str, &'a BTreeMap<String, String>)>,
{
    for (variation, values) in variations {
        for (variable, text) in values {
            let variable_type =
                variables
                    .get(variable)
                    .ok_or_else(|| CodecError::UnknownVariable {
                        variation: variation.to_string(),
                        variable: variable.clone(),
                    })?;
            VariableValue::parse(text, *variable_type).map_err(|e| {
                CodecError::InvalidVariation {
                    variation: variation.to_string(),
                    variable: variable.clone(),
                    source: Box::new(e),
                }
            })?;
        }
    }
    Ok(())
}
