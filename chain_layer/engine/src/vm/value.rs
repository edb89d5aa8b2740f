//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use super::VmError;

/// A runtime value. Integers are 64-bit and all arithmetic is checked; there
/// are no floats, so evaluation is bit-identical everywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
        }
    }

    /// String rendering used by `+` concatenation, `log` and host string
    /// arguments.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", inner.join(","))
            },
        }
    }

    /// Rough allocation size, charged against the per-frame memory limit.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) => 8,
            Value::Str(s) => 8 + s.len(),
            Value::Array(items) => 8 + items.iter().map(|v| v.approx_size()).sum::<usize>(),
        }
    }

    pub fn as_int(&self) -> Result<i64, VmError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(VmError::Type(format!("expected int, got {}", other.type_name()))),
        }
    }

    pub fn as_str(&self) -> Result<&str, VmError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(VmError::Type(format!("expected string, got {}", other.type_name()))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, VmError> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| VmError::Type(format!("non-integer number {n}"))),
            serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_json::Value::Array(items) => Ok(Value::Array(
                items.iter().map(Value::from_json).collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(_) => Err(VmError::Type("objects are not VM values".to_string())),
        }
    }

    /// Coercion for contract call inputs, which arrive as strings on the
    /// wire: integers and booleans are recognized, everything else stays a
    /// string.
    pub fn parse_input(input: &str) -> Value {
        if let Ok(n) = input.parse::<i64>() {
            return Value::Int(n);
        }
        match input {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            _ => Value::Str(input.to_string()),
        }
    }
}
