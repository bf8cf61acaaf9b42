// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Literal type hints and coercion
//!
//! Literals are authored as text. A [`TypeHint`] decides what JSON value the
//! text becomes when a pipeline runs. Hints may be written as `string` /
//! `number` or as a column type (`TEXT`, `REAL`, `INTEGER`, ...), which is
//! mapped using SQLite-style type affinity.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How a literal's raw text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeHint {
    #[default]
    String,
    Number,
}

impl TypeHint {
    /// Map a column type string to a hint.
    ///
    /// Anything with numeric affinity (`INT`, `REAL`, `FLOA`, `DOUB`, `NUM`,
    /// `DEC`) is a number; everything else is kept as text.
    pub fn from_column_type(column_type: &str) -> Self {
        let lowered = column_type.trim().to_ascii_lowercase();
        let numeric = ["int", "real", "floa", "doub", "num", "dec"]
            .iter()
            .any(|needle| lowered.contains(needle));

        if numeric {
            Self::Number
        } else {
            Self::String
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TypeHint {
    fn from(value: String) -> Self {
        Self::from_column_type(&value)
    }
}

impl From<TypeHint> for String {
    fn from(value: TypeHint) -> Self {
        value.as_str().to_string()
    }
}

/// A literal that does not fit its hint
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot coerce '{raw}' to a {hint}")]
pub struct CoercionError {
    pub raw: String,
    pub hint: TypeHint,
}

/// Convert a literal's raw text into a JSON value
pub fn coerce(raw: &str, hint: TypeHint) -> Result<Value, CoercionError> {
    match hint {
        TypeHint::String => Ok(Value::String(raw.to_string())),
        TypeHint::Number => {
            let trimmed = raw.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| CoercionError {
                    raw: raw.to_string(),
                    hint,
                })
        }
    }
}
