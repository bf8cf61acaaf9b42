// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Update assignments
//!
//! An update writes each column either a plain value or the result of simple
//! arithmetic on a column of the row being updated (`stock = stock - 1`).
//! Relative values are evaluated by the gateway against the stored row, so a
//! decrement never races with another caller's read.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Number, Value};

use super::{GatewayError, Row};

/// `$column OP number`, as sent by a caller
static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)\s*([-+*/])\s*([0-9]+(?:\.[0-9]+)?)$")
        .expect("relative value pattern is valid")
});

/// Column assignments of one update, ordered by column
pub type Changes = BTreeMap<String, Assignment>;

/// Assign every column of `row` its value as-is
pub fn set_columns(row: Row) -> Changes {
    row.into_iter()
        .map(|(column, value)| (column, Assignment::Set(value)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arithmetic {
    Add,
    Sub,
    Mul,
    Div,
}

impl Arithmetic {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            _ => None,
        }
    }

    /// Integers stay integers (division truncates); anything else is computed
    /// as a float. `None` on overflow, division by zero or a non-finite result.
    fn apply(self, current: &Number, operand: &Number) -> Option<Number> {
        if let (Some(a), Some(b)) = (current.as_i64(), operand.as_i64()) {
            let result = match self {
                Self::Add => a.checked_add(b),
                Self::Sub => a.checked_sub(b),
                Self::Mul => a.checked_mul(b),
                Self::Div => a.checked_div(b),
            };
            return result.map(Number::from);
        }

        let (a, b) = (current.as_f64()?, operand.as_f64()?);
        let result = match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        };
        Number::from_f64(result)
    }
}

impl fmt::Display for Arithmetic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        })
    }
}

/// What an update writes into one column
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Replace the stored value
    Set(Value),
    /// `<source> OP operand`, read from the row being updated
    Apply {
        source: String,
        op: Arithmetic,
        operand: Number,
    },
}

impl Assignment {
    /// Parse a caller value like `$stock - 1`; anything else is not relative
    pub fn parse_relative(text: &str) -> Option<Self> {
        let caps = RELATIVE.captures(text.trim())?;
        let operand: Number = serde_json::from_str(&caps[3]).ok()?;
        Some(Self::Apply {
            source: caps[1].to_string(),
            op: Arithmetic::from_symbol(&caps[2])?,
            operand,
        })
    }

    /// The value to store, given the row as it is before the update
    pub fn evaluate(&self, row: &Row) -> Result<Value, GatewayError> {
        match self {
            Self::Set(value) => Ok(value.clone()),
            Self::Apply {
                source,
                op,
                operand,
            } => {
                let Some(Value::Number(current)) = row.get(source) else {
                    return Err(GatewayError::storage(format!(
                        "column '{}' is not numeric",
                        source
                    )));
                };
                op.apply(current, operand)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        GatewayError::storage(format!(
                            "cannot compute {} {} {} for '{}'",
                            current, op, operand, source
                        ))
                    })
            }
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(value) => write!(f, "{}", value),
            Self::Apply {
                source,
                op,
                operand,
            } => write!(f, "{} {} {}", source, op, operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_relative() {
        assert_eq!(
            Assignment::parse_relative("$stock - 1"),
            Some(Assignment::Apply {
                source: "stock".into(),
                op: Arithmetic::Sub,
                operand: Number::from(1),
            })
        );
        assert!(matches!(
            Assignment::parse_relative("$price*1.5"),
            Some(Assignment::Apply { op: Arithmetic::Mul, .. })
        ));

        assert_eq!(Assignment::parse_relative("stock - 1"), None);
        assert_eq!(Assignment::parse_relative("$5 off"), None);
        assert_eq!(Assignment::parse_relative("$stock - x"), None);
    }

    #[test]
    fn test_evaluate_against_row() {
        let stored = row(json!({"stock": 10, "price": 2.5, "name": "pen"}));

        let decrement = Assignment::parse_relative("$stock - 1").unwrap();
        assert_eq!(decrement.evaluate(&stored).unwrap(), json!(9));

        let halve = Assignment::parse_relative("$stock / 4").unwrap();
        assert_eq!(halve.evaluate(&stored).unwrap(), json!(2));

        let markup = Assignment::parse_relative("$price * 2").unwrap();
        assert_eq!(markup.evaluate(&stored).unwrap(), json!(5.0));

        assert_eq!(
            Assignment::Set(json!("x")).evaluate(&stored).unwrap(),
            json!("x")
        );
    }

    #[test]
    fn test_evaluate_errors() {
        let stored = row(json!({"stock": 10, "name": "pen", "big": i64::MAX}));

        for expr in ["$name + 1", "$missing + 1", "$stock / 0", "$big + 1"] {
            let assignment = Assignment::parse_relative(expr).unwrap();
            assert!(
                matches!(assignment.evaluate(&stored), Err(GatewayError::Storage { .. })),
                "{} should fail",
                expr
            );
        }
    }
}
