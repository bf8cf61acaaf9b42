// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 crudflow contributors

//! Row filters, sorting and paging
//!
//! [`Filter`] is the structured predicate handed to a [`TableGateway`]. It is
//! built either from a step's resolved filter predicates or by parsing the
//! textual grammar shared with table browsing:
//!
//! ```text
//! status = "open" AND owner = $user.id
//! title startsWith "Re:"
//! quarterly report            <- bare substring, matched against every column
//! ```
//!
//! [`TableGateway`]: super::TableGateway

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::Row;

/// Token replaced with the authenticated caller's id
pub const USER_ID_TOKEN: &str = "$user.id";

static CONDITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*([A-Za-z_][A-Za-z0-9_]*)(?:\s*(!=|<=|>=|=|<|>)|\s+(startsWith|endsWith|contains)\b)\s*(?:"((?:[^"\\]|\\.)*)"|([^\s"]+))"#,
    )
    .expect("condition pattern is valid")
});

static CONNECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(?i:and)\s+").expect("connector pattern is valid"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Errors produced while parsing filter or sort expressions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("filter uses {USER_ID_TOKEN} but the caller is not authenticated")]
    AuthRequired,

    #[error("malformed filter '{expr}' near '{near}'")]
    Malformed { expr: String, near: String },

    #[error("invalid sort expression '{expr}'")]
    InvalidSort { expr: String },
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
    #[serde(rename = "contains")]
    Contains,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Contains => "contains",
        }
    }

    /// Evaluate `actual OP expected`. A missing column behaves like `null`.
    pub fn matches(&self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        let ordering = compare_values(actual, expected);

        match self {
            Self::Eq => ordering == Some(Ordering::Equal),
            Self::Ne => ordering != Some(Ordering::Equal),
            Self::Lt => ordering == Some(Ordering::Less),
            Self::Gt => ordering == Some(Ordering::Greater),
            Self::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Self::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Self::StartsWith => !actual.is_null() && text(actual).starts_with(&*text(expected)),
            Self::EndsWith => !actual.is_null() && text(actual).ends_with(&*text(expected)),
            Self::Contains => !actual.is_null() && text(actual).contains(&*text(expected)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            "startsWith" => Ok(Self::StartsWith),
            "endsWith" => Ok(Self::EndsWith),
            "contains" => Ok(Self::Contains),
            _ => Err(format!("Unknown operator: {}", s)),
        }
    }
}

/// A single `column OP value` comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.op.matches(row.get(&self.column), &self.value)
    }
}

/// Row predicate understood by every gateway
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Filter {
    /// Matches every row
    #[default]
    All,
    /// Conjunction of comparisons
    Conditions(Vec<Condition>),
    /// Case-insensitive substring matched against all columns
    Search(String),
    /// Every inner filter must match
    And(Vec<Filter>),
}

impl Filter {
    /// Build a conjunction; an empty list matches every row
    pub fn conditions(conditions: Vec<Condition>) -> Self {
        if conditions.is_empty() {
            Self::All
        } else {
            Self::Conditions(conditions)
        }
    }

    /// Conjunction of two filters
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, filter) | (filter, Self::All) => filter,
            (Self::Conditions(mut left), Self::Conditions(right)) => {
                left.extend(right);
                Self::Conditions(left)
            }
            (Self::And(mut filters), filter) => {
                filters.push(filter);
                Self::And(filters)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Parse the textual filter grammar, substituting `$user.id`
    pub fn parse(expr: &str, user_id: Option<&str>) -> Result<Self, FilterParseError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Self::All);
        }

        // Anything that does not open with a comparison is a plain search
        let Some(first) = CONDITION.captures(trimmed) else {
            return Ok(Self::Search(substitute_user(trimmed, user_id)?.into_owned()));
        };

        let mut conditions = vec![condition_from(&first, user_id)?];
        let mut rest = &trimmed[first.get(0).map_or(0, |m| m.end())..];

        while !rest.trim().is_empty() {
            let malformed = || FilterParseError::Malformed {
                expr: trimmed.to_string(),
                near: rest.trim().to_string(),
            };

            let connector = CONNECTOR.find(rest).ok_or_else(malformed)?;
            let after = &rest[connector.end()..];
            let caps = CONDITION.captures(after).ok_or_else(malformed)?;
            conditions.push(condition_from(&caps, user_id)?);
            let consumed = caps.get(0).map_or(0, |m| m.end());
            rest = &after[consumed..];
        }

        Ok(Self::Conditions(conditions))
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Conditions(conditions) => conditions.iter().all(|c| c.matches(row)),
            Self::Search(needle) => {
                let needle = needle.to_lowercase();
                row.values()
                    .any(|value| text(value).to_lowercase().contains(&needle))
            }
            Self::And(filters) => filters.iter().all(|filter| filter.matches(row)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Search(needle) => write!(f, "~{:?}", needle),
            Self::Conditions(conditions) => {
                for (i, c) in conditions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{} {} {}", c.column, c.op, c.value)?;
                }
                Ok(())
            }
            Self::And(filters) => {
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "({})", filter)?;
                }
                Ok(())
            }
        }
    }
}

fn condition_from(
    caps: &regex::Captures<'_>,
    user_id: Option<&str>,
) -> Result<Condition, FilterParseError> {
    let column = caps.get(1).map_or("", |m| m.as_str());
    let op = caps
        .get(2)
        .or_else(|| caps.get(3))
        .and_then(|m| m.as_str().parse::<Operator>().ok())
        .unwrap_or(Operator::Eq);

    let value = match (caps.get(4), caps.get(5)) {
        (Some(quoted), _) => Value::String(unescape(quoted.as_str())),
        (None, Some(bare)) => bare_literal(bare.as_str()),
        (None, None) => Value::Null,
    };

    let value = match value {
        Value::String(s) if s.contains(USER_ID_TOKEN) => {
            Value::String(substitute_user(&s, user_id)?.into_owned())
        }
        other => other,
    };

    Ok(Condition::new(column, op, value))
}

fn substitute_user<'a>(
    input: &'a str,
    user_id: Option<&str>,
) -> Result<Cow<'a, str>, FilterParseError> {
    if !input.contains(USER_ID_TOKEN) {
        return Ok(Cow::Borrowed(input));
    }
    let id = user_id.ok_or(FilterParseError::AuthRequired)?;
    Ok(Cow::Owned(input.replace(USER_ID_TOKEN, id)))
}

fn unescape(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn bare_literal(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = raw
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

/// Sort order for fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub column: String,
    pub descending: bool,
}

impl Sort {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    /// Parse `column`, `-column` or `column asc|desc`
    pub fn parse(expr: &str) -> Result<Self, FilterParseError> {
        let invalid = || FilterParseError::InvalidSort {
            expr: expr.to_string(),
        };
        let trimmed = expr.trim();

        let (column, descending) = if let Some(column) = trimmed.strip_prefix('-') {
            (column.trim(), true)
        } else {
            let mut parts = trimmed.split_whitespace();
            let column = parts.next().ok_or_else(invalid)?;
            let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(_) => return Err(invalid()),
            };
            if parts.next().is_some() {
                return Err(invalid());
            }
            (column, descending)
        };

        if !IDENTIFIER.is_match(column) {
            return Err(invalid());
        }

        Ok(Self {
            column: column.to_string(),
            descending,
        })
    }

    /// Compare two rows; rows without a value always sort last
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let left = a.get(&self.column).filter(|v| !v.is_null());
        let right = b.get(&self.column).filter(|v| !v.is_null());

        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(l), Some(r)) => {
                let ordering = compare_values(l, r).unwrap_or(Ordering::Equal);
                if self.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        }
    }
}

impl FromStr for Sort {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.column)
        } else {
            write!(f, "{} asc", self.column)
        }
    }
}

/// Paging window for fetches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Page {
    pub fn new(limit: Option<u64>, offset: u64) -> Self {
        Self { limit, offset }
    }

    pub fn limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
        }
    }
}

/// Loose comparison: numeric when either side is a JSON number and the other
/// parses as one, textual otherwise. `null` only equals `null`.
pub(crate) fn compare_values(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(text(actual).cmp(&text(expected))),
            }
        }
        _ => Some(text(actual).cmp(&text(expected))),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}
