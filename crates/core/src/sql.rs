//! SQL statements with positional parameters, and their literal rendering.
//!
//! Statements use PostgreSQL-style `$n` placeholders numbered in the order
//! parameters are bound. [`Statement::render`] substitutes the captured
//! values back into the text so the audit trail contains runnable SQL.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Longest identifier PostgreSQL keeps without truncation.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl SqlValue {
    /// Render the value as a SQL literal.
    ///
    /// Strings are single-quoted with embedded quotes doubled, absent values
    /// become `NULL`, numbers and booleans are written bare.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        v.map_or(Self::Null, Self::Text)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// A SQL statement and its ordered parameter values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Substitute every `$n` placeholder with the literal form of `params[n-1]`.
    ///
    /// Placeholders inside quoted string literals are left alone, and `$12`
    /// is never mistaken for `$1` followed by `2`. A placeholder without a
    /// matching parameter renders as `NULL`.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut chars = self.sql.chars().peekable();
        let mut in_quote = false;

        while let Some(c) = chars.next() {
            if c == '\'' {
                in_quote = !in_quote;
                out.push(c);
                continue;
            }
            if c != '$' || in_quote {
                out.push(c);
                continue;
            }

            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            match digits.parse::<usize>() {
                Ok(n) if n >= 1 => {
                    let literal = self
                        .params
                        .get(n - 1)
                        .map(SqlValue::to_literal)
                        .unwrap_or_else(|| SqlValue::Null.to_literal());
                    out.push_str(&literal);
                }
                _ => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        }

        out
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Accumulates parameters while a statement's text is assembled.
///
/// Each call to [`bind`](Self::bind) appends one value and returns the next
/// placeholder, so numbering always follows append order.
#[derive(Debug, Default)]
pub struct ParamList {
    params: Vec<SqlValue>,
}

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, returning its placeholder with an optional type cast
    /// (`$3` or `$3::numeric`).
    pub fn bind(&mut self, value: SqlValue, cast: Option<&str>) -> String {
        self.params.push(value);
        let n = self.params.len();
        match cast {
            Some(ty) => format!("${n}::{ty}"),
            None => format!("${n}"),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_statement(self, sql: impl Into<String>) -> Statement {
        Statement::new(sql, self.params)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Reject anything that is not a plain SQL identifier.
///
/// Table and column names are interpolated into statement text, so they
/// must never carry quotes, whitespace or punctuation.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    if name.len() > MAX_IDENTIFIER_LENGTH || !IDENTIFIER_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid column or table name: '{name}'"
        )));
    }
    Ok(())
}
