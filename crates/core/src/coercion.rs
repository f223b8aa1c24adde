//! Classification of incoming cell values into SQL expressions.
//!
//! Every value becomes exactly one of:
//!
//! - a raw keyword fragment (`CURRENT_TIMESTAMP`), when its trimmed,
//!   uppercased text is a recognized keyword;
//! - a date conversion (`TO_DATE('31/12/2024', 'DD/MM/YYYY')`), when it
//!   matches one of the date patterns;
//! - an ordinary bound parameter otherwise.
//!
//! Checks run in that order and the first match wins. Non-string values are
//! always bound parameters.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::sql::{ParamList, SqlValue};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Recognized keywords and the fragment each one is emitted as.
///
/// Oracle-style spellings submitted by operators map to their PostgreSQL
/// equivalents.
pub const DEFAULT_KEYWORDS: &[(&str, &str)] = &[
    ("CURRENT_TIMESTAMP", "CURRENT_TIMESTAMP"),
    ("CURRENT_DATE", "CURRENT_DATE"),
    ("LOCALTIMESTAMP", "LOCALTIMESTAMP"),
    ("NOW()", "NOW()"),
    ("SYSDATE", "CURRENT_TIMESTAMP"),
    ("SYSTIMESTAMP", "CURRENT_TIMESTAMP"),
];

/// Date and timestamp formats, as `(pattern, format mask)`.
///
/// Masks containing a time component convert with `TO_TIMESTAMP`, the rest
/// with `TO_DATE`.
pub const DEFAULT_DATE_FORMATS: &[(&str, &str)] = &[
    (r"^\d{4}-\d{2}-\d{2}$", "YYYY-MM-DD"),
    (r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$", "YYYY-MM-DD HH24:MI:SS"),
    (r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}$", r#"YYYY-MM-DD"T"HH24:MI:SS"#),
    (r"^\d{2}/\d{2}/\d{4}$", "DD/MM/YYYY"),
    (r"^\d{2}/\d{2}/\d{4} \d{2}:\d{2}:\d{2}$", "DD/MM/YYYY HH24:MI:SS"),
    (r"^\d{2}-\d{2}-\d{4}$", "DD-MM-YYYY"),
    (r"^\d{2}-\d{2}-\d{4} \d{2}:\d{2}:\d{2}$", "DD-MM-YYYY HH24:MI:SS"),
    (r"^\d{2}-[A-Za-z]{3}-\d{4}$", "DD-MON-YYYY"),
];

static STANDARD: LazyLock<ValueCoercer> = LazyLock::new(|| {
    let dates = DEFAULT_DATE_FORMATS
        .iter()
        .map(|(pattern, mask)| DatePattern::new(pattern, mask).expect("valid regex"))
        .collect();
    ValueCoercer::new(DEFAULT_KEYWORDS.iter().copied(), dates)
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Database function used to convert a date literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFunction {
    ToDate,
    ToTimestamp,
}

impl DateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDate => "TO_DATE",
            Self::ToTimestamp => "TO_TIMESTAMP",
        }
    }

    /// Pick the function from the mask: any hour field means a timestamp.
    pub fn for_mask(mask: &str) -> Self {
        if mask.contains("HH") {
            Self::ToTimestamp
        } else {
            Self::ToDate
        }
    }
}

/// A textual date format recognized by the coercer.
#[derive(Debug, Clone)]
pub struct DatePattern {
    regex: Regex,
    mask: String,
    function: DateFunction,
}

impl DatePattern {
    pub fn new(pattern: &str, mask: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            mask: mask.to_string(),
            function: DateFunction::for_mask(mask),
        })
    }
}

/// The SQL form chosen for one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// Raw SQL fragment emitted verbatim, never bound.
    Keyword(String),
    /// Database-side conversion of a date literal.
    Date {
        literal: String,
        mask: String,
        function: DateFunction,
    },
    /// Ordinary bound parameter.
    Param(SqlValue),
}

impl Coerced {
    /// Emit the SQL text for this value, binding into `params` when needed.
    ///
    /// `cast` applies to bound parameters only; keyword and date fragments
    /// are already typed by the database.
    pub fn to_sql(self, params: &mut ParamList, cast: Option<&str>) -> String {
        match self {
            Self::Keyword(fragment) => fragment,
            Self::Date {
                literal,
                mask,
                function,
            } => format!(
                "{}({}, {})",
                function.as_str(),
                SqlValue::Text(literal).to_literal(),
                SqlValue::Text(mask).to_literal()
            ),
            Self::Param(value) => params.bind(value, cast),
        }
    }
}

// ---------------------------------------------------------------------------
// Coercer
// ---------------------------------------------------------------------------

/// Classifies values against a keyword table and a list of date patterns.
#[derive(Debug, Clone)]
pub struct ValueCoercer {
    keywords: BTreeMap<String, String>,
    dates: Vec<DatePattern>,
}

impl ValueCoercer {
    pub fn new<'a>(
        keywords: impl IntoIterator<Item = (&'a str, &'a str)>,
        dates: Vec<DatePattern>,
    ) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|(k, fragment)| (k.to_ascii_uppercase(), fragment.to_string()))
                .collect(),
            dates,
        }
    }

    /// The shared coercer built from [`DEFAULT_KEYWORDS`] and [`DEFAULT_DATE_FORMATS`].
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    pub fn coerce(&self, value: SqlValue) -> Coerced {
        let text = match &value {
            SqlValue::Text(text) => text.trim(),
            _ => return Coerced::Param(value),
        };

        if let Some(fragment) = self.keywords.get(&text.to_ascii_uppercase()) {
            return Coerced::Keyword(fragment.clone());
        }

        if let Some(pattern) = self.dates.iter().find(|p| p.regex.is_match(text)) {
            return Coerced::Date {
                literal: text.to_string(),
                mask: pattern.mask.clone(),
                function: pattern.function,
            };
        }

        Coerced::Param(value)
    }
}
