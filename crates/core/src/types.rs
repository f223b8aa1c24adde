use std::collections::BTreeMap;

use serde::Serialize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// One CSV line: dotted `<meta|entity-prefix>.<field>` header → raw cell text.
pub type Row = BTreeMap<String, String>;

/// A record fetched from the database: column name → text value (`None` for SQL NULL).
pub type Record = BTreeMap<String, Option<String>>;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Requested write operation for a row, taken from `meta.operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
        }
    }

    /// Parse an operation name. Matching is case-insensitive and ignores
    /// surrounding whitespace. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            _ => None,
        }
    }

    pub const ALL: &'static [&'static str] = &["INSERT", "UPDATE"];
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of reconciling one entity of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Inserted,
    Updated,
    /// Idempotent no-op: INSERT on an existing key, or UPDATE without changes.
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-row tally of entity outcomes, grouped by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowSummary {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

impl RowSummary {
    pub fn record(&mut self, label: &str, outcome: Outcome) {
        let bucket = match outcome {
            Outcome::Inserted => &mut self.inserted,
            Outcome::Updated => &mut self.updated,
            Outcome::Skipped => &mut self.skipped,
        };
        bucket.push(label.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.skipped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// File status
// ---------------------------------------------------------------------------

/// Terminal status of a processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Every row succeeded; file lands in `processed`.
    Processed,
    /// At least one row succeeded and at least one failed; file lands in `processed`.
    PartiallySucceeded,
    /// No row succeeded, or the file itself could not be processed; file lands in `failed`.
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
        }
    }

    /// Derive the terminal status from the row tallies.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => Self::Failed,
            (_, 0) => Self::Processed,
            _ => Self::PartiallySucceeded,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Operation tests ------------------------------------------------------

    #[test]
    fn operation_round_trip() {
        for s in Operation::ALL {
            let op = Operation::parse(s).unwrap();
            assert_eq!(op.as_str(), *s);
        }
    }

    #[test]
    fn operation_parse_is_lenient_about_case_and_space() {
        assert_eq!(Operation::parse(" update "), Some(Operation::Update));
        assert_eq!(Operation::parse("Insert"), Some(Operation::Insert));
    }

    #[test]
    fn operation_unknown_returns_none() {
        assert!(Operation::parse("DELETE").is_none());
        assert!(Operation::parse("").is_none());
    }

    // -- RowSummary tests -----------------------------------------------------

    #[test]
    fn summary_buckets_by_outcome() {
        let mut summary = RowSummary::default();
        assert!(summary.is_empty());
        summary.record("plaza", Outcome::Inserted);
        summary.record("lane", Outcome::Skipped);
        summary.record("fare", Outcome::Updated);
        assert_eq!(summary.inserted, vec!["plaza"]);
        assert_eq!(summary.updated, vec!["fare"]);
        assert_eq!(summary.skipped, vec!["lane"]);
    }

    // -- FileStatus tests -----------------------------------------------------

    #[test]
    fn status_from_counts() {
        assert_eq!(FileStatus::from_counts(3, 0), FileStatus::Processed);
        assert_eq!(FileStatus::from_counts(2, 1), FileStatus::PartiallySucceeded);
        assert_eq!(FileStatus::from_counts(0, 4), FileStatus::Failed);
        assert_eq!(FileStatus::from_counts(0, 0), FileStatus::Failed);
    }

    #[test]
    fn status_display() {
        assert_eq!(FileStatus::PartiallySucceeded.to_string(), "partially_succeeded");
    }
}
