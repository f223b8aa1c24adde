//! Database collaborator interface.
//!
//! The pipeline talks to the database only through [`Database`]. One
//! implementation wraps a long-lived PostgreSQL connection; tests use an
//! in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::sql::SqlValue;
use crate::types::Record;

/// Column types that bind as plain text and need no placeholder cast.
const TEXT_TYPES: &[&str] = &["text", "varchar", "bpchar", "name", "character varying", "character"];

/// Column names and their database type names for one table.
///
/// Column names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    columns: BTreeMap<String, String>,
}

impl TableSchema {
    pub fn new<I, C, T>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: Into<String>,
        T: Into<String>,
    {
        Self {
            table: table.to_string(),
            columns: columns
                .into_iter()
                .map(|(c, t)| (c.into().to_ascii_lowercase(), t.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(&column.to_ascii_lowercase())
    }

    pub fn column_type(&self, column: &str) -> Option<&str> {
        self.columns
            .get(&column.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Placeholder cast for `column`, `None` for text-like or unknown columns.
    pub fn cast_for(&self, column: &str) -> Option<&str> {
        self.column_type(column)
            .filter(|ty| !TEXT_TYPES.contains(&ty.to_ascii_lowercase().as_str()))
    }

    /// Fail when `column` is not part of the table.
    pub fn require_column(&self, column: &str) -> Result<(), CoreError> {
        if self.has_column(column) {
            return Ok(());
        }
        Err(CoreError::Validation(format!(
            "Unknown column '{column}' for table {}",
            self.table
        )))
    }
}

/// A transactional database session.
///
/// Statements use `$n` placeholders. Implementations map driver errors
/// into [`CoreError`]: statement-level rejections become
/// [`CoreError::Rejected`], connection and protocol failures
/// [`CoreError::Infrastructure`].
#[async_trait]
pub trait Database: Send {
    async fn begin(&mut self) -> Result<(), CoreError>;
    async fn commit(&mut self) -> Result<(), CoreError>;
    async fn rollback(&mut self) -> Result<(), CoreError>;

    /// Run a query and decode every returned row into a [`Record`].
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>, CoreError>;

    /// First row of a query, if any.
    async fn query_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Record>, CoreError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Execute a write statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, CoreError>;

    /// Columns of `table`. An empty schema means the table does not exist.
    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, CoreError>;

    /// Release the session. Later calls may reconnect.
    async fn close(&mut self) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            "NETCACQ_PLAZA_DTLS",
            [
                ("PLAZA_ID", "varchar"),
                ("lane_count", "int4"),
                ("created_ts", "timestamp"),
                ("code", "bpchar"),
            ],
        )
    }

    #[test]
    fn columns_are_case_insensitive() {
        let s = schema();
        assert!(s.has_column("plaza_id"));
        assert!(s.has_column("LANE_COUNT"));
        assert!(!s.has_column("missing"));
    }

    #[test]
    fn casts_only_non_text_columns() {
        let s = schema();
        assert_eq!(s.cast_for("lane_count"), Some("int4"));
        assert_eq!(s.cast_for("created_ts"), Some("timestamp"));
        assert_eq!(s.cast_for("plaza_id"), None);
        assert_eq!(s.cast_for("code"), None);
        assert_eq!(s.cast_for("missing"), None);
    }

    #[test]
    fn require_column_names_table() {
        let err = schema().require_column("name; drop").unwrap_err();
        assert!(err.to_string().contains("NETCACQ_PLAZA_DTLS"));
    }
}
