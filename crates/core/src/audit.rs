//! SQL audit trail: statements captured during a row, grouped per ticket
//! across a file, and rendered into one text artifact per ticket.

use std::collections::BTreeMap;
use std::path::Path;

use crate::sql::Statement;

/// Separator line between artifact sections.
pub const SECTION_SEPARATOR_WIDTH: usize = 80;

// ---------------------------------------------------------------------------
// Row buffer
// ---------------------------------------------------------------------------

/// Write statements executed during the current row.
///
/// Reset at the start of every row; drained into the file's
/// [`TicketAudit`] only when the row commits.
#[derive(Debug, Default)]
pub struct AuditBuffer {
    statements: Vec<Statement>,
}

impl AuditBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn reset(&mut self) {
        self.statements.clear();
    }

    /// Remove and return every buffered statement.
    pub fn take(&mut self) -> Vec<Statement> {
        std::mem::take(&mut self.statements)
    }
}

// ---------------------------------------------------------------------------
// File-level grouping
// ---------------------------------------------------------------------------

/// Committed statements of one file, grouped by ticket id in execution order.
#[derive(Debug, Default)]
pub struct TicketAudit {
    tickets: BTreeMap<String, Vec<Statement>>,
}

impl TicketAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, ticket: &str, statements: Vec<Statement>) {
        if statements.is_empty() {
            return;
        }
        self.tickets
            .entry(ticket.to_string())
            .or_default()
            .extend(statements);
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Total statements across all tickets.
    pub fn statement_count(&self) -> usize {
        self.tickets.values().map(Vec::len).sum()
    }

    pub fn tickets(&self) -> impl Iterator<Item = (&str, &[Statement])> {
        self.tickets
            .iter()
            .map(|(ticket, statements)| (ticket.as_str(), statements.as_slice()))
    }
}

// ---------------------------------------------------------------------------
// Artifact rendering
// ---------------------------------------------------------------------------

/// Artifact filename for a ticket: `{ticket}_{csv stem}.sql`.
pub fn artifact_file_name(ticket: &str, source_file: &Path) -> String {
    let stem = source_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{ticket}_{stem}.sql")
}

/// Render the artifact text for one ticket.
///
/// A header block (ticket, source file, statement count) is followed by
/// every statement with its parameters substituted, numbered from 1.
pub fn render_artifact(ticket: &str, source_name: &str, statements: &[Statement]) -> String {
    let separator = "=".repeat(SECTION_SEPARATOR_WIDTH);
    let mut out = format!(
        "Ticket: {ticket}\nSource File: {source_name}\nTotal Statements: {}\n{separator}\n\n",
        statements.len()
    );
    for (idx, statement) in statements.iter().enumerate() {
        out.push_str(&format!(
            "Statement {}:\n{};\n\n{separator}\n\n",
            idx + 1,
            statement.render()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlValue;

    fn stmt(sql: &str, params: &[&str]) -> Statement {
        Statement::new(sql, params.iter().map(|p| SqlValue::from(*p)).collect())
    }

    // -- AuditBuffer tests ----------------------------------------------------

    #[test]
    fn take_drains_buffer() {
        let mut buf = AuditBuffer::new();
        buf.record(stmt("INSERT INTO t (a) VALUES ($1)", &["x"]));
        let taken = buf.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].sql, "INSERT INTO t (a) VALUES ($1)");
        assert!(buf.take().is_empty());
    }

    #[test]
    fn reset_discards_uncommitted_statements() {
        let mut buf = AuditBuffer::new();
        buf.record(stmt("x", &[]));
        buf.reset();
        assert!(buf.take().is_empty());
    }

    // -- TicketAudit tests ----------------------------------------------------

    #[test]
    fn groups_by_ticket_in_order() {
        let mut audit = TicketAudit::new();
        audit.extend("APB-1", vec![stmt("a", &[])]);
        audit.extend("APB-2", vec![stmt("b", &[])]);
        audit.extend("APB-1", vec![stmt("c", &[])]);
        audit.extend("APB-3", vec![]);

        assert_eq!(audit.statement_count(), 3);
        let tickets: Vec<_> = audit.tickets().collect();
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].0, "APB-1");
        let sqls: Vec<_> = tickets[0].1.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(sqls, vec!["a", "c"]);
    }

    // -- rendering tests ------------------------------------------------------

    #[test]
    fn artifact_name_uses_csv_stem() {
        let name = artifact_file_name("APB-7", Path::new("/x/processing/olm_FASTAG_ACQ_20250101.csv"));
        assert_eq!(name, "APB-7_olm_FASTAG_ACQ_20250101.sql");
    }

    #[test]
    fn artifact_has_header_and_numbered_statements() {
        let text = render_artifact(
            "APB-7",
            "f.csv",
            &[
                stmt("INSERT INTO t (a) VALUES ($1)", &["O'Neil"]),
                stmt("UPDATE t SET a = $1 WHERE id = $2", &["b", "1"]),
            ],
        );
        assert!(text.starts_with("Ticket: APB-7\nSource File: f.csv\nTotal Statements: 2\n"));
        assert!(text.contains("Statement 1:\nINSERT INTO t (a) VALUES ('O''Neil');"));
        assert!(text.contains("Statement 2:\nUPDATE t SET a = 'b' WHERE id = '1';"));
    }
}
