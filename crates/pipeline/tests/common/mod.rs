//! Shared fixtures: an in-memory `Database` and a product harness rooted in
//! a temporary directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use onboard_core::db::{Database, TableSchema};
use onboard_core::error::CoreError;
use onboard_core::sql::SqlValue;
use onboard_core::types::Record;
use onboard_pipeline::processor::PipelineOptions;
use onboard_pipeline::registry::{instantiate_one, PluginSettings, ProductHandle, Registry};

pub const PRODUCT: &str = "FASTAG_ACQ";

pub const CSV_HEADER: &str =
    "meta.product,meta.submitted_by,meta.jira,meta.operation,meta.override,plaza.plaza_id,plaza.name,plaza.type,plaza.modified_ts";

// ---------------------------------------------------------------------------
// In-memory database
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeState {
    pub schemas: HashMap<String, TableSchema>,
    pub tables: HashMap<String, Vec<Record>>,
    snapshot: Option<HashMap<String, Vec<Record>>>,
    /// Every executed write, as sent.
    pub executed: Vec<String>,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub closes: usize,
    /// Writes touching this table fail as if the connection dropped.
    pub fail_table: Option<String>,
    /// Writes touching this table stall for the given duration.
    pub delay_table: Option<(String, Duration)>,
}

/// Cloneable handle; clones share state so tests can inspect it after the
/// pipeline has taken ownership of one.
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDb {
    /// A database holding the FASTag tables.
    pub fn fastag() -> Self {
        let db = Self::default();
        {
            let mut s = db.state();
            for (table, columns) in fastag_tables() {
                s.schemas.insert(table.to_string(), TableSchema::new(table, columns.iter().copied()));
                s.tables.insert(table.to_string(), Vec::new());
            }
        }
        db
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn seed(&self, table: &str, values: &[(&str, &str)]) {
        let record: Record = values
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect();
        self.state().tables.entry(table.to_string()).or_default().push(record);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn executed_starting_with(&self, prefix: &str) -> usize {
        self.state()
            .executed
            .iter()
            .filter(|sql| sql.starts_with(prefix))
            .count()
    }
}

fn fastag_tables() -> Vec<(&'static str, Vec<(&'static str, &'static str)>)> {
    let audit = [("created_ts", "timestamp"), ("modified_ts", "timestamp")];
    let with_audit = |cols: &[(&'static str, &'static str)]| {
        let mut v = cols.to_vec();
        v.extend_from_slice(&audit);
        v
    };
    vec![
        (
            "NETCACQ_PLAZA_DTLS",
            with_audit(&[
                ("plaza_id", "varchar"),
                ("name", "varchar"),
                ("type", "varchar"),
                ("state", "varchar"),
            ]),
        ),
        (
            "NETCACQ_PLAZA_CONCESSION_DTLS",
            with_audit(&[
                ("concessionaire_id", "varchar"),
                ("plaza_id", "varchar"),
                ("name", "varchar"),
            ]),
        ),
        (
            "NETCACQ_PLAZA_LANE_DTLS",
            with_audit(&[
                ("plaza_id", "varchar"),
                ("lane_id", "varchar"),
                ("direction", "varchar"),
            ]),
        ),
        (
            "NETCACQ_PLAZA_FARE_DTLS",
            with_audit(&[
                ("fare_id", "varchar"),
                ("plaza_id", "varchar"),
                ("amount", "numeric"),
                ("effective_date", "date"),
            ]),
        ),
        (
            "NETCACQ_VHCLCLASS_MAPPING_DTLS",
            with_audit(&[
                ("plaza_id", "varchar"),
                ("mvc_id", "varchar"),
                ("vehicle_class", "varchar"),
            ]),
        ),
        (
            "NETCACQ_USER_ROLE_MAPPING_DTLS",
            with_audit(&[("user_id", "varchar"), ("role", "varchar")]),
        ),
    ]
}

#[async_trait]
impl Database for FakeDb {
    async fn begin(&mut self) -> Result<(), CoreError> {
        let mut s = self.state();
        s.snapshot = Some(s.tables.clone());
        s.begins += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        let mut s = self.state();
        s.snapshot = None;
        s.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), CoreError> {
        let mut s = self.state();
        if let Some(snapshot) = s.snapshot.take() {
            s.tables = snapshot;
        }
        s.rollbacks += 1;
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>, CoreError> {
        let rest = sql
            .strip_prefix("SELECT * FROM ")
            .ok_or_else(|| CoreError::Rejected(format!("unsupported query: {sql}")))?;
        let (table, predicate) = rest
            .split_once(" WHERE ")
            .ok_or_else(|| CoreError::Rejected(format!("unsupported query: {sql}")))?;
        let conditions = parse_conditions(predicate, params)?;

        let s = self.state();
        Ok(s.tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| matches_all(r, &conditions))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, CoreError> {
        let delay = {
            let mut s = self.state();
            s.executed.push(sql.to_string());
            if let Some(table) = &s.fail_table {
                if sql.contains(table.as_str()) {
                    return Err(CoreError::Infrastructure("connection reset by peer".into()));
                }
            }
            s.delay_table
                .as_ref()
                .filter(|(table, _)| sql.contains(table.as_str()))
                .map(|(_, d)| *d)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            return self.insert(rest, params);
        }
        if let Some(rest) = sql.strip_prefix("UPDATE ") {
            return self.update(rest, params);
        }
        Err(CoreError::Rejected(format!("unsupported statement: {sql}")))
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, CoreError> {
        Ok(self
            .state()
            .schemas
            .get(&table.to_ascii_uppercase())
            .cloned()
            .unwrap_or_else(|| TableSchema::new(table, std::iter::empty::<(String, String)>())))
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        self.state().closes += 1;
        Ok(())
    }
}

impl FakeDb {
    fn insert(&self, rest: &str, params: &[SqlValue]) -> Result<u64, CoreError> {
        let (table, rest) = rest
            .split_once(" (")
            .ok_or_else(|| CoreError::Rejected("malformed INSERT".into()))?;
        let (columns, values) = rest
            .split_once(") VALUES (")
            .ok_or_else(|| CoreError::Rejected("malformed INSERT".into()))?;
        let values = values
            .strip_suffix(')')
            .ok_or_else(|| CoreError::Rejected("malformed INSERT".into()))?;

        let columns: Vec<&str> = columns.split(", ").collect();
        let values = split_top_level(values);
        if columns.len() != values.len() {
            return Err(CoreError::Rejected("column/value count mismatch".into()));
        }
        let record: Record = columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| (c.to_string(), resolve(v, params)))
            .collect();

        self.state().tables.entry(table.to_string()).or_default().push(record);
        Ok(1)
    }

    fn update(&self, rest: &str, params: &[SqlValue]) -> Result<u64, CoreError> {
        let (table, rest) = rest
            .split_once(" SET ")
            .ok_or_else(|| CoreError::Rejected("malformed UPDATE".into()))?;
        let (assignments, predicate) = rest
            .split_once(" WHERE ")
            .ok_or_else(|| CoreError::Rejected("malformed UPDATE".into()))?;
        let conditions = parse_conditions(predicate, params)?;
        let assignments: Vec<(String, Option<String>)> = split_top_level(assignments)
            .iter()
            .filter_map(|a| a.split_once(" = "))
            .map(|(c, v)| (c.to_string(), resolve(v, params)))
            .collect();

        let mut s = self.state();
        let mut affected = 0;
        for record in s.tables.entry(table.to_string()).or_default() {
            if matches_all(record, &conditions) {
                for (column, value) in &assignments {
                    record.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }
}

fn parse_conditions(
    predicate: &str,
    params: &[SqlValue],
) -> Result<Vec<(String, Option<String>)>, CoreError> {
    predicate
        .split(" AND ")
        .map(|cond| {
            let (column, value) = cond
                .split_once(" = ")
                .ok_or_else(|| CoreError::Rejected(format!("malformed condition: {cond}")))?;
            Ok((column.to_string(), resolve(value, params)))
        })
        .collect()
}

fn matches_all(record: &Record, conditions: &[(String, Option<String>)]) -> bool {
    conditions
        .iter()
        .all(|(column, value)| record.get(column).cloned().flatten() == *value)
}

/// Placeholders (`$2`, `$2::numeric`) resolve to their parameter; any other
/// expression is stored verbatim.
fn resolve(expr: &str, params: &[SqlValue]) -> Option<String> {
    let expr = expr.trim();
    let Some(rest) = expr.strip_prefix('$') else {
        return Some(expr.to_string());
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let idx: usize = digits.parse().ok()?;
    match params.get(idx - 1)? {
        SqlValue::Null => None,
        SqlValue::Text(s) => Some(s.clone()),
        other => Some(other.to_literal()),
    }
}

/// Split on commas outside parentheses and quotes.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    for c in s.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            ',' if !in_quote && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A registry with the FASTag product on a fake database, rooted in a
/// temporary directory.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub registry: Registry,
    pub db: FakeDb,
    pub options: PipelineOptions,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(PluginSettings::default()).await
    }

    pub async fn with_settings(settings: PluginSettings) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let db = FakeDb::fastag();
        let mut registry = Registry::new(tmp.path().join("products"));
        let plugin = instantiate_one(PRODUCT, &settings).unwrap();
        registry.register(plugin, Box::new(db.clone())).await.unwrap();
        let options = PipelineOptions {
            sql_dir: tmp.path().join("sqlqueries"),
            row_timeout: Some(Duration::from_secs(5)),
        };
        Self {
            tmp,
            registry,
            db,
            options,
        }
    }

    pub fn handle(&mut self) -> &mut ProductHandle {
        self.registry.get_mut(PRODUCT).unwrap()
    }

    /// Write `contents` into the inbox and return its path.
    pub fn submit(&mut self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.handle().paths.inbox.join(file_name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn location_of(&mut self, file_name: &str) -> Vec<&'static str> {
        let paths = self.handle().paths.clone();
        [
            ("inbox", &paths.inbox),
            ("processing", &paths.processing),
            ("processed", &paths.processed),
            ("failed", &paths.failed),
        ]
        .into_iter()
        .filter(|(_, dir)| dir.join(file_name).exists())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn sql_artifacts(&self) -> Vec<PathBuf> {
        read_dir_sorted(&self.options.sql_dir)
    }
}

pub fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

/// One CSV line under [`CSV_HEADER`].
pub fn plaza_line(operation: &str, ticket: &str, plaza_id: &str, name: &str) -> String {
    format!("{PRODUCT},olm_id,{ticket},{operation},,{plaza_id},{name},,")
}

pub fn csv(lines: &[String]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
