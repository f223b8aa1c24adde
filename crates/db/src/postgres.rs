//! PostgreSQL implementation of [`Database`] over one long-lived connection.
//!
//! Arbitrary result rows are decoded by wrapping the query so the server
//! returns each row as a JSON object of text values. Column names come back
//! lowercase.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions};
use sqlx::{Arguments, Connection, PgConnection};

use onboard_core::credentials::Credentials;
use onboard_core::db::{Database, TableSchema};
use onboard_core::error::CoreError;
use onboard_core::sql::SqlValue;
use onboard_core::types::Record;

use crate::error::classify_sqlx_error;

/// Lists the columns of a table in the current schema.
const DESCRIBE_TABLE_SQL: &str = "\
    SELECT column_name::text, udt_name::text \
    FROM information_schema.columns \
    WHERE table_schema = current_schema() AND table_name = lower($1) \
    ORDER BY ordinal_position";

/// A lazily connected session bound to one set of credentials.
pub struct PgDatabase {
    options: PgConnectOptions,
    conn: Option<PgConnection>,
    schemas: HashMap<String, TableSchema>,
}

impl PgDatabase {
    /// Build a session for `credentials`. Nothing connects until first use.
    ///
    /// `statement_timeout` bounds every statement server-side.
    pub fn new(credentials: &Credentials, statement_timeout: Option<Duration>) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&credentials.host)
            .port(credentials.port)
            .database(&credentials.database)
            .username(&credentials.username)
            .password(&credentials.password)
            .application_name("onboard-worker");
        if let Some(timeout) = statement_timeout {
            options = options.options([("statement_timeout", format!("{}", timeout.as_millis()))]);
        }
        Self::with_options(options)
    }

    pub fn with_options(options: PgConnectOptions) -> Self {
        Self {
            options,
            conn: None,
            schemas: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Verify the database is reachable.
    pub async fn health_check(&mut self) -> Result<(), CoreError> {
        let conn = self.connection().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    async fn connection(&mut self) -> Result<&mut PgConnection, CoreError> {
        if self.conn.is_none() {
            let conn = PgConnection::connect_with(&self.options)
                .await
                .map_err(|e| CoreError::Infrastructure(format!("Database connect failed: {e}")))?;
            tracing::info!(host = self.options.get_host(), "Database connection established");
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| CoreError::Infrastructure("Database connection unavailable".into()))
    }

    async fn run(&mut self, sql: &'static str) -> Result<(), CoreError> {
        let conn = self.connection().await?;
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&mut self) -> Result<(), CoreError> {
        self.run("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        self.run("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), CoreError> {
        self.run("ROLLBACK").await
    }

    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>, CoreError> {
        let wrapped = wrap_as_json(sql);
        let args = arguments(params)?;
        let conn = self.connection().await?;
        let rows: Vec<(Option<String>,)> = sqlx::query_as_with(&wrapped, args)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;

        rows.into_iter()
            .map(|(json,)| decode_record(json.as_deref().unwrap_or("{}")))
            .collect()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, CoreError> {
        let args = arguments(params)?;
        let conn = self.connection().await?;
        let result = sqlx::query_with(sql, args)
            .execute(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        Ok(result.rows_affected())
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, CoreError> {
        let key = table.to_ascii_uppercase();
        if let Some(schema) = self.schemas.get(&key) {
            return Ok(schema.clone());
        }

        let conn = self.connection().await?;
        let columns: Vec<(String, String)> = sqlx::query_as(DESCRIBE_TABLE_SQL)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;

        let schema = TableSchema::new(table, columns);
        if !schema.is_empty() {
            self.schemas.insert(key, schema.clone());
        }
        Ok(schema)
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| CoreError::Infrastructure(format!("Database close failed: {e}")))?;
            tracing::debug!("Database connection closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn wrap_as_json(sql: &str) -> String {
    format!(
        "SELECT (SELECT jsonb_object_agg(key, value) FROM jsonb_each_text(to_jsonb(q)))::text \
         FROM ({sql}) q"
    )
}

fn decode_record(json: &str) -> Result<Record, CoreError> {
    let record: BTreeMap<String, Option<String>> = serde_json::from_str(json)
        .map_err(|e| CoreError::Rejected(format!("Cannot decode result row: {e}")))?;
    Ok(record
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect())
}

fn arguments(params: &[SqlValue]) -> Result<PgArguments, CoreError> {
    let mut args = PgArguments::default();
    for param in params {
        let added = match param {
            SqlValue::Null => args.add(None::<String>),
            SqlValue::Text(s) => args.add(s.clone()),
            SqlValue::Integer(i) => args.add(*i),
            SqlValue::Float(f) => args.add(*f),
            SqlValue::Bool(b) => args.add(*b),
        };
        added.map_err(|e| CoreError::Rejected(format!("Cannot bind parameter: {e}")))?;
    }
    Ok(args)
}
