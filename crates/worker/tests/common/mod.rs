//! A permissive in-memory database: every table exists with the plaza
//! columns, lookups find nothing, writes succeed.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use onboard_core::db::{Database, TableSchema};
use onboard_core::error::CoreError;
use onboard_core::sql::SqlValue;
use onboard_core::types::Record;

#[derive(Clone, Default)]
pub struct AcceptingDb {
    pub executed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Database for AcceptingDb {
    async fn begin(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<Record>, CoreError> {
        Ok(Vec::new())
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<u64, CoreError> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(1)
    }

    async fn describe_table(&mut self, table: &str) -> Result<TableSchema, CoreError> {
        Ok(TableSchema::new(
            table,
            [
                ("plaza_id", "varchar"),
                ("name", "varchar"),
                ("created_ts", "timestamp"),
                ("modified_ts", "timestamp"),
            ],
        ))
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        Ok(())
    }
}
