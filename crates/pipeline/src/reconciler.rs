//! Entity reconciler: decides between INSERT, UPDATE and no-op for one
//! entity of a row, and executes the chosen statement.
//!
//! Every INSERT/UPDATE is recorded in the row's [`AuditBuffer`] before it
//! is sent to the database. SELECTs are never audited.

use std::collections::BTreeMap;

use onboard_core::audit::AuditBuffer;
use onboard_core::changes::{ChangeSet, MutabilityPolicy};
use onboard_core::coercion::ValueCoercer;
use onboard_core::db::{Database, TableSchema};
use onboard_core::error::CoreError;
use onboard_core::row::extract_fields;
use onboard_core::sql::{validate_identifier, ParamList, SqlValue, Statement};
use onboard_core::types::{Operation, Outcome, Record, Row};

/// Database function used for server-set audit timestamps.
const CURRENT_TIME: &str = "CURRENT_TIMESTAMP";

/// One entity a row may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySpec {
    /// Human-readable name used in logs and summaries.
    pub label: &'static str,
    /// Row key prefix (`plaza` for `plaza.*` columns).
    pub prefix: &'static str,
    pub table: &'static str,
    pub primary_key: &'static [&'static str],
}

/// Audit timestamp columns filled on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditColumns {
    pub created: &'static str,
    pub modified: &'static str,
}

impl Default for AuditColumns {
    fn default() -> Self {
        Self {
            created: "created_ts",
            modified: "modified_ts",
        }
    }
}

/// Reconciles entities against one database session within one row's
/// transaction.
pub struct Reconciler<'a> {
    db: &'a mut dyn Database,
    audit: &'a mut AuditBuffer,
    policy: &'a MutabilityPolicy,
    audit_columns: AuditColumns,
    coercer: &'static ValueCoercer,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        db: &'a mut dyn Database,
        audit: &'a mut AuditBuffer,
        policy: &'a MutabilityPolicy,
        audit_columns: AuditColumns,
    ) -> Self {
        Self {
            db,
            audit,
            policy,
            audit_columns,
            coercer: ValueCoercer::standard(),
        }
    }

    /// Apply `operation` for `entity` using the fields of `row`.
    ///
    /// - INSERT on an existing key is skipped.
    /// - UPDATE on a missing key fails with [`CoreError::NotFound`].
    /// - UPDATE without detected changes is skipped.
    /// - UPDATE touching immutable fields fails unless `override_immutable`.
    pub async fn reconcile(
        &mut self,
        entity: &EntitySpec,
        row: &Row,
        operation: Operation,
        override_immutable: bool,
    ) -> Result<Outcome, CoreError> {
        let fields = extract_fields(row, entity.prefix);
        let key = primary_key(entity, &fields)?;
        let schema = self.schema_for(entity, &fields).await?;
        let key_label = key.iter().map(|(_, v)| v.as_str()).collect::<Vec<_>>().join("/");

        let current = self.fetch_current(entity, &schema, &key).await?;

        match operation {
            Operation::Insert => {
                if current.is_some() {
                    tracing::warn!(
                        entity = entity.label,
                        key = %key_label,
                        "{} {key_label} already exists, skipping INSERT",
                        entity.label
                    );
                    return Ok(Outcome::Skipped);
                }
                let statement = self.build_insert(entity, &schema, &fields);
                self.run(statement).await?;
                tracing::info!(entity = entity.label, key = %key_label, "Inserted {}", entity.label);
                Ok(Outcome::Inserted)
            }
            Operation::Update => {
                let current = current.ok_or_else(|| CoreError::NotFound {
                    entity: entity.label.to_string(),
                    key: key_label.clone(),
                })?;

                let changes = ChangeSet::detect(&current, &fields, self.policy.mutable_fields(entity.table));
                if changes.is_empty() {
                    tracing::info!(entity = entity.label, key = %key_label, "No changes detected");
                    return Ok(Outcome::Skipped);
                }
                changes.enforce(entity.label, override_immutable)?;

                let changed: Vec<&str> = changes.iter().map(|(f, _)| f.as_str()).collect();
                let statement = self.build_update(entity, &schema, &changes, &key);
                self.run(statement).await?;
                tracing::info!(
                    entity = entity.label,
                    key = %key_label,
                    fields = ?changed,
                    "Updated {}",
                    entity.label
                );
                Ok(Outcome::Updated)
            }
        }
    }

    /// Load and check the table schema against every submitted column.
    async fn schema_for(
        &mut self,
        entity: &EntitySpec,
        fields: &BTreeMap<String, String>,
    ) -> Result<TableSchema, CoreError> {
        validate_identifier(entity.table)?;
        let schema = self.db.describe_table(entity.table).await?;
        if schema.is_empty() {
            return Err(CoreError::Validation(format!(
                "Table {} does not exist",
                entity.table
            )));
        }
        for column in fields.keys() {
            validate_identifier(column)?;
            schema.require_column(column)?;
        }
        Ok(schema)
    }

    async fn fetch_current(
        &mut self,
        entity: &EntitySpec,
        schema: &TableSchema,
        key: &[(&str, String)],
    ) -> Result<Option<Record>, CoreError> {
        let mut params = ParamList::new();
        let predicate = where_clause(schema, key, &mut params);
        let statement = params.into_statement(format!(
            "SELECT * FROM {} WHERE {predicate}",
            entity.table
        ));
        self.db.query_one(&statement.sql, &statement.params).await
    }

    fn build_insert(
        &self,
        entity: &EntitySpec,
        schema: &TableSchema,
        fields: &BTreeMap<String, String>,
    ) -> Statement {
        let mut params = ParamList::new();
        let mut columns = Vec::with_capacity(fields.len() + 2);
        let mut values = Vec::with_capacity(fields.len() + 2);

        for (column, value) in fields {
            let cast = schema.cast_for(column);
            // Keys are bound as submitted so the existence check matches them.
            let value = if entity.primary_key.contains(&column.as_str()) {
                params.bind(SqlValue::from(value.as_str()), cast)
            } else {
                self.coercer.coerce(SqlValue::from(value.as_str())).to_sql(&mut params, cast)
            };
            values.push(value);
            columns.push(column.as_str());
        }
        for audit_column in [self.audit_columns.created, self.audit_columns.modified] {
            if !fields.contains_key(audit_column) {
                columns.push(audit_column);
                values.push(CURRENT_TIME.to_string());
            }
        }

        params.into_statement(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            entity.table,
            columns.join(", "),
            values.join(", ")
        ))
    }

    /// SET values are bound first, primary-key values last.
    fn build_update(
        &self,
        entity: &EntitySpec,
        schema: &TableSchema,
        changes: &ChangeSet,
        key: &[(&str, String)],
    ) -> Statement {
        let mut params = ParamList::new();
        let mut assignments: Vec<String> = changes
            .iter()
            .map(|(column, change)| {
                let value = self
                    .coercer
                    .coerce(SqlValue::from(change.new_value.as_str()))
                    .to_sql(&mut params, schema.cast_for(column));
                format!("{column} = {value}")
            })
            .collect();

        let modified = self.audit_columns.modified;
        if !changes.iter().any(|(column, _)| column == modified) {
            assignments.push(format!("{modified} = {CURRENT_TIME}"));
        }

        let predicate = where_clause(schema, key, &mut params);
        params.into_statement(format!(
            "UPDATE {} SET {} WHERE {predicate}",
            entity.table,
            assignments.join(", ")
        ))
    }

    async fn run(&mut self, statement: Statement) -> Result<u64, CoreError> {
        self.audit.record(statement.clone());
        tracing::debug!(sql = %statement.render(), "Executing statement");
        self.db.execute(&statement.sql, &statement.params).await
    }
}

/// Primary-key values in declared order; fails naming every missing field.
fn primary_key<'e>(
    entity: &'e EntitySpec,
    fields: &BTreeMap<String, String>,
) -> Result<Vec<(&'e str, String)>, CoreError> {
    let missing: Vec<String> = entity
        .primary_key
        .iter()
        .filter(|k| !fields.contains_key(**k))
        .map(|k| format!("{}.{k}", entity.prefix))
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::Validation(format!(
            "Missing primary key for {}: {} required",
            entity.label,
            missing.join(", ")
        )));
    }
    Ok(entity
        .primary_key
        .iter()
        .map(|k| (*k, fields[*k].clone()))
        .collect())
}

fn where_clause(schema: &TableSchema, key: &[(&str, String)], params: &mut ParamList) -> String {
    key.iter()
        .map(|(column, value)| {
            let placeholder = params.bind(SqlValue::from(value.as_str()), schema.cast_for(column));
            format!("{column} = {placeholder}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
