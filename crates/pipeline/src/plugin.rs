//! Product plugin capability interface.
//!
//! A product bundles its entity layout, mutability rules, metadata rules
//! and cross-entity structural checks. The file pipeline drives every row
//! through [`ProductPlugin::process`].

use async_trait::async_trait;

use onboard_core::changes::MutabilityPolicy;
use onboard_core::error::CoreError;
use onboard_core::metadata::Metadata;
use onboard_core::row::has_fields;
use onboard_core::types::{Row, RowSummary};

use crate::reconciler::{AuditColumns, EntitySpec, Reconciler};

/// Static identity of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductDescriptor {
    /// Code carried in filenames and `meta.product`, e.g. `FASTAG_ACQ`.
    pub code: &'static str,
    /// Directory name under the base directory.
    pub folder: &'static str,
    pub display_name: &'static str,
}

/// Where a product's files live on the remote transfer endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub root: String,
}

impl RemoteEndpoint {
    pub fn inbox(&self) -> String {
        format!("{}/inbox", self.root)
    }

    pub fn processing(&self) -> String {
        format!("{}/processing", self.root)
    }

    pub fn processed(&self) -> String {
        format!("{}/processed", self.root)
    }

    pub fn failed(&self) -> String {
        format!("{}/failed", self.root)
    }
}

#[async_trait]
pub trait ProductPlugin: Send + Sync {
    fn descriptor(&self) -> &ProductDescriptor;

    /// Entities in processing order.
    fn entities(&self) -> &[EntitySpec];

    fn mutability(&self) -> &MutabilityPolicy;

    fn audit_columns(&self) -> AuditColumns {
        AuditColumns::default()
    }

    /// Remote endpoint for this product, `None` when not configured.
    fn remote_endpoint(&self) -> Option<RemoteEndpoint>;

    /// Product rules for row metadata (ticket format, submitter allow-list).
    fn validate_metadata(&self, metadata: &Metadata) -> Result<(), CoreError>;

    /// Cross-entity requirements checked before any entity is written.
    fn validate_structure(&self, row: &Row) -> Result<(), CoreError>;

    /// Apply one row: metadata rules, structural rules, then every entity
    /// present in the row, in declared order.
    async fn process(
        &self,
        reconciler: &mut Reconciler<'_>,
        row: &Row,
        metadata: &Metadata,
    ) -> Result<RowSummary, CoreError> {
        self.validate_metadata(metadata)?;
        self.validate_structure(row)?;

        tracing::info!(
            ticket = %metadata.ticket_id,
            operation = %metadata.operation,
            override_immutable = metadata.override_immutable,
            "Processing row"
        );

        let mut summary = RowSummary::default();
        for entity in self.entities() {
            if !has_fields(row, entity.prefix) {
                continue;
            }
            let outcome = reconciler
                .reconcile(entity, row, metadata.operation, metadata.override_immutable)
                .await?;
            summary.record(entity.label, outcome);
        }

        if !summary.inserted.is_empty() {
            tracing::info!(entities = ?summary.inserted, "Entities inserted");
        }
        if !summary.skipped.is_empty() {
            tracing::warn!(entities = ?summary.skipped, "Entities skipped");
        }
        if !summary.updated.is_empty() {
            tracing::info!(entities = ?summary.updated, "Entities updated");
        }
        Ok(summary)
    }
}
