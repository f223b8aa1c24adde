//! Row metadata: the `meta.*` columns every CSV row carries.
//!
//! Extraction checks presence of the required fields and parses the
//! operation. Product-specific rules (ticket format, submitter allow-list)
//! are applied afterwards through [`MetadataRules`].

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;
use crate::row::get_trimmed;
use crate::types::{Operation, Row};

// ---------------------------------------------------------------------------
// Column names
// ---------------------------------------------------------------------------

pub const META_PRODUCT: &str = "meta.product";
pub const META_SUBMITTED_BY: &str = "meta.submitted_by";
pub const META_TICKET: &str = "meta.jira";
pub const META_OPERATION: &str = "meta.operation";
pub const META_OVERRIDE: &str = "meta.override";

/// Required metadata columns, in the order they are checked.
pub const REQUIRED_COLUMNS: &[&str] = &[META_PRODUCT, META_SUBMITTED_BY, META_TICKET, META_OPERATION];

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Validated metadata of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub product: String,
    pub submitted_by: String,
    pub ticket_id: String,
    pub operation: Operation,
    /// Permit changes to fields outside the table's mutable set.
    pub override_immutable: bool,
}

/// Extract metadata from a row.
///
/// Fails with a validation error naming the first missing required column,
/// or when `meta.operation` is not a recognized operation. `meta.override`
/// is optional and only the (case-insensitive) value `true` enables it.
pub fn extract_metadata(row: &Row) -> Result<Metadata, CoreError> {
    for column in REQUIRED_COLUMNS {
        if get_trimmed(row, column).is_none() {
            return Err(CoreError::Validation(format!(
                "Missing required metadata: {column}"
            )));
        }
    }

    let field = |column: &str| get_trimmed(row, column).unwrap_or_default().to_string();

    let raw_operation = field(META_OPERATION);
    let operation = Operation::parse(&raw_operation).ok_or_else(|| {
        CoreError::Validation(format!(
            "Invalid operation: {raw_operation}. Must be one of: {}",
            Operation::ALL.join(", ")
        ))
    })?;

    let override_immutable = get_trimmed(row, META_OVERRIDE)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Ok(Metadata {
        product: field(META_PRODUCT),
        submitted_by: field(META_SUBMITTED_BY),
        ticket_id: field(META_TICKET),
        operation,
        override_immutable,
    })
}

// ---------------------------------------------------------------------------
// Product rules
// ---------------------------------------------------------------------------

/// Per-product metadata rules applied before any entity work.
#[derive(Debug, Clone)]
pub struct MetadataRules {
    ticket_pattern: Regex,
    ticket_hint: String,
    /// `Some` in restricted (production) deployments only.
    allowed_submitters: Option<Vec<String>>,
}

impl MetadataRules {
    /// Build rules from a ticket-id regex and a human-readable format hint.
    pub fn new(ticket_pattern: &str, ticket_hint: &str) -> Result<Self, CoreError> {
        let ticket_pattern = Regex::new(ticket_pattern)
            .map_err(|e| CoreError::Validation(format!("Invalid ticket pattern: {e}")))?;
        Ok(Self {
            ticket_pattern,
            ticket_hint: ticket_hint.to_string(),
            allowed_submitters: None,
        })
    }

    /// Restrict submitters to an allow-list.
    pub fn with_allowed_submitters(mut self, submitters: Vec<String>) -> Self {
        self.allowed_submitters = Some(submitters);
        self
    }

    pub fn validate(&self, metadata: &Metadata) -> Result<(), CoreError> {
        if !self.ticket_pattern.is_match(&metadata.ticket_id) {
            return Err(CoreError::Validation(format!(
                "Invalid ticket id format: {}. Expected format: {}",
                metadata.ticket_id, self.ticket_hint
            )));
        }

        if let Some(allowed) = &self.allowed_submitters {
            if !allowed.iter().any(|s| s == &metadata.submitted_by) {
                return Err(CoreError::Validation(format!(
                    "Submitter '{}' not in allowlist",
                    metadata.submitted_by
                )));
            }
        }

        Ok(())
    }
}
