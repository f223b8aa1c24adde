//! Field-level change detection and mutability enforcement.
//!
//! A change set compares the fields submitted for an entity against the
//! record currently stored. Only fields present (non-empty) in the incoming
//! data are candidates; equality is a whitespace-trimmed string comparison.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use serde::Serialize;

use crate::error::CoreError;
use crate::types::Record;

static NO_FIELDS: LazyLock<BTreeSet<String>> = LazyLock::new(BTreeSet::new);

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// One detected difference between the stored and submitted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Stored value, `None` when the column is NULL.
    pub old_value: Option<String>,
    pub new_value: String,
    pub is_mutable: bool,
}

/// Changes detected for one entity, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    changes: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
    /// Compare `incoming` against `current`.
    ///
    /// A field is included iff its trimmed incoming value is non-empty and
    /// differs from the trimmed current value (NULL compares as empty).
    pub fn detect(
        current: &Record,
        incoming: &BTreeMap<String, String>,
        mutable_fields: &BTreeSet<String>,
    ) -> Self {
        let changes = incoming
            .iter()
            .filter_map(|(field, value)| {
                let new_value = value.trim();
                if new_value.is_empty() {
                    return None;
                }
                let old_value = current.get(field).cloned().flatten();
                let old_trimmed = old_value.as_deref().map(str::trim).unwrap_or("");
                if old_trimmed == new_value {
                    return None;
                }
                Some((
                    field.clone(),
                    FieldChange {
                        old_value,
                        new_value: new_value.to_string(),
                        is_mutable: mutable_fields.contains(field),
                    },
                ))
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.changes.iter()
    }

    /// Changed fields outside the mutable set, in name order.
    pub fn immutable_fields(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|(_, change)| !change.is_mutable)
            .map(|(field, _)| field.as_str())
            .collect()
    }

    /// Refuse the change set when it touches immutable fields without override.
    ///
    /// The error names every offending field at once.
    pub fn enforce(&self, entity: &str, override_immutable: bool) -> Result<(), CoreError> {
        if override_immutable {
            return Ok(());
        }
        let blocked = self.immutable_fields();
        if blocked.is_empty() {
            return Ok(());
        }
        Err(CoreError::Validation(format!(
            "Cannot modify immutable fields on {entity}: {}. Set meta.override=true to force the update",
            blocked.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Mutability policy
// ---------------------------------------------------------------------------

/// Per-product mapping from table name to the fields that may change
/// without override. Table names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct MutabilityPolicy {
    tables: HashMap<String, BTreeSet<String>>,
}

impl MutabilityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the mutable fields of a table.
    pub fn with_table<I, S>(mut self, table: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.insert(
            table.to_ascii_uppercase(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Mutable fields of `table`; empty for undeclared tables.
    pub fn mutable_fields(&self, table: &str) -> &BTreeSet<String> {
        self.tables
            .get(&table.to_ascii_uppercase())
            .unwrap_or(&NO_FIELDS)
    }

    pub fn is_mutable(&self, table: &str, field: &str) -> bool {
        self.mutable_fields(table).contains(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn current(pairs: &[(&str, Option<&str>)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    fn incoming(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn mutable(fields: &[&str]) -> BTreeSet<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    // -- detect tests ---------------------------------------------------------

    #[test]
    fn identical_after_trim_is_not_a_change() {
        let cs = ChangeSet::detect(
            &current(&[("name", Some("North Gate  "))]),
            &incoming(&[("name", " North Gate")]),
            &mutable(&[]),
        );
        assert!(cs.is_empty());
    }

    #[test]
    fn empty_incoming_never_clears() {
        let cs = ChangeSet::detect(
            &current(&[("name", Some("North Gate"))]),
            &incoming(&[("name", "   ")]),
            &mutable(&[]),
        );
        assert!(cs.is_empty());
    }

    #[test]
    fn null_current_counts_as_change() {
        let cs = ChangeSet::detect(
            &current(&[("status", None)]),
            &incoming(&[("status", "ACTIVE")]),
            &mutable(&[]),
        );
        assert_eq!(cs.len(), 1);
        let (_, change) = cs.iter().next().unwrap();
        assert_eq!(change.old_value, None);
        assert_eq!(change.new_value, "ACTIVE");
    }

    #[test]
    fn values_are_not_normalized_beyond_trim() {
        let cs = ChangeSet::detect(
            &current(&[("amount", Some("150.0"))]),
            &incoming(&[("amount", "150.00")]),
            &mutable(&[]),
        );
        assert_eq!(cs.len(), 1);
    }

    #[test]
    fn column_missing_from_record_is_a_change() {
        let cs = ChangeSet::detect(&current(&[]), &incoming(&[("x", "1")]), &mutable(&[]));
        assert_eq!(cs.len(), 1);
    }

    #[test]
    fn mutability_is_recorded_per_field() {
        let cs = ChangeSet::detect(
            &current(&[("name", Some("a")), ("modified_ts", Some("t1"))]),
            &incoming(&[("name", "b"), ("modified_ts", "t2")]),
            &mutable(&["modified_ts"]),
        );
        assert_eq!(cs.immutable_fields(), vec!["name"]);
    }

    // -- enforce tests --------------------------------------------------------

    #[test]
    fn enforce_lists_every_blocked_field() {
        let cs = ChangeSet::detect(
            &current(&[("name", Some("a")), ("status", Some("x"))]),
            &incoming(&[("name", "b"), ("status", "y")]),
            &mutable(&[]),
        );
        let err = cs.enforce("plaza", false).unwrap_err();
        assert_matches!(err, CoreError::Validation(ref msg) if msg.contains("name, status"));
    }

    #[test]
    fn override_permits_immutable_changes() {
        let cs = ChangeSet::detect(
            &current(&[("name", Some("a"))]),
            &incoming(&[("name", "b")]),
            &mutable(&[]),
        );
        assert!(cs.enforce("plaza", true).is_ok());
    }

    #[test]
    fn mutable_only_changes_pass_without_override() {
        let cs = ChangeSet::detect(
            &current(&[("modified_ts", Some("t1"))]),
            &incoming(&[("modified_ts", "t2")]),
            &mutable(&["modified_ts"]),
        );
        assert!(cs.enforce("plaza", false).is_ok());
    }

    // -- MutabilityPolicy tests -----------------------------------------------

    #[test]
    fn policy_lookup_ignores_table_case() {
        let policy = MutabilityPolicy::new().with_table("NETCACQ_PLAZA_DTLS", ["modified_ts"]);
        assert!(policy.is_mutable("netcacq_plaza_dtls", "modified_ts"));
        assert!(!policy.is_mutable("NETCACQ_PLAZA_DTLS", "name"));
    }

    #[test]
    fn undeclared_table_has_no_mutable_fields() {
        let policy = MutabilityPolicy::new();
        assert!(policy.mutable_fields("ANY").is_empty());
    }
}
