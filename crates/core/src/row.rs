//! Dotted-namespace access to CSV rows.
//!
//! Row keys look like `plaza.plaza_id` or `meta.jira`. The part before the
//! first dot selects the entity (or `meta`), the rest is the column name.

use std::collections::BTreeMap;

use crate::types::Row;

/// Separator between the entity prefix and the field name in a row key.
pub const PREFIX_SEPARATOR: char = '.';

/// Extract the sub-record for one entity.
///
/// Returns every field under `prefix.` whose trimmed value is non-empty,
/// keyed by the lowercased field name with the prefix stripped. Values are
/// trimmed.
pub fn extract_fields(row: &Row, prefix: &str) -> BTreeMap<String, String> {
    let prefix_dot = format!("{prefix}{PREFIX_SEPARATOR}");
    row.iter()
        .filter_map(|(key, value)| {
            let field = key.strip_prefix(&prefix_dot)?;
            let value = value.trim();
            if field.is_empty() || value.is_empty() {
                return None;
            }
            Some((field.trim().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

/// Whether the row carries any non-empty field for `prefix`.
pub fn has_fields(row: &Row, prefix: &str) -> bool {
    let prefix_dot = format!("{prefix}{PREFIX_SEPARATOR}");
    row.iter()
        .any(|(key, value)| key.starts_with(&prefix_dot) && !value.trim().is_empty())
}

/// Trimmed value of a single dotted key, `None` when absent or blank.
pub fn get_trimmed<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
