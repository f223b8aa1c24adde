//! Submission filename convention.
//!
//! Convention: `{submitter}_{PRODUCT}_{YYYYMMDD}.csv`
//!
//! - `submitter` = operator id, letters, digits and underscores
//! - `PRODUCT` = product code, uppercase letters and underscores
//! - `YYYYMMDD` = submission date, eight digits
//!
//! Both the submitter and the product code may contain underscores, so the
//! split is anchored on the product code the inbox expects.
//!
//! # Examples
//!
//! ```
//! use onboard_core::filename::validate_submission_name;
//!
//! let name = validate_submission_name("olm_id_FASTAG_ACQ_20240131.csv", "FASTAG_ACQ").unwrap();
//! assert_eq!(name.submitter, "olm_id");
//! assert_eq!(name.date, "20240131");
//!
//! assert!(validate_submission_name("olm_id_ETC_20240131.csv", "FASTAG_ACQ").is_err());
//! assert!(validate_submission_name("plaza.csv", "FASTAG_ACQ").is_err());
//! ```

use std::sync::LazyLock;

use regex::Regex;

static SUBMISSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+)_(\d{8})\.csv$").expect("valid regex"));

/// Used only to report which product a mismatched name carries.
static PRODUCT_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+?)_([A-Z_]+)$").expect("valid regex"));

/// Parts of a valid submission filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionName {
    pub submitter: String,
    pub product: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilenameError {
    #[error("Invalid filename format: {0}. Expected <submitter>_<PRODUCT>_<YYYYMMDD>.csv")]
    InvalidFormat(String),

    #[error("Product mismatch in {filename}: expected {expected}, found {found}")]
    ProductMismatch {
        filename: String,
        expected: String,
        found: String,
    },
}

/// Validate `filename` against the convention for the `expected` product.
pub fn validate_submission_name(
    filename: &str,
    expected: &str,
) -> Result<SubmissionName, FilenameError> {
    let caps = SUBMISSION_RE
        .captures(filename)
        .ok_or_else(|| FilenameError::InvalidFormat(filename.to_string()))?;
    let head = &caps[1];
    let date = caps[2].to_string();

    let suffix = format!("_{expected}");
    if let Some(submitter) = head.strip_suffix(&suffix) {
        if !submitter.is_empty() {
            return Ok(SubmissionName {
                submitter: submitter.to_string(),
                product: expected.to_string(),
                date,
            });
        }
    }

    match PRODUCT_SUFFIX_RE.captures(head) {
        Some(parts) => Err(FilenameError::ProductMismatch {
            filename: filename.to_string(),
            expected: expected.to_string(),
            found: parts[2].to_string(),
        }),
        None => Err(FilenameError::InvalidFormat(filename.to_string())),
    }
}
