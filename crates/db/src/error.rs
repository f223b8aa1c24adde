use onboard_core::error::CoreError;

/// Errors raised by the database and secret-store adapters.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Secret store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The secret store answered with a non-2xx status.
    #[error("Secret store error ({status}): {body}")]
    SecretStore { status: u16, body: String },

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Malformed secret: {0}")]
    MalformedSecret(String),
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlx(e) => classify_sqlx_error(&e),
            DbError::MissingConfig(_) | DbError::MalformedSecret(_) => {
                CoreError::Validation(err.to_string())
            }
            other => CoreError::Infrastructure(other.to_string()),
        }
    }
}

/// Classify a sqlx error for the row loop.
///
/// - Server-side rejections (constraint violations, bad casts, syntax) and
///   decode failures are attributed to the row.
/// - Everything else (I/O, TLS, protocol, pool) is infrastructure.
pub fn classify_sqlx_error(err: &sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            match db_err.constraint() {
                Some(constraint) => CoreError::Rejected(format!(
                    "[{code}] {} (constraint {constraint})",
                    db_err.message()
                )),
                None => CoreError::Rejected(format!("[{code}] {}", db_err.message())),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            CoreError::Rejected(err.to_string())
        }
        other => CoreError::Infrastructure(format!("Database error: {other}")),
    }
}
