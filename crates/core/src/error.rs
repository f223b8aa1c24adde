/// How far an error propagates inside the file pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The current row is rolled back and recorded as failed; later rows still run.
    Row,
    /// Processing of the whole file stops and the file is routed to `failed`.
    File,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {key} does not exist. Use INSERT operation.")]
    NotFound { entity: String, key: String },

    #[error("Database rejected statement: {0}")]
    Rejected(String),

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl CoreError {
    /// Classify the error for the row loop.
    ///
    /// Validation, missing targets, rejected statements and row timeouts are
    /// attributed to the row. Everything else (lost connections, filesystem
    /// and remote-transfer failures) escalates to the file.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Validation(_) | Self::NotFound { .. } | Self::Rejected(_) | Self::Timeout { .. } => {
                ErrorScope::Row
            }
            Self::Infrastructure(_) => ErrorScope::File,
        }
    }

    /// Short machine-readable kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Rejected(_) => "rejected",
            Self::Timeout { .. } => "timeout",
            Self::Infrastructure(_) => "infrastructure",
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Infrastructure(format!("I/O error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_scoped_errors() {
        assert_eq!(CoreError::Validation("x".into()).scope(), ErrorScope::Row);
        assert_eq!(
            CoreError::NotFound {
                entity: "Plaza".into(),
                key: "P1".into()
            }
            .scope(),
            ErrorScope::Row
        );
        assert_eq!(CoreError::Rejected("dup".into()).scope(), ErrorScope::Row);
        assert_eq!(
            CoreError::Timeout {
                operation: "row".into(),
                elapsed_ms: 10
            }
            .scope(),
            ErrorScope::Row
        );
    }

    #[test]
    fn infrastructure_escalates() {
        assert_eq!(
            CoreError::Infrastructure("connection reset".into()).scope(),
            ErrorScope::File
        );
    }

    #[test]
    fn io_error_is_infrastructure() {
        let err: CoreError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), "infrastructure");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn not_found_message_suggests_insert() {
        let err = CoreError::NotFound {
            entity: "Lane".into(),
            key: "P1/L2".into(),
        };
        assert_eq!(err.to_string(), "Lane P1/L2 does not exist. Use INSERT operation.");
    }
}
