//! Database credentials and the provider interface that supplies them.

use async_trait::async_trait;
use validator::Validate;

use crate::error::CoreError;

pub const DEFAULT_DB_PORT: u16 = 5432;

/// Connection credentials for one product database.
#[derive(Clone, PartialEq, Eq, Validate)]
pub struct Credentials {
    #[validate(length(min = 1, message = "host is required"))]
    pub host: String,
    #[validate(range(min = 1, message = "port must be non-zero"))]
    pub port: u16,
    #[validate(length(min = 1, message = "database is required"))]
    pub database: String,
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

impl Credentials {
    /// Validate field presence, mapping failures into a [`CoreError`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(format!("Incomplete database credentials: {e}")))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Supplies credentials for a product's database.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(&self, product: &str) -> Result<Credentials, CoreError>;
}
