pub mod error;
pub mod postgres;
pub mod secrets;

use std::time::Duration;

use onboard_core::credentials::CredentialsProvider;
use onboard_core::error::CoreError;

pub use error::DbError;
pub use postgres::PgDatabase;

/// Fetch credentials for `product` and open a session.
///
/// The session connects lazily; call [`PgDatabase::health_check`] to force
/// the connection.
pub async fn open_database(
    provider: &dyn CredentialsProvider,
    product: &str,
    statement_timeout: Option<Duration>,
) -> Result<PgDatabase, CoreError> {
    let credentials = provider.get_credentials(product).await?;
    tracing::debug!(product, host = %credentials.host, database = %credentials.database, "Opening database session");
    Ok(PgDatabase::new(&credentials, statement_timeout))
}
