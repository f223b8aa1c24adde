use anyhow::Context;
use tokio_util::sync::CancellationToken;

use onboard_core::credentials::CredentialsProvider;
use onboard_core::db::Database;
use onboard_core::error::CoreError;
use onboard_db::secrets::{EnvCredentials, VaultCredentials};
use onboard_pipeline::plugin::RemoteEndpoint;
use onboard_pipeline::registry::{instantiate, Registry};
use onboard_worker::config::{RunMode, WorkerConfig};
use onboard_worker::logging;
use onboard_worker::poller::{self, RemoteProduct};
use onboard_worker::remote::MountedRemote;
use onboard_worker::shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("invalid configuration")?;

    // --- Tracing ---
    let log_router = logging::init(config.log_format, &config.base_dir)?;
    tracing::info!(
        env = config.environment.as_str(),
        mode = config.mode.as_str(),
        base_dir = %config.base_dir.display(),
        sql_dir = %config.sql_dir.display(),
        "Worker starting"
    );

    // --- Credentials ---
    let credentials: Box<dyn CredentialsProvider> = if config.is_production() {
        Box::new(VaultCredentials::from_env(config.remote_timeout).context("invalid Vault configuration")?)
    } else {
        Box::new(EnvCredentials::from_env())
    };

    if config.mode == RunMode::Check {
        return check_connections(&config, credentials.as_ref()).await;
    }

    // --- Registry ---
    let mut registry = build_registry(&config, credentials.as_ref()).await?;
    let options = config.pipeline_options();

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    match config.mode {
        RunMode::Scan => {
            let handled = poller::scan_all(&mut registry, &options, Some(&log_router), &cancel).await;
            tracing::info!(files = handled, "Scan complete");
        }
        RunMode::Watch => {
            poller::run_watch(&mut registry, &options, Some(&log_router), config.poll_interval, cancel).await;
        }
        RunMode::Remote => {
            let remotes = connect_remotes(&registry, &config).await?;
            poller::run_remote(
                &mut registry,
                &remotes,
                &options,
                Some(&log_router),
                config.poll_interval,
                cancel,
            )
            .await;
        }
        // Runs before the registry is built.
        RunMode::Check => {}
    }

    registry.close_all().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Instantiate every registered product and open its database session.
async fn build_registry(
    config: &WorkerConfig,
    credentials: &dyn CredentialsProvider,
) -> anyhow::Result<Registry> {
    let mut registry = Registry::new(config.base_dir.clone());
    for plugin in instantiate(&config.plugin_settings())? {
        let code = plugin.descriptor().code;
        let db = onboard_db::open_database(credentials, code, config.row_timeout)
            .await
            .with_context(|| format!("failed to open database for {code}"))?;
        registry.register(plugin, Box::new(db)).await?;
    }
    tracing::info!(products = ?registry.codes(), "Products registered");
    Ok(registry)
}

/// One remote session per product that has a remote endpoint configured.
async fn connect_remotes(registry: &Registry, config: &WorkerConfig) -> anyhow::Result<Vec<RemoteProduct>> {
    let settings = config.plugin_settings();
    let mut remotes = Vec::new();
    for code in registry.codes() {
        let Some(root) = settings.remote_root(code) else {
            tracing::warn!(product = code, "No remote endpoint configured, skipping");
            continue;
        };
        let remote = RemoteProduct {
            code,
            endpoint: RemoteEndpoint { root },
            transfer: Box::new(MountedRemote::new(config.remote_timeout)),
        };
        remote
            .connect()
            .await
            .with_context(|| format!("failed to connect remote endpoint for {code}"))?;
        remotes.push(remote);
    }
    if remotes.is_empty() {
        anyhow::bail!("remote mode requires at least one REMOTE_ROOT_<PRODUCT> setting");
    }
    Ok(remotes)
}

/// Fetch credentials and run a health-check query for every product.
async fn check_connections(
    config: &WorkerConfig,
    credentials: &dyn CredentialsProvider,
) -> anyhow::Result<()> {
    let mut failures = 0;
    for plugin in instantiate(&config.plugin_settings())? {
        let code = plugin.descriptor().code;
        let result: Result<(), CoreError> = async {
            let mut db = onboard_db::open_database(credentials, code, config.row_timeout).await?;
            db.health_check().await?;
            db.close().await
        }
        .await;
        match result {
            Ok(()) => tracing::info!(product = code, "Database connection OK"),
            Err(e) => {
                failures += 1;
                tracing::error!(product = code, error = %e, "Database connection failed");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} product connection check(s) failed");
    }
    tracing::info!("All connection checks passed");
    Ok(())
}
