//! Subscriber setup: console output, a process-wide log file under the base
//! directory, and the per-file log router.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use onboard_pipeline::file_log::FileLogRouter;

use crate::config::LogFormat;

pub const DEFAULT_FILTER: &str = "onboard_worker=debug,onboard_pipeline=debug,onboard_db=info";

pub const PROCESS_LOG_FILE: &str = "onboarding.log";

/// Install the global subscriber and return the router used for per-file
/// logs.
pub fn init(format: LogFormat, base_dir: &Path) -> anyhow::Result<FileLogRouter> {
    std::fs::create_dir_all(base_dir)
        .with_context(|| format!("failed to create {}", base_dir.display()))?;
    let process_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(base_dir.join(PROCESS_LOG_FILE))
        .context("failed to open process log file")?;

    let router = FileLogRouter::new();

    let console = match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(console)
        .with(fmt::layer().with_writer(process_log).with_ansi(false))
        .with(fmt::layer().with_writer(router.clone()).with_ansi(false))
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(router)
}
