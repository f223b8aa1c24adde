//! Scan and poll loops.
//!
//! Local scans walk every product inbox once per pass. The remote poll
//! claims each remote inbox file by moving it to the remote `processing`
//! directory, downloads it into the local inbox, runs the pipeline and then
//! mirrors the local terminal location back to the remote.
//!
//! Both loops block between passes, stop on `cancel`, and always let the
//! file in flight finish.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use onboard_core::filename::validate_submission_name;
use onboard_core::types::FileStatus;
use onboard_pipeline::file_log::FileLogRouter;
use onboard_pipeline::inbox::{scan_inbox, CANDIDATE_EXTENSION};
use onboard_pipeline::plugin::RemoteEndpoint;
use onboard_pipeline::processor::{process_file, FileReport, PipelineError, PipelineOptions};
use onboard_pipeline::registry::{ProductHandle, Registry};

use crate::remote::{RemoteError, RemoteTransfer};

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// One pass over every product's local inbox. Returns the number of files
/// that reached a terminal location.
pub async fn scan_all(
    registry: &mut Registry,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    cancel: &CancellationToken,
) -> usize {
    let mut handled = 0;
    for handle in registry.handles_mut() {
        if cancel.is_cancelled() {
            break;
        }
        match scan_inbox(handle, options, log_router, cancel).await {
            Ok(summary) => {
                for (path, error) in &summary.errors {
                    tracing::error!(product = handle.code(), file = %path.display(), %error, "File left unprocessed");
                }
                handled += summary.reports.len() + summary.rejected.len();
            }
            Err(e) => {
                tracing::error!(product = handle.code(), error = %e, "Inbox scan failed");
            }
        }
    }
    handled
}

/// Repeat [`scan_all`] every `interval` until cancelled.
pub async fn run_watch(
    registry: &mut Registry,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), products = ?registry.codes(), "Watching local inboxes");
    let mut ticker = pass_ticker(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Watch loop stopping");
                break;
            }
            _ = ticker.tick() => {
                let pass_id = Uuid::now_v7();
                let handled = scan_all(registry, options, log_router, &cancel).await;
                if handled > 0 {
                    tracing::info!(%pass_id, files = handled, "Scan pass complete");
                } else {
                    tracing::debug!(%pass_id, "Scan pass found nothing");
                }
            }
        }
    }
}

/// Ticker for the scan and poll loops. A pass longer than `interval`
/// delays the next one instead of triggering a burst of catch-up passes.
fn pass_ticker(interval: Duration) -> Interval {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// A product polled on a remote endpoint.
pub struct RemoteProduct {
    pub code: &'static str,
    pub endpoint: RemoteEndpoint,
    pub transfer: Box<dyn RemoteTransfer>,
}

impl RemoteProduct {
    /// Create the remote directory layout.
    pub async fn connect(&self) -> Result<(), RemoteError> {
        for dir in [
            self.endpoint.inbox(),
            self.endpoint.processing(),
            self.endpoint.processed(),
            self.endpoint.failed(),
        ] {
            self.transfer.ensure_dir(&dir).await?;
        }
        tracing::info!(product = self.code, root = %self.endpoint.root, "Connected to remote endpoint");
        Ok(())
    }
}

/// What happened to one remote file.
#[derive(Debug)]
pub enum RemoteOutcome {
    /// Invalid filename; moved to remote `failed` without processing.
    Rejected,
    Processed(Box<FileReport>),
}

/// Result of one poll over one remote inbox.
#[derive(Debug, Default)]
pub struct PollSummary {
    pub rejected: Vec<String>,
    pub reports: Vec<FileReport>,
    pub errors: Vec<(String, String)>,
}

/// Claim, download, process and mirror every candidate in the remote inbox.
pub async fn poll_remote(
    handle: &mut ProductHandle,
    remote: &RemoteProduct,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    cancel: &CancellationToken,
) -> Result<PollSummary, RemoteError> {
    let inbox = remote.endpoint.inbox();
    let candidates: Vec<String> = remote
        .transfer
        .list(&inbox)
        .await?
        .into_iter()
        .filter(|name| is_candidate(name))
        .collect();

    let mut summary = PollSummary::default();
    if candidates.is_empty() {
        return Ok(summary);
    }
    tracing::info!(product = remote.code, files = candidates.len(), "Found files on remote");

    for name in candidates {
        if cancel.is_cancelled() {
            tracing::info!(product = remote.code, "Shutdown requested, leaving remaining remote files");
            break;
        }

        let mut claimed = false;
        match process_remote_file(handle, remote, &name, options, log_router, &mut claimed).await {
            Ok(RemoteOutcome::Rejected) => summary.rejected.push(name),
            Ok(RemoteOutcome::Processed(report)) => summary.reports.push(*report),
            Err(e) => {
                tracing::error!(product = remote.code, file = %name, error = %e, "Remote file failed");
                let from = if claimed {
                    format!("{}/{name}", remote.endpoint.processing())
                } else {
                    format!("{inbox}/{name}")
                };
                let to = format!("{}/{name}", remote.endpoint.failed());
                if let Err(move_err) = remote.transfer.move_file(&from, &to).await {
                    tracing::warn!(file = %name, error = %move_err, "Could not move remote file to failed");
                }
                summary.errors.push((name, e.to_string()));
            }
        }
    }
    Ok(summary)
}

async fn process_remote_file(
    handle: &mut ProductHandle,
    remote: &RemoteProduct,
    name: &str,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    claimed: &mut bool,
) -> Result<RemoteOutcome, PollError> {
    let endpoint = &remote.endpoint;
    let inbox_path = format!("{}/{name}", endpoint.inbox());

    if let Err(e) = validate_submission_name(name, handle.code()) {
        tracing::error!(product = remote.code, file = %name, error = %e, "Invalid filename on remote");
        remote
            .transfer
            .move_file(&inbox_path, &format!("{}/{name}", endpoint.failed()))
            .await?;
        return Ok(RemoteOutcome::Rejected);
    }

    tracing::info!(product = remote.code, file = %name, "New file on remote");
    let processing_path = format!("{}/{name}", endpoint.processing());
    remote.transfer.move_file(&inbox_path, &processing_path).await?;
    *claimed = true;

    let local = handle.paths.inbox.join(name);
    remote.transfer.download(&processing_path, &local).await?;
    tracing::info!(file = %name, local = %local.display(), "Downloaded");

    let report = process_file(handle, &local, options, log_router).await?;

    let destination = match report.status {
        FileStatus::Failed => endpoint.failed(),
        FileStatus::Processed | FileStatus::PartiallySucceeded => endpoint.processed(),
    };
    remote
        .transfer
        .move_file(&processing_path, &format!("{destination}/{name}"))
        .await?;
    tracing::info!(file = %name, to = %destination, "Mirrored on remote");

    Ok(RemoteOutcome::Processed(Box::new(report)))
}

fn is_candidate(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(CANDIDATE_EXTENSION))
}

/// Poll every remote product every `interval` until cancelled, then close
/// the remote sessions.
pub async fn run_remote(
    registry: &mut Registry,
    remotes: &[RemoteProduct],
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        products = remotes.len(),
        "Remote polling started"
    );
    let mut ticker = pass_ticker(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Remote polling stopping");
                break;
            }
            _ = ticker.tick() => {
                let pass_id = Uuid::now_v7();
                tracing::debug!(%pass_id, "Poll pass started");
                for remote in remotes {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(handle) = registry.get_mut(remote.code) else {
                        continue;
                    };
                    match poll_remote(handle, remote, options, log_router, &cancel).await {
                        Ok(summary) => {
                            let files = summary.reports.len() + summary.rejected.len() + summary.errors.len();
                            if files > 0 {
                                tracing::info!(
                                    %pass_id,
                                    product = remote.code,
                                    processed = summary.reports.len(),
                                    rejected = summary.rejected.len(),
                                    errors = summary.errors.len(),
                                    "Poll complete"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(%pass_id, product = remote.code, error = %e, "Error polling remote");
                        }
                    }
                }
            }
        }
    }

    for remote in remotes {
        if let Err(e) = remote.transfer.close().await {
            tracing::warn!(product = remote.code, error = %e, "Failed to close remote session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- ticker tests ---------------------------------------------------------

    #[tokio::test]
    async fn pass_ticker_delays_after_a_long_pass() {
        let ticker = pass_ticker(Duration::from_secs(30));
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(ticker.period(), Duration::from_secs(30));
    }

    // -- candidate tests ------------------------------------------------------

    #[test]
    fn only_csv_files_are_candidates() {
        assert!(is_candidate("olm_id_FASTAG_ACQ_20240131.csv"));
        assert!(is_candidate("upload.CSV"));
        assert!(!is_candidate("readme.txt"));
        assert!(!is_candidate("csv"));
    }
}
