//! Local inbox scan: validate each candidate's name, reject invalid files
//! straight to `failed`, and run the pipeline on the rest.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use onboard_core::filename::validate_submission_name;

use crate::file_log::FileLogRouter;
use crate::processor::{move_file, process_file, FileReport, PipelineError, PipelineOptions};
use crate::registry::ProductHandle;

/// Only files with this extension are picked up.
pub const CANDIDATE_EXTENSION: &str = "csv";

/// Result of one pass over a product inbox.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub reports: Vec<FileReport>,
    /// Files moved to `failed` because of an invalid name.
    pub rejected: Vec<PathBuf>,
    /// Files left in place after a pipeline error.
    pub errors: Vec<(PathBuf, String)>,
}

impl ScanSummary {
    pub fn files_seen(&self) -> usize {
        self.reports.len() + self.rejected.len() + self.errors.len()
    }
}

/// Regular `*.csv` files in `dir`, sorted by name.
pub async fn list_candidates(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(CANDIDATE_EXTENSION));
        if is_csv && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Move a file with an invalid name straight to `failed`.
pub async fn reject_file(handle: &ProductHandle, path: &Path) -> Result<PathBuf, PipelineError> {
    let name = path.file_name().unwrap_or_default();
    let destination = handle.paths.failed.join(name);
    move_file(path, &destination).await?;
    Ok(destination)
}

/// Process every candidate in the product inbox, one file at a time.
///
/// Stops picking up new files once `cancel` fires; the file in flight
/// always completes.
pub async fn scan_inbox(
    handle: &mut ProductHandle,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
    cancel: &CancellationToken,
) -> Result<ScanSummary, PipelineError> {
    let inbox = handle.paths.inbox.clone();
    let candidates = list_candidates(&inbox)
        .await
        .map_err(|source| PipelineError::Read {
            path: inbox.clone(),
            source,
        })?;

    let mut summary = ScanSummary::default();
    if candidates.is_empty() {
        tracing::debug!(product = handle.code(), "Inbox empty");
        return Ok(summary);
    }
    tracing::info!(product = handle.code(), files = candidates.len(), "Found files in inbox");

    for path in candidates {
        if cancel.is_cancelled() {
            tracing::info!(product = handle.code(), "Shutdown requested, leaving remaining files in inbox");
            break;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(e) = validate_submission_name(&file_name, handle.code()) {
            tracing::error!(product = handle.code(), file = %file_name, error = %e, "Invalid filename");
            match reject_file(handle, &path).await {
                Ok(dest) => summary.rejected.push(dest),
                Err(move_err) => summary.errors.push((path, move_err.to_string())),
            }
            continue;
        }

        match process_file(handle, &path, options, log_router).await {
            Ok(report) => summary.reports.push(report),
            Err(e) => {
                tracing::error!(product = handle.code(), file = %file_name, error = %e, "Pipeline error");
                summary.errors.push((path, e.to_string()));
            }
        }
    }

    Ok(summary)
}
