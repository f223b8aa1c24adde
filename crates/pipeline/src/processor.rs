//! File pipeline: moves a file through `inbox → processing → processed |
//! failed`, runs each row in its own transaction, and writes the SQL audit
//! artifacts.
//!
//! Row failures are independent: the row is rolled back and recorded, and
//! the next row is attempted. Infrastructure failures stop the row loop and
//! route the file to `failed`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use onboard_core::audit::{artifact_file_name, render_artifact, TicketAudit};
use onboard_core::error::{CoreError, ErrorScope};
use onboard_core::metadata::{extract_metadata, Metadata};
use onboard_core::types::{FileStatus, Row, RowSummary, Timestamp};

use crate::file_log::FileLogRouter;
use crate::reconciler::Reconciler;
use crate::registry::ProductHandle;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Pipeline settings shared by every file.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory receiving the SQL audit artifacts.
    pub sql_dir: PathBuf,
    /// Upper bound for one row's work; expiry rolls the row back.
    pub row_timeout: Option<Duration>,
}

/// Errors that prevent a file from reaching a terminal location.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File has no data rows")]
    NoDataRows,

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A failed row and why it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    /// 1-indexed from the first data row.
    pub row: usize,
    pub ticket: Option<String>,
    pub kind: &'static str,
    pub message: String,
}

/// Outcome of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file_name: String,
    pub product: String,
    pub status: FileStatus,
    pub total_rows: usize,
    pub successful_rows: Vec<usize>,
    pub failed_rows: Vec<RowFailure>,
    /// Where the file ended up.
    pub final_path: PathBuf,
    pub audit_artifacts: Vec<PathBuf>,
    /// File-level error, when the file failed as a whole.
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl FileReport {
    pub fn failed_row_numbers(&self) -> Vec<usize> {
        self.failed_rows.iter().map(|f| f.row).collect()
    }
}

/// Row bookkeeping accumulated while a file runs.
#[derive(Debug, Default)]
struct RowTally {
    total: usize,
    successful: Vec<usize>,
    failed: Vec<RowFailure>,
    audit: TicketAudit,
    /// Set when an infrastructure error stopped the row loop.
    escalated: Option<CoreError>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Process one file found in the product's inbox.
///
/// Returns `Err` only when the file cannot be moved into `processing` or
/// into its terminal location; every other failure is reflected in the
/// returned report.
pub async fn process_file(
    handle: &mut ProductHandle,
    inbox_path: &Path,
    options: &PipelineOptions,
    log_router: Option<&FileLogRouter>,
) -> Result<FileReport, PipelineError> {
    let started_at = chrono::Utc::now();
    let clock = Instant::now();
    let file_name = file_name_of(inbox_path);
    let product = handle.code();

    let _log_guard = match log_router {
        Some(router) => {
            let log_path = handle.paths.logs.join(format!("{}.log", stem_of(inbox_path)));
            match router.open(&log_path) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "Cannot open per-file log");
                    None
                }
            }
        }
        None => None,
    };

    tracing::info!(product, file = %file_name, "Processing file");

    let processing_path = handle.paths.processing.join(&file_name);
    move_file(inbox_path, &processing_path).await?;

    let (mut tally, file_error) = match run_rows(handle, &processing_path, &file_name, options).await {
        Ok(tally) => (tally, None),
        Err(e) => {
            tracing::error!(product, file = %file_name, error = %e, "File processing failed");
            (RowTally::default(), Some(e.to_string()))
        }
    };

    if let Err(e) = handle.db.close().await {
        tracing::warn!(product, error = %e, "Failed to close database session");
    }

    let mut error = file_error.or_else(|| tally.escalated.as_ref().map(|e| e.to_string()));

    let audit_artifacts = match persist_audit(&tally.audit, &processing_path, &options.sql_dir).await {
        Ok(paths) => paths,
        Err(e) => {
            tracing::error!(product, file = %file_name, error = %e, "Failed to save SQL audit");
            error.get_or_insert_with(|| e.to_string());
            Vec::new()
        }
    };

    let status = if error.is_some() {
        FileStatus::Failed
    } else {
        FileStatus::from_counts(tally.successful.len(), tally.failed.len())
    };
    let destination_dir = match status {
        FileStatus::Processed | FileStatus::PartiallySucceeded => &handle.paths.processed,
        FileStatus::Failed => &handle.paths.failed,
    };
    let final_path = destination_dir.join(&file_name);
    move_file(&processing_path, &final_path).await?;

    let report = FileReport {
        file_name,
        product: product.to_string(),
        status,
        total_rows: tally.total,
        successful_rows: std::mem::take(&mut tally.successful),
        failed_rows: std::mem::take(&mut tally.failed),
        final_path,
        audit_artifacts,
        error,
        started_at,
        finished_at: chrono::Utc::now(),
    };
    log_summary(&report, clock.elapsed());
    Ok(report)
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

async fn run_rows(
    handle: &mut ProductHandle,
    path: &Path,
    file_name: &str,
    options: &PipelineOptions,
) -> Result<RowTally, PipelineError> {
    let rows = read_rows(path).await?;
    if rows.is_empty() {
        return Err(PipelineError::NoDataRows);
    }

    let mut tally = RowTally {
        total: rows.len(),
        ..Default::default()
    };
    tracing::info!(file = %file_name, rows = rows.len(), "Parsed CSV");

    for (idx, row) in rows.iter().enumerate() {
        let row_num = idx + 1;

        let metadata = match extract_metadata(row).and_then(|m| check_product(handle, m)) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(file = %file_name, row = row_num, kind = e.kind(), error = %e, "Row rejected");
                tally.failed.push(failure(row_num, None, &e));
                continue;
            }
        };

        match run_row(handle, row, &metadata, options.row_timeout).await {
            Ok(summary) => {
                let statements = handle.audit.take();
                tracing::info!(
                    file = %file_name,
                    row = row_num,
                    ticket = %metadata.ticket_id,
                    statements = statements.len(),
                    inserted = summary.inserted.len(),
                    updated = summary.updated.len(),
                    skipped = summary.skipped.len(),
                    "Row committed"
                );
                tally.audit.extend(&metadata.ticket_id, statements);
                tally.successful.push(row_num);
            }
            Err(e) => {
                handle.audit.reset();
                tracing::error!(
                    file = %file_name,
                    row = row_num,
                    ticket = %metadata.ticket_id,
                    kind = e.kind(),
                    error = %e,
                    "Row failed, rolled back"
                );
                tally.failed.push(failure(row_num, Some(&metadata.ticket_id), &e));
                if e.scope() == ErrorScope::File {
                    tracing::error!(file = %file_name, row = row_num, "Stopping file after infrastructure error");
                    tally.escalated = Some(e);
                    break;
                }
            }
        }
    }

    Ok(tally)
}

/// One row inside its own transaction.
async fn run_row(
    handle: &mut ProductHandle,
    row: &Row,
    metadata: &Metadata,
    timeout: Option<Duration>,
) -> Result<RowSummary, CoreError> {
    handle.db.begin().await?;
    handle.audit.reset();

    let result = {
        let mut reconciler = Reconciler::new(
            handle.db.as_mut(),
            &mut handle.audit,
            handle.plugin.mutability(),
            handle.plugin.audit_columns(),
        );
        let work = handle.plugin.process(&mut reconciler, row, metadata);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    operation: "row processing".to_string(),
                    elapsed_ms: limit.as_millis() as u64,
                }),
            },
            None => work.await,
        }
    };

    match result {
        Ok(summary) => match handle.db.commit().await {
            Ok(()) => Ok(summary),
            Err(e) => {
                rollback(handle).await?;
                Err(e)
            }
        },
        Err(e) => {
            rollback(handle).await?;
            Err(e)
        }
    }
}

/// Roll back the current row. A failed rollback leaves the session in an
/// unknown state and escalates.
async fn rollback(handle: &mut ProductHandle) -> Result<(), CoreError> {
    handle.db.rollback().await.map_err(|e| {
        CoreError::Infrastructure(format!("Rollback failed: {e}"))
    })
}

fn check_product(handle: &ProductHandle, metadata: Metadata) -> Result<Metadata, CoreError> {
    let expected = handle.code();
    if metadata.product != expected {
        return Err(CoreError::Validation(format!(
            "Product mismatch: row declares {}, file belongs to {expected}",
            metadata.product
        )));
    }
    Ok(metadata)
}

fn failure(row: usize, ticket: Option<&str>, err: &CoreError) -> RowFailure {
    RowFailure {
        row,
        ticket: ticket.map(str::to_string),
        kind: err.kind(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Read every data row, keyed by the trimmed header names.
async fn read_rows(path: &Path) -> Result<Vec<Row>, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| PipelineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&bytes)
}

/// Short records are padded with empty cells and cells past the last
/// header are dropped, so a ragged row is judged on its own content.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Row>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.to_string(), record.get(idx).unwrap_or_default().to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub(crate) async fn move_file(from: &Path, to: &Path) -> Result<(), PipelineError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| PipelineError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source,
        })?;
    tracing::info!(from = %from.display(), to = %to.display(), "Moved file");
    Ok(())
}

async fn persist_audit(
    audit: &TicketAudit,
    source: &Path,
    sql_dir: &Path,
) -> Result<Vec<PathBuf>, CoreError> {
    if audit.is_empty() {
        return Ok(Vec::new());
    }
    tokio::fs::create_dir_all(sql_dir).await?;

    let source_name = file_name_of(source);
    let mut written = Vec::new();
    for (ticket, statements) in audit.tickets() {
        let path = sql_dir.join(artifact_file_name(ticket, source));
        tokio::fs::write(&path, render_artifact(ticket, &source_name, statements)).await?;
        tracing::info!(ticket, statements = statements.len(), path = %path.display(), "Saved SQL audit");
        written.push(path);
    }
    tracing::info!(tickets = written.len(), "SQL audit complete");
    Ok(written)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn log_summary(report: &FileReport, elapsed: Duration) {
    tracing::info!(
        product = %report.product,
        file = %report.file_name,
        status = %report.status,
        total_rows = report.total_rows,
        succeeded = report.successful_rows.len(),
        failed = report.failed_rows.len(),
        successful_rows = ?report.successful_rows,
        failed_rows = ?report.failed_row_numbers(),
        location = %report.final_path.display(),
        elapsed_ms = elapsed.as_millis() as u64,
        "File processing complete"
    );
}
