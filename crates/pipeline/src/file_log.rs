//! Per-file log sink.
//!
//! [`FileLogRouter`] is a `tracing_subscriber` writer installed once at
//! startup. While a [`FileLogGuard`] is alive, every event is also written
//! to that file's log; dropping the guard flushes and detaches it on every
//! exit path.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing_subscriber::fmt::MakeWriter;

type Slot = Arc<Mutex<Option<BufWriter<File>>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<BufWriter<File>>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Routes log output to the currently open per-file log, if any.
#[derive(Clone, Default)]
pub struct FileLogRouter {
    slot: Slot,
}

impl FileLogRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start routing to `path` (appending). Any previously open log is
    /// flushed and replaced.
    pub fn open(&self, path: &Path) -> io::Result<FileLogGuard> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut slot = lock(&self.slot);
        if let Some(mut previous) = slot.replace(BufWriter::new(file)) {
            let _ = previous.flush();
        }
        Ok(FileLogGuard {
            slot: Arc::clone(&self.slot),
            path: path.to_path_buf(),
        })
    }

    pub fn is_active(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl<'a> MakeWriter<'a> for FileLogRouter {
    type Writer = FileLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileLogWriter {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Writer handed to the fmt layer for each event. Output is discarded when
/// no file log is open.
pub struct FileLogWriter {
    slot: Slot,
}

impl Write for FileLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match lock(&self.slot).as_mut() {
            Some(writer) => writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.slot).as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Keeps a per-file log open; closes it on drop.
pub struct FileLogGuard {
    slot: Slot,
    path: PathBuf,
}

impl FileLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLogGuard {
    fn drop(&mut self) {
        if let Some(mut writer) = lock(&self.slot).take() {
            let _ = writer.flush();
        }
    }
}
