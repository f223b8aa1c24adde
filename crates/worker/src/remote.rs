//! Remote transfer endpoint.
//!
//! [`MountedRemote`] serves a remote tree mounted into the local filesystem
//! (NFS or SSHFS share). Every operation is bounded by a timeout so a hung
//! mount cannot stall the poll loop.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote {operation} failed for {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote {operation} timed out after {}s for {path}", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        path: String,
        timeout: Duration,
    },
}

/// File operations on a remote endpoint. Paths are endpoint-absolute.
#[async_trait]
pub trait RemoteTransfer: Send + Sync {
    /// Names of the regular files directly under `dir`, sorted.
    async fn list(&self, dir: &str) -> Result<Vec<String>, RemoteError>;

    /// Copy `remote` to `local`. A partial copy is never left at `local`.
    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError>;

    async fn move_file(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    async fn ensure_dir(&self, dir: &str) -> Result<(), RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

// ---------------------------------------------------------------------------
// Mounted directory
// ---------------------------------------------------------------------------

pub struct MountedRemote {
    timeout: Duration,
}

impl MountedRemote {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, path: &str, work: F) -> Result<T, RemoteError>
    where
        F: Future<Output = std::io::Result<T>> + Send,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(RemoteError::Io {
                operation,
                path: path.to_string(),
                source,
            }),
            Err(_) => Err(RemoteError::Timeout {
                operation,
                path: path.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl RemoteTransfer for MountedRemote {
    async fn list(&self, dir: &str) -> Result<Vec<String>, RemoteError> {
        self.bounded("list", dir, async {
            let mut entries = tokio::fs::read_dir(dir).await?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        let mut partial = local.as_os_str().to_owned();
        partial.push(".tmp");
        let partial = PathBuf::from(partial);

        let result = self
            .bounded("download", remote, async {
                tokio::fs::copy(remote, &partial).await?;
                tokio::fs::rename(&partial, local).await
            })
            .await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.bounded("move", from, tokio::fs::rename(from, to)).await
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.bounded("delete", path, tokio::fs::remove_file(path)).await
    }

    async fn ensure_dir(&self, dir: &str) -> Result<(), RemoteError> {
        self.bounded("mkdir", dir, tokio::fs::create_dir_all(dir)).await
    }

    async fn close(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}
