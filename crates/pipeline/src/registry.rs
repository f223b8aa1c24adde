//! Product registry.
//!
//! Products are registered explicitly in [`REGISTRATIONS`]. The registry
//! instantiates one plugin per product and owns, per product, its database
//! session, its audit buffer and its directory layout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use onboard_core::audit::AuditBuffer;
use onboard_core::db::Database;
use onboard_core::error::CoreError;

use crate::plugin::ProductPlugin;
use crate::products::fastag_acq::{self, FastagAcqPlugin};

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Deployment-wide inputs to plugin construction.
#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    /// Production deployment: enables the submitter allow-list.
    pub restricted: bool,
    pub allowed_submitters: Vec<String>,
    /// Remote endpoint root per product code.
    pub remote_roots: HashMap<String, String>,
}

impl PluginSettings {
    pub fn remote_root(&self, code: &str) -> Option<String> {
        self.remote_roots.get(code).cloned()
    }
}

pub type PluginConstructor = fn(&PluginSettings) -> Result<Box<dyn ProductPlugin>, CoreError>;

/// A product code and the constructor for its plugin.
pub struct Registration {
    pub code: &'static str,
    pub construct: PluginConstructor,
}

fn build_fastag_acq(settings: &PluginSettings) -> Result<Box<dyn ProductPlugin>, CoreError> {
    Ok(Box::new(FastagAcqPlugin::new(settings)?))
}

/// Every known product, in processing order.
pub const REGISTRATIONS: &[Registration] = &[Registration {
    code: fastag_acq::DESCRIPTOR.code,
    construct: build_fastag_acq,
}];

/// Instantiate one plugin per registered product.
pub fn instantiate(settings: &PluginSettings) -> Result<Vec<Box<dyn ProductPlugin>>, CoreError> {
    REGISTRATIONS
        .iter()
        .map(|registration| (registration.construct)(settings))
        .collect()
}

/// Instantiate a single product by code.
pub fn instantiate_one(
    code: &str,
    settings: &PluginSettings,
) -> Result<Box<dyn ProductPlugin>, CoreError> {
    let registration = REGISTRATIONS
        .iter()
        .find(|r| r.code.eq_ignore_ascii_case(code))
        .ok_or_else(|| CoreError::Validation(format!("Unknown product: {code}")))?;
    (registration.construct)(settings)
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

/// Directory layout of one product under the base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPaths {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub processing: PathBuf,
    pub processed: PathBuf,
    pub failed: PathBuf,
    pub logs: PathBuf,
}

impl ProductPaths {
    pub fn new(base_dir: &Path, folder: &str) -> Self {
        let root = base_dir.join(folder);
        Self {
            inbox: root.join("inbox"),
            processing: root.join("processing"),
            processed: root.join("processed"),
            failed: root.join("failed"),
            logs: root.join("logs"),
            root,
        }
    }

    /// Create every directory that does not exist yet.
    pub async fn ensure(&self) -> Result<(), CoreError> {
        for dir in [
            &self.inbox,
            &self.processing,
            &self.processed,
            &self.failed,
            &self.logs,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Everything the pipeline needs to process one product's files.
pub struct ProductHandle {
    pub plugin: Box<dyn ProductPlugin>,
    pub db: Box<dyn Database>,
    pub audit: AuditBuffer,
    pub paths: ProductPaths,
}

impl ProductHandle {
    pub fn code(&self) -> &'static str {
        self.plugin.descriptor().code
    }
}

/// Registered products with their sessions and directories.
pub struct Registry {
    base_dir: PathBuf,
    handles: Vec<ProductHandle>,
}

impl Registry {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            handles: Vec::new(),
        }
    }

    /// Add a product, creating its directories.
    pub async fn register(
        &mut self,
        plugin: Box<dyn ProductPlugin>,
        db: Box<dyn Database>,
    ) -> Result<&mut ProductHandle, CoreError> {
        let descriptor = *plugin.descriptor();
        if self.handles.iter().any(|h| h.code() == descriptor.code) {
            return Err(CoreError::Validation(format!(
                "Product {} registered twice",
                descriptor.code
            )));
        }

        let paths = ProductPaths::new(&self.base_dir, descriptor.folder);
        paths.ensure().await?;
        tracing::info!(
            product = descriptor.code,
            name = descriptor.display_name,
            root = %paths.root.display(),
            "Registered product"
        );

        self.handles.push(ProductHandle {
            plugin,
            db,
            audit: AuditBuffer::new(),
            paths,
        });
        let last = self.handles.len() - 1;
        Ok(&mut self.handles[last])
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut ProductHandle> {
        self.handles
            .iter_mut()
            .find(|h| h.code().eq_ignore_ascii_case(code))
    }

    pub fn handles_mut(&mut self) -> impl Iterator<Item = &mut ProductHandle> {
        self.handles.iter_mut()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.handles.iter().map(ProductHandle::code).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every database session, logging failures.
    pub async fn close_all(&mut self) {
        for handle in &mut self.handles {
            if let Err(e) = handle.db.close().await {
                tracing::warn!(product = handle.code(), error = %e, "Failed to close database session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registration_constructs() {
        let plugins = instantiate(&PluginSettings::default()).unwrap();
        assert_eq!(plugins.len(), REGISTRATIONS.len());
        assert_eq!(plugins[0].descriptor().code, "FASTAG_ACQ");
    }

    #[test]
    fn instantiate_one_by_code() {
        let plugin = instantiate_one("fastag_acq", &PluginSettings::default()).unwrap();
        assert_eq!(plugin.descriptor().folder, "fastagacq");
        assert!(instantiate_one("NOPE", &PluginSettings::default()).is_err());
    }

    #[test]
    fn product_paths_layout() {
        let paths = ProductPaths::new(Path::new("/data/products"), "fastagacq");
        assert_eq!(paths.inbox, Path::new("/data/products/fastagacq/inbox"));
        assert_eq!(paths.logs, Path::new("/data/products/fastagacq/logs"));
    }

    #[tokio::test]
    async fn ensure_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProductPaths::new(tmp.path(), "fastagacq");
        paths.ensure().await.unwrap();
        for dir in [&paths.inbox, &paths.processing, &paths.processed, &paths.failed, &paths.logs] {
            assert!(dir.is_dir());
        }
        paths.ensure().await.unwrap();
    }
}
