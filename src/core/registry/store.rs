use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};

/// On-disk shape: a flat `productId -> absolute executable path` map.
type RegistryDocument = BTreeMap<String, PathBuf>;

/// Persisted mapping from product id to a previously validated executable.
///
/// The document is re-read on every call so hand edits (or deleting the
/// file) take effect immediately. Writes are serialized through `lock` so
/// two products registering at once cannot lose each other's entries.
pub struct LauncherRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LauncherRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered path for `product_id`, only if it still exists on disk.
    ///
    /// A stale entry (file gone) is pruned from the document before
    /// returning `None`.
    pub async fn resolve(&self, product_id: &str) -> Option<PathBuf> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await;
        let registered = document.get(product_id)?.clone();

        if tokio::fs::metadata(&registered)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
        {
            debug!("Registry hit for {product_id}: {:?}", registered);
            return Some(registered);
        }

        info!(
            "Pruning stale registry entry {product_id} -> {:?} (file missing)",
            registered
        );
        document.remove(product_id);
        if let Err(err) = self.write_document(&document).await {
            warn!("Cannot prune stale registry entry {product_id}: {err}");
        }
        None
    }

    /// Persist `product_id -> path`. Best-effort: a write failure is logged
    /// and reported as `false`, never propagated.
    pub async fn remember(&self, product_id: &str, path: &Path) -> bool {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await;
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        document.insert(product_id.to_string(), absolute);

        match self.write_document(&document).await {
            Ok(()) => {
                info!("Registered launcher for {product_id}: {:?}", path);
                true
            }
            Err(err) => {
                warn!("Skipping registry persistence for {product_id}: {err}");
                false
            }
        }
    }

    /// Remove the entry for `product_id`. Returns whether one existed.
    pub async fn forget(&self, product_id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await;
        if document.remove(product_id).is_none() {
            return false;
        }

        if let Err(err) = self.write_document(&document).await {
            warn!("Cannot persist removal of {product_id}: {err}");
        }
        info!("Forgot launcher for {product_id}");
        true
    }

    /// Snapshot of every entry, without existence checks.
    pub async fn entries(&self) -> Vec<(String, PathBuf)> {
        let _guard = self.lock.lock().await;
        self.read_document().await.into_iter().collect()
    }

    /// Read the document; missing or unreadable means empty.
    async fn read_document(&self) -> RegistryDocument {
        match self.try_read_document().await {
            Ok(document) => document,
            Err(err) => {
                warn!("{err}; treating registry as empty");
                RegistryDocument::new()
            }
        }
    }

    async fn try_read_document(&self) -> LauncherResult<RegistryDocument> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryDocument::new())
            }
            Err(err) => {
                return Err(LauncherError::RegistryUnreadable {
                    path: self.path.clone(),
                    message: err.to_string(),
                })
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(RegistryDocument::new());
        }

        serde_json::from_slice(&raw).map_err(|err| LauncherError::RegistryUnreadable {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    async fn write_document(&self, document: &RegistryDocument) -> LauncherResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LauncherError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let json = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| LauncherError::Io {
                path: self.path.clone(),
                source,
            })
    }
}
