//! JSON snapshot of the in-memory store
//!
//! Loaded once at boot and written back by the periodic sweep and on
//! shutdown. A missing or unreadable file starts the relay empty.

use super::memory::StoreData;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};

/// Snapshot file manager
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load store contents, falling back to empty data
    pub async fn load(&self) -> StoreData {
        if !self.path.exists() {
            debug!("Snapshot file does not exist: {:?}", self.path);
            return StoreData::default();
        }

        match fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => {
                    debug!("Loaded store snapshot from {:?}", self.path);
                    data
                }
                Err(e) => {
                    warn!("Error parsing snapshot {:?}: {}", self.path, e);
                    StoreData::default()
                }
            },
            Err(e) => {
                warn!("Failed to read snapshot {:?}: {}", self.path, e);
                StoreData::default()
            }
        }
    }

    /// Write store contents, creating parent directories
    pub async fn save(&self, data: &StoreData) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;

        if let Some(parent) = self.path.parent()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            error!("Failed to create snapshot directory {:?}: {}", parent, e);
            return Err(Error::internal(format!(
                "snapshot directory creation failed: {}",
                e
            )));
        }

        // Write then rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!("Store snapshot saved to {:?}", self.path);
        Ok(())
    }
}
