//! Current mapping configuration with atomic whole-file reload

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::config::{ConfigError, MappingConfiguration};

/// Holds the active mapping configuration
///
/// Readers take an `Arc` snapshot and keep using it for the whole mapping
/// run, so a concurrent reload never changes a configuration mid-use.
pub struct MappingStore {
    path: PathBuf,
    current: RwLock<Arc<MappingConfiguration>>,
}

impl MappingStore {
    /// Load the mapping file; any error is fatal to the caller
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = MappingConfiguration::load(path)?;
        info!(
            path = %path.display(),
            version = %config.version,
            rules = config.rules.len(),
            "Loaded field mapping"
        );
        Ok(Self::new(path.to_path_buf(), config))
    }

    /// Wrap an already validated configuration
    pub fn new(path: PathBuf, config: MappingConfiguration) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the active configuration
    pub async fn current(&self) -> Arc<MappingConfiguration> {
        self.current.read().await.clone()
    }

    /// Re-read the mapping file and swap it in
    ///
    /// The new document is fully parsed and validated before the swap; on
    /// error the previous configuration stays active.
    pub async fn reload(&self) -> Result<Arc<MappingConfiguration>, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;

        let config = match MappingConfiguration::from_json_str(&text) {
            Ok(config) => Arc::new(config),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Mapping reload rejected");
                return Err(e);
            }
        };

        let previous = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, config.clone())
        };

        info!(
            from_version = %previous.version,
            to_version = %config.version,
            rules = config.rules.len(),
            "Reloaded field mapping"
        );
        Ok(config)
    }
}
