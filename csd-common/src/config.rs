//! Bootstrap configuration helpers
//!
//! Root folder resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file value
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CSD_RELAY_ROOT";

/// Directory name used under the platform config/data directories
const APP_DIR_NAME: &str = "csd-relay";

/// Logging configuration shared by every binary
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, console only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the root folder that holds the database and mapping file
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    resolve_root_folder_with_env(cli_arg, std::env::var(ROOT_FOLDER_ENV).ok(), toml_value)
}

/// Same as [`resolve_root_folder`] with the environment value passed explicitly
pub fn resolve_root_folder_with_env(
    cli_arg: Option<&Path>,
    env_value: Option<String>,
    toml_value: Option<&Path>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        info!("Root folder: {} (from command line)", path.display());
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Some(path) = env_value.filter(|v| !v.trim().is_empty()) {
        info!("Root folder: {} (from {})", path, ROOT_FOLDER_ENV);
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        info!("Root folder: {} (from config file)", path.display());
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    let path = default_root_folder();
    info!("Root folder: {} (default)", path.display());
    path
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/csd-relay (or /var/lib/csd-relay for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/var/lib").join(APP_DIR_NAME))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support").join(APP_DIR_NAME))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData").join(APP_DIR_NAME))
    } else {
        PathBuf::from("./csd_relay_data")
    }
}

/// Locate the default config file, if one exists on disk
///
/// Checks `~/.config/csd-relay/<file_name>` then `/etc/csd-relay/<file_name>`.
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and deserialize a TOML file
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse TOML {}: {}", path.display(), e)))
}

/// Load a TOML file if one is given or found, otherwise fall back to defaults
///
/// A missing default file is not an error; an explicitly named file that
/// cannot be read or parsed is.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(
    explicit: Option<&Path>,
    default_file_name: &str,
) -> Result<(T, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = load_toml_file(path)?;
        info!("Loaded configuration from {}", path.display());
        return Ok((config, Some(path.to_path_buf())));
    }

    match default_config_path(default_file_name) {
        Some(path) => {
            let config = load_toml_file(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok((config, Some(path)))
        }
        None => {
            warn!("No {} found, using built-in defaults", default_file_name);
            Ok((T::default(), None))
        }
    }
}
