//! Configuration file discovery and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

/// Resolve the settings file following this priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform config directory, if the file exists there
///
/// Returns `None` when nothing is found; callers fall back to built-in defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let candidate = default_config_path()?;
    if candidate.exists() {
        Some(candidate)
    } else {
        debug!("No config file at {}", candidate.display());
        None
    }
}

/// Platform default location of the settings file
///
/// `~/.config/rivulet/pipeline.toml` on Linux, the equivalent application
/// config directory on macOS and Windows.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rivulet").join(CONFIG_FILE_NAME))
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read {}: {}", path.display(), e))
    })?;
    let value = toml::from_str(&content)?;
    Ok(value)
}
