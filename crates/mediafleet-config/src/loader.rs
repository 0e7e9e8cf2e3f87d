//! YAML loading and environment overrides.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::ManagerConfig;
use crate::validate::validate;

/// Path used when no configuration file is supplied.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

const ENV_LOG_LEVEL: &str = "MEDIAFLEET_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "MEDIAFLEET_LOG_FORMAT";
const ENV_REGISTRY_ADDRESS: &str = "MEDIAFLEET_REGISTRY_ADDRESS";
const ENV_DOWNLOAD_DIR: &str = "MEDIAFLEET_DOWNLOAD_DIR";

/// Load, override from the process environment, and validate a configuration file.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not valid YAML for the
/// model, or fails validation.
pub fn load(path: &Path) -> ConfigResult<ManagerConfig> {
    load_with(path, |name| std::env::var(name).ok())
}

/// Like [`load`], reading overrides through `lookup` instead of the process environment.
///
/// # Errors
///
/// See [`load`].
pub fn load_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> ConfigResult<ManagerConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "config.read",
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        source,
    })?;
    let config = apply_overrides(config, lookup);
    validate(&config)?;
    debug!(path = %path.display(), name = %config.name, "configuration loaded");
    Ok(config)
}

/// Parse a configuration document without touching the filesystem or environment.
///
/// # Errors
///
/// Returns an error when the document is not valid YAML for the model or fails
/// validation.
pub fn from_yaml_str(text: &str) -> ConfigResult<ManagerConfig> {
    let config: ManagerConfig =
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides on top of a parsed document.
#[must_use]
pub fn apply_overrides(
    mut config: ManagerConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ManagerConfig {
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
    if let Some(format) = lookup(ENV_LOG_FORMAT) {
        config.logging.format = Some(format);
    }
    if let Some(address) = lookup(ENV_REGISTRY_ADDRESS) {
        config.registry.address = address;
    }
    if let Some(dir) = lookup(ENV_DOWNLOAD_DIR) {
        config.storage.download_dir = PathBuf::from(dir);
    }
    config
}
