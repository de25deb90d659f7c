//! Configuration file resolution and loading
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`<config dir>/sfp/config.toml`)
//! 4. None: caller falls back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable consulted when no `--config` argument is given
pub const CONFIG_ENV_VAR: &str = "SFP_CONFIG";

/// Resolve which configuration file (if any) should be loaded.
///
/// An explicit path (CLI or environment) is returned even when the file does
/// not exist so that the subsequent load reports a clear error. The per-user
/// default is only returned when present on disk.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    default_config_file().filter(|path| path.exists())
}

/// Default per-user config file location for the platform
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sfp").join("config.toml"))
}

/// Parse a TOML document into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

/// Load and parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    debug!("Parsing config file {}", path.display());
    parse_toml(&content)
}

/// Resolve and load configuration, falling back to `T::default()`.
///
/// Returns the loaded value together with the path it came from (None when
/// built-in defaults were used).
pub fn load_or_default<T>(cli_arg: Option<&Path>, env_var_name: &str) -> Result<(T, Option<PathBuf>)>
where
    T: DeserializeOwned + Default,
{
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            let value = load_toml_file(&path)?;
            info!("Loaded configuration from {}", path.display());
            Ok((value, Some(path)))
        }
        None => {
            info!("No configuration file found, using built-in defaults");
            Ok((T::default(), None))
        }
    }
}
