//! Config file loading
//!
//! A successfully loaded config has always been validated. The file path is
//! part of every error message.

use std::path::Path;

use tracing::info;

use super::file::GovernorFile;
use super::validation::{self, ConfigError};

/// Load a [`GovernorFile`] from a TOML file on disk.
pub fn load_from_file(path: &Path) -> Result<GovernorFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    let file = load_from_str(&content, &path.display().to_string())?;
    info!(
        "Loaded config from {}: {} device(s)",
        path.display(),
        file.devices.len()
    );
    Ok(file)
}

/// Load a [`GovernorFile`] from a TOML string. `source_name` is used in errors.
pub fn load_from_str(content: &str, source_name: &str) -> Result<GovernorFile, ConfigError> {
    let file: GovernorFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&file).map_err(ConfigError::summarize)?;

    Ok(file)
}
