//! Settings

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

/// Settings loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    /// IO error reading the settings file
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// How long a refreshed draft line price stays valid.
    pub draft_line_price_freshness_hours: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            draft_line_price_freshness_hours: 24,
        }
    }
}

impl Settings {
    /// Parse settings from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Yaml`] if the YAML is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        Ok(serde_norway::from_str(yaml)?)
    }

    /// Load settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }
}
