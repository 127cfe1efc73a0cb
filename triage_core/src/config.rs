//! Configuration file support for the triage tools.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/triage/config.toml`.

use crate::codec::InclusionFlags;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub note: NoteConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Extra protocol/screener definitions merged over the built-in catalog
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub protocol_file: Option<PathBuf>,
}

/// Default note sections included when encoding
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoteConfig {
    #[serde(default = "default_true")]
    pub include_algorithm: bool,

    #[serde(default = "default_true")]
    pub include_decision_making: bool,

    #[serde(default = "default_true")]
    pub include_hpi: bool,
}

impl Default for NoteConfig {
    fn default() -> Self {
        Self {
            include_algorithm: true,
            include_decision_making: true,
            include_hpi: true,
        }
    }
}

impl NoteConfig {
    pub fn inclusion_flags(&self) -> InclusionFlags {
        InclusionFlags {
            algorithm: self.include_algorithm,
            decision_making: self.include_decision_making,
            hpi: self.include_hpi,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| PathBuf::from("."))
    });
    base.join("triage")
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join("triage").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Path of the encounter log inside the data directory
    pub fn encounter_log_path(&self) -> PathBuf {
        self.data.data_dir.join("encounters.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.catalog.protocol_file.is_none());
        assert_eq!(config.note.inclusion_flags(), InclusionFlags::all());
        assert!(config.encounter_log_path().ends_with("encounters.jsonl"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.note.include_hpi = false;
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.data.data_dir, parsed.data.data_dir);
        assert!(!parsed.note.include_hpi);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[note]
include_decision_making = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(!config.note.include_decision_making);
        assert!(config.note.include_algorithm); // default
        assert!(config.note.include_hpi); // default
    }

    #[test]
    fn test_save_and_load_from_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.catalog.protocol_file = Some(PathBuf::from("/tmp/extra.json"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(
            loaded.catalog.protocol_file,
            Some(PathBuf::from("/tmp/extra.json"))
        );
    }
}
