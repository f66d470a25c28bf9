//! Configuration management for the Marmot CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use marmot_quant::BlkQuantType;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Quantization variant: "symmetric" or "asymmetric"
    pub quant_type: QuantTypeConfig,

    /// Worker threads for per-column quantization; defaults to all cores
    pub threads: Option<usize>,
}

/// Serializable name for the quantization variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantTypeConfig {
    /// Implicit midpoint zero-point, scale from the largest magnitude
    Symmetric,
    /// Explicit 8-bit zero-point, scale from the true min/max range
    Asymmetric,
}

impl From<QuantTypeConfig> for BlkQuantType {
    fn from(value: QuantTypeConfig) -> Self {
        match value {
            QuantTypeConfig::Symmetric => BlkQuantType::Q4Sym,
            QuantTypeConfig::Asymmetric => BlkQuantType::Q4Zp8,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quant_type: QuantTypeConfig::Symmetric,
            threads: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
            .join("marmot")
            .join("config.toml")
    }
}
