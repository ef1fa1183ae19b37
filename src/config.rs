use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub prompt: String,
    // Prefix transcript lines with their local timestamp
    pub timestamps: bool,
}

/// Session identity shown by `whoami`/`debug`. All fields optional.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub tenant_id: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            prompt: "> ".to_string(),
            timestamps: false,
        }
    }
}

impl Config {
    /// Load `config.toml` from the data directory, writing the defaults on
    /// first run.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.toml");

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(data_dir)?;
            Ok(config)
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let content = toml::to_string_pretty(self)?;
        fs::write(data_dir.join("config.toml"), content)?;
        Ok(())
    }
}

/// Default data directory, `~/.puterm`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".puterm")
}
