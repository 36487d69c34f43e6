use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

/// On-disk settings, stored as JSON under the platform config directory.
/// Everything is optional; the environment wins over the file for the
/// API key.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub groq_api_key: Option<String>,
    pub model: Option<String>,
    pub database_dir: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, content)?;
        Ok(())
    }

    /// Persist a working API key so it survives the session.
    pub fn save_api_key(key: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_default();
        config.groq_api_key = Some(key.to_string());
        config.save()
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("dbchat").join("config.json"))
    }
}
