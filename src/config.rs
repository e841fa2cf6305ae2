use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::api_client::{Connector, DEFAULT_BASE_URL};

pub const ENV_APP_ID: &str = "APPSHEET_APP_ID";
pub const ENV_ACCESS_KEY: &str = "APPSHEET_ACCESS_KEY";
pub const ENV_BASE_URL: &str = "APPSHEET_BASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// AppSheet application ID (Settings > Integrations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Application Access Key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// API root, change for regional endpoints
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Pretty,
    Table,
    Csv,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            access_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pretty,
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults when
    /// no file has been written yet. Environment overrides are applied.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        let mut config = if config_path.exists() {
            Self::read_file(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from an explicit path; the file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(app_id) = lookup(ENV_APP_ID) {
            self.connection.app_id = Some(app_id);
        }
        if let Some(access_key) = lookup(ENV_ACCESS_KEY) {
            self.connection.access_key = Some(access_key);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.connection.base_url = base_url;
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;

        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("appsheet-client").join("config.toml"))
    }

    /// Build a connector from the configured credentials.
    pub fn connector(&self) -> Result<Connector> {
        let Some(app_id) = self.connection.app_id.as_deref() else {
            bail!("No AppSheet app ID configured (set connection.app_id or {ENV_APP_ID})");
        };
        let Some(access_key) = self.connection.access_key.as_deref() else {
            bail!("No AppSheet access key configured (set connection.access_key or {ENV_ACCESS_KEY})");
        };

        Ok(Connector::new(app_id, access_key).with_base_url(&self.connection.base_url))
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        r#"# AppSheet client configuration
# Location: ~/.config/appsheet-client/config.toml (Linux)
#           ~/Library/Application Support/appsheet-client/config.toml (macOS)
#           %APPDATA%\appsheet-client\config.toml (Windows)
#
# APPSHEET_APP_ID, APPSHEET_ACCESS_KEY and APPSHEET_BASE_URL override
# the values below.

[connection]
# App ID, shown under Settings > Integrations once the API is enabled
# app_id = "00000000-0000-0000-0000-000000000000"

# One of the app's unexpired Application Access Keys
# access_key = "V2-xxxxx-xxxxx-xxxxx"

# API root. Use e.g. "https://eu.appsheet.com/api/v2" for a regional endpoint
base_url = "https://api.appsheet.com/api/v2"

[output]
# How responses are printed: "json", "pretty", "table" or "csv"
format = "pretty"
"#
        .to_string()
    }
}
