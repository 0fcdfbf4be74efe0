use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub storage: StorageConfig,
    pub transcription: TranscriptionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the HTTP API binds to.
    pub port: u16,
    /// Externally reachable base URL, used to build webhook callback URLs
    /// handed to transcription backends.
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret that inbound provider callbacks must present in the
    /// X-Webhook-Secret header.
    pub secret: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to the platform data dir.
    pub db_path: Option<PathBuf>,
    /// Directory uploaded audio is stored under. Defaults to the platform
    /// data dir.
    pub media_dir: Option<PathBuf>,
    /// Base URL uploaded audio is served from.
    pub media_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Provider tried first by the registry.
    pub default_provider: String,
    pub language: Option<String>,
    /// Analytical features requested on submission. Providers lacking a
    /// requested feature are skipped during selection.
    pub diarization: bool,
    pub sentiment: bool,
    pub topics: bool,
    pub entities: bool,
    pub highlights: bool,
    pub chapters: bool,
    /// Per-call timeout for outbound backend requests, in seconds.
    pub request_timeout_seconds: u64,
    pub assemblyai: ProviderSettings,
    pub whisper_api: ProviderSettings,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3737,
            public_url: "http://127.0.0.1:3737".to_string(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            default_provider: "assemblyai".to_string(),
            language: Some("en".to_string()),
            diarization: true,
            sentiment: true,
            topics: true,
            entities: true,
            highlights: true,
            chapters: true,
            request_timeout_seconds: 30,
            assemblyai: ProviderSettings::default(),
            whisper_api: ProviderSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }

    /// Callback URL a backend should POST status updates to.
    pub fn webhook_url(&self, provider: &str) -> String {
        format!(
            "{}/webhooks/{}",
            self.server.public_url.trim_end_matches('/'),
            provider
        )
    }
}
