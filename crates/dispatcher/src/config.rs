use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval_secs: u64,
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            delivery_interval_secs: 30,
            expiry_interval_secs: 600,
            reminder_interval_secs: 3600,
            batch_size: 50,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Optional outbound webhook. With no URL configured, notifications are
/// in-app only and delivery just flips them to `sent`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

fn default_delivery_interval() -> u64 {
    30
}

fn default_expiry_interval() -> u64 {
    600
}

fn default_reminder_interval() -> u64 {
    3600
}

fn default_batch_size() -> i64 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// Get the dispatcher config file path
pub fn config_path() -> PathBuf {
    std::env::var("QUIZHUB_DISPATCHER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dispatcher.toml"))
}

/// Load dispatcher config from disk
pub fn load_config() -> Result<DispatcherConfig> {
    let path = config_path();
    if !path.exists() {
        return Ok(DispatcherConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read dispatcher config at {}", path.display()))?;
    let config: DispatcherConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse dispatcher config at {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serialize_and_parse() {
        let config = DispatcherConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("delivery_interval_secs = 30"));
        assert!(toml_str.contains("reminder_interval_secs = 3600"));

        let parsed: DispatcherConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.dispatcher.batch_size, 50);
        assert_eq!(parsed.database.data_dir, "data");
        assert!(parsed.webhook.url.is_empty());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: DispatcherConfig = toml::from_str(
            "[dispatcher]\ndelivery_interval_secs = 5\n\n[webhook]\nurl = \"http://hook\"\n",
        )
        .unwrap();
        assert_eq!(parsed.dispatcher.delivery_interval_secs, 5);
        assert_eq!(parsed.dispatcher.expiry_interval_secs, 600);
        assert_eq!(parsed.webhook.url, "http://hook");
    }
}
