//! Configuration file support for the server.
//!
//! Settings come from a TOML file with serde defaults for every field, so an
//! empty (or absent) file yields a runnable development configuration. The
//! provider API key may also come from the `ANTHROPIC_API_KEY` environment
//! variable, which wins over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use time::Duration;
use tokenscope::pricing::{ModelRates, RateTable};

use crate::cleanup::CleanupConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub listen: String,
    /// SQLite database path.
    pub db_path: PathBuf,
    pub session: SessionSettings,
    pub provider: ProviderSettings,
    pub pricing: PricingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    /// Cookie carrying the session token.
    pub cookie_name: String,
    /// Days of inactivity before a session is eligible for hard deletion.
    pub retention_days: u32,
    /// Hours of inactivity before a session is eligible for deactivation.
    pub inactivity_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub api_key: Option<String>,
    /// Override for the provider API base URL.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PricingSettings {
    /// Fallback rate for unlisted models. Omit to make unknown models an error.
    pub default: Option<ModelRates>,
    pub models: Vec<RateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateEntry {
    pub provider: String,
    pub model: String,
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8001".to_string(),
            db_path: PathBuf::from("tokenscope.db"),
            session: SessionSettings::default(),
            provider: ProviderSettings::default(),
            pricing: PricingSettings::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "tokenscope_session".to_string(),
            retention_days: 7,
            inactivity_hours: 24,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
            timeout_seconds: 60,
            api_key: None,
            base_url: None,
        }
    }
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            default: None,
            models: vec![RateEntry {
                provider: "anthropic".to_string(),
                model: "claude-3-5-sonnet-20241022".to_string(),
                prompt_per_1k: 0.003,
                completion_per_1k: 0.015,
            }],
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or fall back to defaults when no path is given.
    /// The `ANTHROPIC_API_KEY` environment variable overrides the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                config.provider.api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn retention_window(&self) -> Duration {
        Duration::days(self.session.retention_days as i64)
    }

    pub fn inactivity_window(&self) -> Duration {
        Duration::hours(self.session.inactivity_hours as i64)
    }

    pub fn cleanup(&self) -> CleanupConfig {
        CleanupConfig {
            retention_window: self.retention_window(),
            inactivity_window: self.inactivity_window(),
        }
    }

    /// Build the rate table from the pricing section.
    pub fn rate_table(&self) -> RateTable {
        let mut table = RateTable::new();
        if let Some(default) = self.pricing.default {
            table = table.with_default(default);
        }
        for entry in &self.pricing.models {
            table.insert(
                entry.provider.clone(),
                entry.model.clone(),
                ModelRates {
                    prompt_per_1k: entry.prompt_per_1k,
                    completion_per_1k: entry.completion_per_1k,
                },
            );
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_runnable() {
        let config = ServerConfig::default();
        assert_eq!(config.session.retention_days, 7);
        assert_eq!(config.session.inactivity_hours, 24);
        assert_eq!(config.retention_window(), Duration::days(7));

        let table = config.rate_table();
        let cost = table
            .cost_usd("anthropic", "claude-3-5-sonnet-20241022", 1000, 500)
            .unwrap();
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn parses_full_toml() {
        let raw = r#"
            listen = "127.0.0.1:9000"
            db_path = "/tmp/usage.db"

            [session]
            cookie_name = "sid"
            retention_days = 14
            inactivity_hours = 48

            [provider]
            model = "claude-3-5-haiku-20241022"
            max_tokens = 512
            timeout_seconds = 30

            [pricing]
            default = { prompt_per_1k = 0.001, completion_per_1k = 0.005 }
            models = [
                { provider = "anthropic", model = "claude-3-5-haiku-20241022", prompt_per_1k = 0.0008, completion_per_1k = 0.004 },
            ]
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.session.retention_days, 14);
        assert_eq!(config.provider.model, "claude-3-5-haiku-20241022");

        // Fallback pricing is configured, so unknown models are priced.
        let table = config.rate_table();
        assert!(table.cost_usd("anthropic", "unknown-model", 1000, 0).is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"listen = "127.0.0.1:9000""#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.session.cookie_name, "tokenscope_session");
        assert_eq!(config.session.retention_days, 7);
    }
}
