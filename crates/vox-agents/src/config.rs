//! Layered configuration: built-in defaults, then
//! `~/.config/vox/config.toml`, then `VOX_*` environment variables
//! (`__` separates nested keys, e.g. `VOX_API__API_KEY`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use vox_core::{ClientConfig, RateLimitConfig, RetryPolicy};
use vox_tools::WebSearchConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Answer clearly and concisely. \
When context from tools is provided, prefer it over your own knowledge for anything time-sensitive.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub rate_limit: RateLimitConfig,
    pub retry: RetrySettings,
    pub search: SearchSettings,
    pub agent: AgentSettings,
}

/// Chat-completion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retry every failure, not just transient ones
    pub retry_all_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            retry_all_errors: policy.retry_all_errors,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            retry_all_errors: settings.retry_all_errors,
        }
    }
}

/// Web search API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let defaults = WebSearchConfig::default();
        Self {
            api_key: None,
            endpoint: defaults.endpoint,
            max_results: defaults.max_results,
        }
    }
}

impl From<&SearchSettings> for WebSearchConfig {
    fn from(settings: &SearchSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            endpoint: settings.endpoint.clone(),
            max_results: settings.max_results,
            ..Self::default()
        }
    }
}

/// Agent pipeline behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub system_prompt: String,
    /// Findings kept in the enhanced prompt
    pub max_context_results: usize,
    pub enable_web_search: bool,
    pub enable_calculator: bool,
    pub enable_datetime: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_context_results: 5,
            enable_web_search: true,
            enable_calculator: true,
            enable_datetime: true,
        }
    }
}

impl Settings {
    /// Load from the default config file and the environment.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load with `path` as the config file. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("VOX_").split("__"))
            .extract()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("vox").join("config.toml"))
    }

    /// Settings for the completion client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            model: Some(self.api.model.clone()),
            max_tokens: self.api.max_tokens,
            temperature: self.api.temperature,
            rate_limit: self.rate_limit,
            retry: RetryPolicy::from(&self.retry),
            ..ClientConfig::default()
        }
    }

    /// Render these settings as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api.max_tokens, 1000);
        assert_eq!(settings.rate_limit.requests_per_minute, 60);
        assert_eq!(settings.rate_limit.tokens_per_minute, 90_000);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.base_delay_ms, 1000);
        assert_eq!(settings.retry.max_delay_ms, 30_000);
        assert!(settings.retry.retry_all_errors);
        assert_eq!(settings.search.endpoint, "https://api.tavily.com/search");
        assert_eq!(settings.agent.max_context_results, 5);
    }

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [api]
                api_key = "sk-file"
                model = "gpt-4o"

                [rate_limit]
                requests_per_minute = 10

                [agent]
                enable_web_search = false
                "#,
            )?;
            jail.set_env("VOX_API__API_KEY", "sk-env");
            jail.set_env("VOX_RETRY__MAX_RETRIES", "5");

            let settings = Settings::load_from(Path::new("config.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.api.api_key.as_deref(), Some("sk-env"));
            assert_eq!(settings.api.model, "gpt-4o");
            assert_eq!(settings.rate_limit.requests_per_minute, 10);
            assert_eq!(settings.rate_limit.tokens_per_minute, 90_000);
            assert_eq!(settings.retry.max_retries, 5);
            assert!(!settings.agent.enable_web_search);
            assert!(settings.agent.enable_calculator);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_| {
            let settings = Settings::load_from(Path::new("absent.toml"))
                .map_err(|e| e.to_string())?;
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn test_client_config_conversion() {
        let mut settings = Settings::default();
        settings.retry.base_delay_ms = 250;
        settings.retry.retry_all_errors = false;
        let config = settings.client_config();

        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert!(!config.retry.retry_all_errors);
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings::default();
        let rendered = settings.to_toml().unwrap();
        assert!(rendered.contains("[rate_limit]"));
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }
}
