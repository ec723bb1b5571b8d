use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SpamError};
use crate::prompt::{DEFAULT_MAX_EXCERPT_CHARS, DEFAULT_TEMPERATURE};

/// Upper bound on `mailbox.max_emails`, matching the Gmail list page size
pub const MAX_EMAILS_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_max_emails")]
    pub max_emails: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            max_emails: default_max_emails(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 0 disables retrying transient provider errors
    #[serde(default)]
    pub retry_max_elapsed_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_excerpt_chars: default_max_excerpt_chars(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_max_elapsed_secs: 0,
        }
    }
}

impl ClassifierConfig {
    pub fn retry_max_elapsed(&self) -> Option<Duration> {
        (self.retry_max_elapsed_secs > 0).then(|| Duration::from_secs(self.retry_max_elapsed_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            timeout_secs: None,
        }
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_label() -> String {
    "INBOX".to_string()
}

fn default_max_emails() -> usize {
    20
}

fn default_max_concurrent_fetches() -> usize {
    10
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    512
}

fn default_max_excerpt_chars() -> usize {
    DEFAULT_MAX_EXCERPT_CHARS
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_requests() -> usize {
    1
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SpamError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SpamError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SpamError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SpamError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| SpamError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.mailbox.label.trim().is_empty() {
            return Err(SpamError::ConfigError(
                "mailbox.label cannot be empty".to_string(),
            ));
        }
        if self.mailbox.max_emails == 0 {
            return Err(SpamError::ConfigError(
                "mailbox.max_emails must be at least 1".to_string(),
            ));
        }
        if self.mailbox.max_emails > MAX_EMAILS_LIMIT {
            return Err(SpamError::ConfigError(format!(
                "mailbox.max_emails cannot exceed {}",
                MAX_EMAILS_LIMIT
            )));
        }

        // Gmail allows 250 quota units/sec; a metadata get costs 5
        if self.mailbox.max_concurrent_fetches == 0 {
            return Err(SpamError::ConfigError(
                "mailbox.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.mailbox.max_concurrent_fetches > 50 {
            return Err(SpamError::ConfigError(
                "mailbox.max_concurrent_fetches cannot exceed 50 (to stay under Gmail API rate limits of 250 units/sec)".to_string(),
            ));
        }

        if !(self.classifier.base_url.starts_with("http://")
            || self.classifier.base_url.starts_with("https://"))
        {
            return Err(SpamError::ConfigError(format!(
                "Invalid classifier.base_url: '{}'. Must start with http:// or https://",
                self.classifier.base_url
            )));
        }
        if self.classifier.model.trim().is_empty() {
            return Err(SpamError::ConfigError(
                "classifier.model cannot be empty".to_string(),
            ));
        }
        if self.classifier.api_key_env.trim().is_empty() {
            return Err(SpamError::ConfigError(
                "classifier.api_key_env cannot be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(SpamError::ConfigError(
                "classifier.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.classifier.max_tokens == 0 {
            return Err(SpamError::ConfigError(
                "classifier.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.classifier.max_excerpt_chars == 0 {
            return Err(SpamError::ConfigError(
                "classifier.max_excerpt_chars must be greater than 0".to_string(),
            ));
        }
        if self.classifier.request_timeout_secs == 0 {
            return Err(SpamError::ConfigError(
                "classifier.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.batch.max_concurrent_requests == 0 {
            return Err(SpamError::ConfigError(
                "batch.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.batch.max_concurrent_requests > 16 {
            return Err(SpamError::ConfigError(
                "batch.max_concurrent_requests cannot exceed 16".to_string(),
            ));
        }
        if self.batch.timeout_secs == Some(0) {
            return Err(SpamError::ConfigError(
                "batch.timeout_secs must be greater than 0 when set".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        Self::default().save(path).await
    }
}
