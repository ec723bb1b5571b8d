//! Language model capability and its OpenAI-compatible HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::{from_status, Result, SpamError};
use crate::prompt::ClassificationRequest;

/// Trait defining the language model call for easier testing
///
/// Implementations return the raw response text. Structural validation is
/// the classifier's job; errors returned here are provider failures.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &ClassificationRequest) -> Result<String>;
}

/// Chat-completions client for OpenAI and compatible endpoints
#[derive(Clone)]
pub struct OpenAiCompatibleModel {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens,
        }
    }

    /// Build the client from configuration, reading the API key from the environment
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("gmail-spam-triage/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SpamError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; requests to {} are sent without credentials",
                config.api_key_env,
                config.base_url
            );
        }

        Ok(Self::new(
            http,
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.max_tokens,
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, request: &ClassificationRequest) -> Result<String> {
        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: request.user_prompt.clone(),
                },
            ],
            temperature: request.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                r#type: "json_object".into(),
            },
        };

        debug!("Requesting classification for {} from {}", request.email_id, self.model);

        let mut call = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            call = call.bearer_auth(api_key);
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let detail = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), provider_message(&detail));
            return Err(from_status(status.as_u16(), message, retry_after.as_deref()));
        }

        // The provider answered; anything unusable from here on belongs to this email only
        let body = response.text().await?;
        let unusable = |reason: String| SpamError::ClassificationParse {
            email_id: request.email_id.clone(),
            reason,
        };

        let completion: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| unusable(format!("undecodable completion body: {}", e)))?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .ok_or_else(|| unusable("completion has no choices".to_string()))?;

        match message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(unusable(match message.refusal {
                Some(refusal) => format!("model refused: {}", refusal),
                None => "completion has no message content".to_string(),
            })),
        }
    }
}

/// Extract the provider's error message from an error body when present
fn provider_message(body: &str) -> String {
    serde_json::from_str::<ProviderError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatCompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}
