//! Classifier invocation: calls the language model and turns its untrusted
//! output into a [`ClassificationVerdict`]

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, SpamError};
use crate::llm::LanguageModel;
use crate::models::{Adjustment, ClassificationVerdict, EmailRecord, RecommendedAction, SpamType};
use crate::prompt::{ClassificationRequest, RequestBuilder};

/// JSON wrapped in a Markdown code fence
static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*\})\s*```").unwrap());

/// Spam classifier backed by a language model
pub struct SpamClassifier {
    model: Arc<dyn LanguageModel>,
    builder: RequestBuilder,
    retry_max_elapsed: Option<Duration>,
}

impl SpamClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, builder: RequestBuilder) -> Self {
        Self {
            model,
            builder,
            retry_max_elapsed: None,
        }
    }

    /// Retry transient provider failures with exponential backoff for at most `max_elapsed`
    pub fn with_retry(mut self, max_elapsed: Duration) -> Self {
        self.retry_max_elapsed = Some(max_elapsed).filter(|d| !d.is_zero());
        self
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    /// Classify one record
    ///
    /// Returns `RequestBuild` or `ClassificationParse` for problems limited to
    /// this record, and provider errors when the model could not be reached.
    pub async fn classify(&self, record: &EmailRecord) -> Result<ClassificationVerdict> {
        let request = self.builder.build(record)?;
        let text = self.invoke(&request).await?;

        let (verdict, adjustments) = parse_verdict(&record.id, &text)?;
        for adjustment in &adjustments {
            warn!("Classifier output for {} adjusted: {}", record.id, adjustment);
        }

        debug!(
            "Classified {}: is_spam={} confidence={:.2} type={} action={}",
            record.id,
            verdict.is_spam(),
            verdict.confidence(),
            verdict.spam_type(),
            verdict.recommended_action()
        );
        Ok(verdict)
    }

    async fn invoke(&self, request: &ClassificationRequest) -> Result<String> {
        let Some(max_elapsed) = self.retry_max_elapsed else {
            return self.model.complete(request).await;
        };

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(Some(max_elapsed))
            .build();

        backoff::future::retry(policy, || async {
            self.model.complete(request).await.map_err(|e| match e {
                SpamError::RateLimitExceeded { retry_after } => {
                    warn!("Model rate limited for {}, retrying after {}s", request.email_id, retry_after);
                    backoff::Error::retry_after(e, Duration::from_secs(retry_after))
                }
                e if e.is_transient() => {
                    warn!("Model call for {} failed: {}. Retrying...", request.email_id, e);
                    backoff::Error::transient(e)
                }
                e => backoff::Error::permanent(e),
            })
        })
        .await
    }
}

/// Parse raw model output into a verdict, coercing what can be coerced
///
/// Fails with `ClassificationParse` only when the text holds no JSON object
/// or when neither `is_spam` nor `spam_type` carries a judgment.
pub fn parse_verdict(email_id: &str, text: &str) -> Result<(ClassificationVerdict, Vec<Adjustment>)> {
    let parse_error = |reason: &str| SpamError::ClassificationParse {
        email_id: email_id.to_string(),
        reason: reason.to_string(),
    };

    let object = extract_json_object(text).ok_or_else(|| parse_error("no JSON object in response"))?;
    let mut adjustments = Vec::new();

    let spam_type = match object.get("spam_type").and_then(spam_type_text) {
        Some(raw) => match SpamType::parse(&raw) {
            Some(spam_type) => Some(spam_type),
            None => {
                adjustments.push(Adjustment::UnknownSpamType(raw));
                Some(SpamType::Other)
            }
        },
        None => None,
    };

    let is_spam = match (object.get("is_spam").and_then(as_bool), spam_type) {
        (Some(is_spam), _) => is_spam,
        (None, Some(spam_type)) => {
            adjustments.push(Adjustment::MissingField("is_spam"));
            spam_type.implies_spam()
        }
        (None, None) => return Err(parse_error("response carries neither is_spam nor spam_type")),
    };

    let spam_type = spam_type.unwrap_or_else(|| {
        adjustments.push(Adjustment::MissingField("spam_type"));
        if is_spam {
            SpamType::Other
        } else {
            SpamType::Legitimate
        }
    });

    let confidence = match object.get("confidence").and_then(as_confidence) {
        Some(confidence) => confidence,
        None => {
            adjustments.push(Adjustment::MissingField("confidence"));
            0.0
        }
    };

    let reasoning = match object.get("reasoning") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let stated_action = match object.get("recommended_action").and_then(Value::as_str) {
        Some(raw) => {
            let parsed = RecommendedAction::parse(raw);
            if parsed.is_none() {
                adjustments.push(Adjustment::UnknownAction(raw.to_string()));
            }
            parsed
        }
        None => None,
    };

    let (verdict, policy_adjustments) =
        ClassificationVerdict::new(email_id, is_spam, confidence, spam_type, reasoning, stated_action);
    adjustments.extend(policy_adjustments);

    Ok((verdict, adjustments))
}

/// Locate the JSON object in a response that may carry fences or prose
fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let text = text.trim();

    let mut candidates: Vec<&str> = vec![text];
    if let Some(captures) = FENCED_JSON.captures(text) {
        if let Some(inner) = captures.get(1) {
            candidates.push(inner.as_str());
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }

    candidates
        .into_iter()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// `spam_type` is either a string or an object with a `category` field
fn spam_type_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("category")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "spam" | "1" => Some(true),
            "false" | "no" | "not spam" | "not_spam" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_confidence(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|n| n as f32),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(percent) => percent.trim().parse::<f32>().ok().map(|p| p / 100.0),
                None => s.parse::<f32>().ok(),
            }
        }
        _ => None,
    }
}
