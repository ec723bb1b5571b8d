//! Common test utilities and fixtures

#![allow(dead_code)]

use std::sync::Arc;

use gmail_spam_triage::error::Result;
use gmail_spam_triage::prompt::{ClassificationRequest, RequestBuilder};
use gmail_spam_triage::{
    BatchOptions, BatchOrchestrator, LanguageModel, Mailbox, RawMessage, SpamClassifier,
};
use mockall::mock;
use serde_json::json;

/// Create a raw message as a mailbox would return it
pub fn create_raw_message(id: &str, from: &str, subject: &str, labels: &[&str]) -> RawMessage {
    RawMessage {
        id: Some(id.to_string()),
        subject: Some(subject.to_string()),
        from: Some(from.to_string()),
        snippet: Some(format!("Preview of {}", subject)),
        body: None,
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
    }
}

/// A phishing-looking message in the UNREAD label
pub fn create_phishing_message(id: &str) -> RawMessage {
    create_raw_message(
        id,
        "Security Team <security@paypa1-verify.example>",
        "Urgent: verify your account now",
        &["INBOX", "UNREAD"],
    )
}

/// An ordinary work message in the UNREAD label
pub fn create_legitimate_message(id: &str) -> RawMessage {
    create_raw_message(
        id,
        "Alice <alice@company.example>",
        "Notes from today's meeting",
        &["INBOX", "UNREAD"],
    )
}

/// Model response text for a verdict
pub fn verdict_response(is_spam: bool, confidence: f64, spam_type: &str, action: &str) -> String {
    json!({
        "is_spam": is_spam,
        "confidence": confidence,
        "spam_type": spam_type,
        "reasoning": format!("{} with confidence {}", spam_type, confidence),
        "recommended_action": action,
    })
    .to_string()
}

pub fn spam_response(confidence: f64) -> String {
    verdict_response(true, confidence, "phishing", "delete")
}

pub fn legitimate_response() -> String {
    verdict_response(false, 0.99, "legitimate", "keep")
}

/// Orchestrator over the given model with a fixed concurrency
pub fn orchestrator_for<M>(model: M, max_concurrent: usize) -> BatchOrchestrator
where
    M: LanguageModel + 'static,
{
    let classifier = SpamClassifier::new(Arc::new(model), RequestBuilder::default());
    BatchOrchestrator::new(
        Arc::new(classifier),
        BatchOptions {
            max_concurrent,
            timeout: None,
        },
    )
}

// Mock implementation of Mailbox for testing
mock! {
    pub Mailbox {}

    #[async_trait::async_trait]
    impl Mailbox for Mailbox {
        async fn fetch(&self, label: &str, max_count: usize) -> Result<Vec<RawMessage>>;
    }
}

// Mock implementation of LanguageModel for testing
mock! {
    pub LanguageModel {}

    #[async_trait::async_trait]
    impl LanguageModel for LanguageModel {
        async fn complete(&self, request: &ClassificationRequest) -> Result<String>;
    }
}

/// Mailbox that returns `messages` for any label and checks nothing else
pub fn mailbox_returning(messages: Vec<RawMessage>) -> MockMailbox {
    let mut mailbox = MockMailbox::new();
    mailbox
        .expect_fetch()
        .times(1)
        .returning(move |_, max_count| Ok(messages.iter().take(max_count).cloned().collect()));
    mailbox
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_raw_message() {
        let msg = create_raw_message("msg1", "test@example.com", "Test Subject", &["INBOX"]);
        assert_eq!(msg.id.as_deref(), Some("msg1"));
        assert_eq!(msg.from.as_deref(), Some("test@example.com"));
        assert_eq!(msg.label_ids, vec!["INBOX"]);
    }

    #[test]
    fn test_verdict_response_is_json() {
        let value: serde_json::Value = serde_json::from_str(&spam_response(0.9)).unwrap();
        assert_eq!(value["is_spam"], true);
        assert_eq!(value["spam_type"], "phishing");
        assert_eq!(value["recommended_action"], "delete");
    }
}
