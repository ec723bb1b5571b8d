//! Snapshot mailbox through the HTTP model client against a local mock server

use std::sync::Arc;

use gmail_spam_triage::{
    classify_spam_workflow, BatchOptions, BatchOrchestrator, OpenAiCompatibleModel,
    RecommendedAction, RequestBuilder, SnapshotMailbox, SpamClassifier, SpamError, SpamType,
    WorkflowOptions,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SNAPSHOT: &str = r#"[
    {"id": "a1", "subject": "You won a prize", "from": "lottery@win.example", "snippet": "Claim your reward", "labelIds": ["UNREAD"]},
    {"id": "a2", "subject": "Quarterly planning", "from": "boss@company.example", "snippet": "Agenda attached", "labelIds": ["UNREAD"]},
    {"id": "a3", "subject": "Archived thread", "from": "old@company.example", "labelIds": ["INBOX"]}
]"#;

fn completion(content: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content.to_string()}}]
    }))
}

fn orchestrator(server: &MockServer) -> BatchOrchestrator {
    let model = OpenAiCompatibleModel::new(
        reqwest::Client::new(),
        format!("{}/v1", server.uri()),
        Some("test-key".to_string()),
        "test-model",
        256,
    );
    let classifier = SpamClassifier::new(Arc::new(model), RequestBuilder::default());
    BatchOrchestrator::new(
        Arc::new(classifier),
        BatchOptions {
            max_concurrent: 2,
            timeout: None,
        },
    )
}

fn unread(max_emails: usize) -> WorkflowOptions {
    WorkflowOptions {
        max_emails,
        label: "unread".to_string(),
    }
}

#[tokio::test]
async fn test_snapshot_classified_through_http_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("You won a prize"))
        .respond_with(completion(json!({
            "is_spam": true,
            "confidence": 0.92,
            "spam_type": "scam",
            "reasoning": "Unsolicited prize claim",
            "recommended_action": "delete"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Quarterly planning"))
        .respond_with(completion(json!({
            "is_spam": false,
            "confidence": 0.97,
            "spam_type": "legitimate",
            "reasoning": "Internal work email",
            "recommended_action": "keep"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mailbox = SnapshotMailbox::from_json(SNAPSHOT).unwrap();
    let report = classify_spam_workflow(&mailbox, &orchestrator(&server), &unread(10))
        .await
        .unwrap();

    assert_eq!(report.total_processed(), 2);
    assert_eq!(report.spam_count(), 1);
    assert_eq!(report.spam_percentage(), 50.0);

    let first = &report.verdicts()[0];
    assert_eq!(first.record.id, "a1");
    assert_eq!(first.verdict.spam_type(), SpamType::Scam);
    assert_eq!(first.verdict.recommended_action(), RecommendedAction::Delete);

    let second = &report.verdicts()[1];
    assert_eq!(second.record.id, "a2");
    assert_eq!(second.verdict.recommended_action(), RecommendedAction::Keep);

    let document: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(document["label"], "unread");
    assert_eq!(document["emails"][0]["email_id"], "a1");
    assert_eq!(document["emails"][1]["recommended_action"], "keep");
}

#[tokio::test]
async fn test_server_error_aborts_without_report() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .mount(&server)
        .await;

    let mailbox = SnapshotMailbox::from_json(SNAPSHOT).unwrap();
    let err = classify_spam_workflow(&mailbox, &orchestrator(&server), &unread(10))
        .await
        .unwrap_err();

    assert!(matches!(err, SpamError::ServerError { status: 503, .. }));
}

#[tokio::test]
async fn test_refused_completion_becomes_sentinel_for_that_email_only() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("You won a prize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": null, "refusal": "I can't assist with that."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Quarterly planning"))
        .respond_with(completion(json!({
            "is_spam": false,
            "confidence": 0.97,
            "spam_type": "legitimate",
            "reasoning": "Internal work email",
            "recommended_action": "keep"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mailbox = SnapshotMailbox::from_json(SNAPSHOT).unwrap();
    let report = classify_spam_workflow(&mailbox, &orchestrator(&server), &unread(10))
        .await
        .unwrap();

    assert_eq!(report.total_processed(), 2);
    assert_eq!(report.spam_count(), 0);
    assert_eq!(report.not_spam_count(), 2);

    let refused = &report.verdicts()[0].verdict;
    assert_eq!(refused.email_id(), "a1");
    assert!(refused.is_sentinel());
    assert_eq!(refused.spam_type(), SpamType::Other);
    assert_eq!(refused.confidence(), 0.0);
    assert_eq!(refused.recommended_action(), RecommendedAction::Review);

    let answered = &report.verdicts()[1].verdict;
    assert!(!answered.is_sentinel());
    assert_eq!(answered.recommended_action(), RecommendedAction::Keep);
}
