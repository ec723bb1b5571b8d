//! Gmail mailbox with rate limiting and retry logic

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use google_gmail1::api::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{GmailHub, READONLY_SCOPE};
use crate::error::{Result, SpamError};
use crate::mailbox::Mailbox;
use crate::models::RawMessage;

/// Largest page the messages.list endpoint returns
const MAX_PAGE_SIZE: usize = 500;

/// Label info returned from Gmail API
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Read-only Gmail mailbox
///
/// This implementation includes:
/// - Semaphore-based rate limiting
/// - Exponential backoff retry on transient errors
/// - Concurrent metadata fetching that keeps list order
pub struct GmailMailbox {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    max_concurrent: usize,
}

impl GmailMailbox {
    /// Create a new Gmail mailbox
    ///
    /// # Arguments
    /// * `hub` - Gmail API hub instance
    /// * `max_concurrent` - Maximum concurrent metadata requests
    pub fn new(hub: GmailHub, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", 3, || async {
            let timeout_duration = Duration::from_secs(30);
            let api_call = async {
                debug!("Calling Gmail API to list labels...");
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope(READONLY_SCOPE)
                    .doit()
                    .await
            };

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Gmail API list_labels call timed out after {:?}", timeout_duration);
                    return Err(SpamError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            Ok(response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect())
        })
        .await
    }

    /// List up to `max_count` message ids carrying `label_id`
    async fn list_message_ids(&self, label_id: &str, max_count: usize) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        while all_ids.len() < max_count {
            let page_size = (max_count - all_ids.len()).min(MAX_PAGE_SIZE) as u32;
            let token = page_token.clone();

            let (_, response) = Self::with_retry("list_messages", 3, || {
                let token = token.clone();
                async move {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list("me")
                        .add_label_ids(label_id)
                        .max_results(page_size);
                    if let Some(token) = token.as_deref() {
                        call = call.page_token(token);
                    }
                    Ok(call.add_scope(READONLY_SCOPE).doit().await?)
                }
            })
            .await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|msg_ref| msg_ref.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        all_ids.truncate(max_count);
        Ok(all_ids)
    }

    /// Fetch one message's metadata; `None` when it vanished since listing
    async fn fetch_single_with_retry(&self, id: &str) -> Result<Option<RawMessage>> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            SpamError::ApiError(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        let result = Self::with_retry("get_message", 3, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await?;
            Ok(msg)
        })
        .await;

        match result {
            Ok(msg) => Ok(Some(parse_message(msg))),
            Err(SpamError::MessageNotFound(_)) => {
                warn!("Message {} disappeared before it could be fetched; skipping", id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &SpamError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    let wait = match &e {
                        SpamError::RateLimitExceeded { retry_after } => {
                            delay.max(Duration::from_secs(*retry_after))
                        }
                        _ => delay,
                    };
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Find a label by id, or by display name ignoring case
pub fn resolve_label(labels: &[LabelInfo], wanted: &str) -> Option<String> {
    let wanted = wanted.trim();
    labels
        .iter()
        .find(|label| label.id == wanted)
        .or_else(|| labels.iter().find(|label| label.name.eq_ignore_ascii_case(wanted)))
        .map(|label| label.id.clone())
}

/// Convert a Gmail metadata message into the pipeline's raw message
fn parse_message(msg: Message) -> RawMessage {
    let mut subject = None;
    let mut from = None;

    let headers = msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "from" => from = Some(value.clone()),
                "subject" => subject = Some(value.clone()),
                _ => {}
            }
        }
    }

    RawMessage {
        id: msg.id,
        subject,
        from,
        snippet: msg.snippet,
        body: None,
        label_ids: msg.label_ids.unwrap_or_default(),
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn fetch(&self, label: &str, max_count: usize) -> Result<Vec<RawMessage>> {
        let labels = self.list_labels().await?;
        let Some(label_id) = resolve_label(&labels, label) else {
            warn!("Label '{}' does not exist in this mailbox", label);
            return Ok(Vec::new());
        };

        let ids = self.list_message_ids(&label_id, max_count).await?;
        debug!("Found {} messages with label {}", ids.len(), label_id);

        let messages: Vec<Option<RawMessage>> = stream::iter(ids)
            .map(|id| async move { self.fetch_single_with_retry(&id).await })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        Ok(messages.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePart, MessagePartHeader};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_parse_message_reads_metadata() {
        let msg = Message {
            id: Some("abc".to_string()),
            thread_id: Some("t1".to_string()),
            snippet: Some("You have won".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            payload: Some(MessagePart {
                headers: Some(vec![
                    header("From", "Lottery <win@lottery.example>"),
                    header("SUBJECT", "Congratulations"),
                    header("Date", "Mon, 1 Jan 2024 00:00:00 +0000"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let raw = parse_message(msg);
        assert_eq!(raw.id.as_deref(), Some("abc"));
        assert_eq!(raw.from.as_deref(), Some("Lottery <win@lottery.example>"));
        assert_eq!(raw.subject.as_deref(), Some("Congratulations"));
        assert_eq!(raw.snippet.as_deref(), Some("You have won"));
        assert_eq!(raw.label_ids, vec!["INBOX", "UNREAD"]);
    }

    #[test]
    fn test_parse_message_without_payload() {
        let raw = parse_message(Message {
            id: Some("abc".to_string()),
            ..Default::default()
        });
        assert_eq!(raw.subject, None);
        assert_eq!(raw.from, None);
        assert!(raw.label_ids.is_empty());
    }

    #[test]
    fn test_resolve_label_by_id_or_name() {
        let labels = vec![
            LabelInfo {
                id: "UNREAD".to_string(),
                name: "UNREAD".to_string(),
            },
            LabelInfo {
                id: "Label_12".to_string(),
                name: "Newsletters".to_string(),
            },
        ];

        assert_eq!(resolve_label(&labels, "UNREAD").as_deref(), Some("UNREAD"));
        assert_eq!(resolve_label(&labels, "unread").as_deref(), Some("UNREAD"));
        assert_eq!(resolve_label(&labels, "newsletters").as_deref(), Some("Label_12"));
        assert_eq!(resolve_label(&labels, "Label_12").as_deref(), Some("Label_12"));
        assert_eq!(resolve_label(&labels, "Receipts"), None);
    }

    #[test]
    fn test_should_retry() {
        assert!(GmailMailbox::should_retry(&SpamError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        }));
        assert!(GmailMailbox::should_retry(&SpamError::NetworkError("reset".to_string())));
        assert!(!GmailMailbox::should_retry(&SpamError::AuthError("expired".to_string())));
        assert!(!GmailMailbox::should_retry(&SpamError::MessageNotFound("gone".to_string())));
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SpamError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_on_permanent_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(SpamError::AuthError("Invalid credentials".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(SpamError::AuthError(_))));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_all_retries() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailbox::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(SpamError::RateLimitExceeded { retry_after: 1 })
            }
        })
        .await;

        assert!(matches!(result, Err(SpamError::RateLimitExceeded { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
    }
}
