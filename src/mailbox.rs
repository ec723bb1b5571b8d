//! Mailbox capability and an offline snapshot implementation

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, SpamError};
use crate::models::RawMessage;

/// Trait defining the read-only mailbox fetch for easier testing
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch at most `max_count` messages carrying `label`, newest first
    ///
    /// An unknown label yields an empty result rather than an error.
    async fn fetch(&self, label: &str, max_count: usize) -> Result<Vec<RawMessage>>;
}

/// Mailbox backed by a JSON array of messages loaded up front
///
/// Messages keep their file order. A label matches a message when it equals
/// one of the message's label ids, ignoring ASCII case.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMailbox {
    messages: Vec<RawMessage>,
}

impl SnapshotMailbox {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self { messages }
    }

    /// Load a snapshot file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SpamError::ConfigError(format!("Failed to read snapshot {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let messages: Vec<RawMessage> = serde_json::from_str(content)?;
        debug!("Loaded snapshot with {} messages", messages.len());
        Ok(Self::new(messages))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl Mailbox for SnapshotMailbox {
    async fn fetch(&self, label: &str, max_count: usize) -> Result<Vec<RawMessage>> {
        let label = label.trim();
        Ok(self
            .messages
            .iter()
            .filter(|message| {
                message
                    .label_ids
                    .iter()
                    .any(|id| id.trim().eq_ignore_ascii_case(label))
            })
            .take(max_count)
            .cloned()
            .collect())
    }
}
