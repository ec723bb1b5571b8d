//! Conversion of raw mailbox messages into validated email records

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::error::{Result, SpamError};
use crate::models::{EmailRecord, RawMessage};

/// Pipeline stage at which a message was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Normalize,
    RequestBuild,
}

/// A fetched message that never reached classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub stage: SkipStage,
    /// 0-based position in the fetch
    pub position: usize,
    pub email_id: Option<String>,
    pub reason: String,
}

/// Normalize one raw message
///
/// Only the identifier is mandatory. Missing subject, sender or body become
/// empty strings so that the classifier can treat their absence as a signal.
pub fn normalize(raw: &RawMessage) -> Result<EmailRecord> {
    let id = raw
        .id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SpamError::MalformedRecord("message has no identifier".to_string()))?;

    let body_excerpt = raw
        .body
        .as_deref()
        .filter(|body| !body.trim().is_empty())
        .or(raw.snippet.as_deref())
        .unwrap_or_default()
        .trim()
        .to_string();

    let labels: BTreeSet<String> = raw
        .label_ids
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok(EmailRecord {
        id: id.to_string(),
        subject: raw.subject.as_deref().unwrap_or_default().trim().to_string(),
        sender: raw.from.as_deref().unwrap_or_default().trim().to_string(),
        body_excerpt,
        labels,
    })
}

/// Normalize a whole fetch, preserving order
///
/// Each record keeps its position in the fetch. Messages without an id and
/// repeated ids are skipped and reported; the first occurrence of a
/// duplicated id wins.
pub fn normalize_batch(raw_messages: &[RawMessage]) -> (Vec<(usize, EmailRecord)>, Vec<SkippedRecord>) {
    let mut records = Vec::with_capacity(raw_messages.len());
    let mut skipped = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for (position, raw) in raw_messages.iter().enumerate() {
        match normalize(raw) {
            Ok(record) => {
                if seen.insert(record.id.clone()) {
                    records.push((position, record));
                } else {
                    warn!("Skipping duplicate message id {} at position {}", record.id, position);
                    skipped.push(SkippedRecord {
                        stage: SkipStage::Normalize,
                        position,
                        email_id: Some(record.id),
                        reason: "duplicate message id within batch".to_string(),
                    });
                }
            }
            Err(e) => {
                warn!("Skipping message at position {}: {}", position, e);
                skipped.push(SkippedRecord {
                    stage: SkipStage::Normalize,
                    position,
                    email_id: None,
                    reason: e.to_string(),
                });
            }
        }
    }

    (records, skipped)
}
