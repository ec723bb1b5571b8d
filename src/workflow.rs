//! End-to-end spam classification workflow

use tracing::{error, info};

use crate::error::{Result, SpamError};
use crate::mailbox::Mailbox;
use crate::normalizer::normalize_batch;
use crate::orchestrator::BatchOrchestrator;
use crate::report::{assemble, BatchReport};

/// What to fetch for one run
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Upper bound on fetched messages; must be positive
    pub max_emails: usize,
    pub label: String,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_emails: 20,
            label: "INBOX".to_string(),
        }
    }
}

/// Fetch, normalize and classify one batch of messages
///
/// The mailbox is read exactly once. Records that cannot be normalized or
/// turned into a request are skipped and listed in the report; unparseable
/// model responses become sentinel verdicts. Mailbox and model provider
/// failures abort the run without a partial report.
pub async fn classify_spam_workflow(
    mailbox: &dyn Mailbox,
    orchestrator: &BatchOrchestrator,
    options: &WorkflowOptions,
) -> Result<BatchReport> {
    if options.max_emails == 0 {
        return Err(SpamError::InvalidArgument(
            "max_emails must be greater than 0".to_string(),
        ));
    }

    info!(
        "Fetching up to {} emails with label {}",
        options.max_emails, options.label
    );
    let raw_messages = mailbox
        .fetch(&options.label, options.max_emails)
        .await
        .map_err(|e| {
            error!("Mailbox fetch failed: {}", e);
            e
        })?;
    info!("Fetched {} emails", raw_messages.len());

    let (records, mut skipped) = normalize_batch(&raw_messages);

    let mut tally = orchestrator
        .run(records)
        .await
        .map_err(|e| {
            error!("Classification aborted: {}", e);
            e
        })?;

    skipped.append(&mut tally.skipped);
    tally.skipped = skipped;

    let report = assemble(options.label.clone(), tally)?;
    report.log_summary();
    Ok(report)
}
