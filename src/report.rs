//! Batch report assembly and rendering

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{Result, SpamError};
use crate::models::{ClassifiedEmail, RecommendedAction, SpamType};
use crate::normalizer::SkippedRecord;
use crate::orchestrator::BatchTally;

/// Immutable outcome of one workflow run
///
/// Contains no timestamps or run identifiers, so identical inputs produce
/// identical reports.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    label: String,
    total_processed: usize,
    spam_count: usize,
    not_spam_count: usize,
    spam_percentage: f64,
    verdicts: Vec<ClassifiedEmail>,
    skipped: Vec<SkippedRecord>,
    timed_out: bool,
}

/// Package the orchestrator's tally into a report
///
/// Fails only when the tally's counts disagree with its entries.
pub fn assemble(label: impl Into<String>, tally: BatchTally) -> Result<BatchReport> {
    let total_processed = tally.entries.len();
    if tally.spam_count + tally.not_spam_count != total_processed {
        return Err(SpamError::Logic(format!(
            "spam_count ({}) + not_spam_count ({}) != total_processed ({})",
            tally.spam_count, tally.not_spam_count, total_processed
        )));
    }

    let counted_spam = tally.entries.iter().filter(|e| e.verdict.is_spam()).count();
    if counted_spam != tally.spam_count {
        return Err(SpamError::Logic(format!(
            "spam_count ({}) disagrees with {} spam verdicts",
            tally.spam_count, counted_spam
        )));
    }

    Ok(BatchReport {
        label: label.into(),
        total_processed,
        spam_count: tally.spam_count,
        not_spam_count: tally.not_spam_count,
        spam_percentage: spam_percentage(tally.spam_count, total_processed),
        verdicts: tally.entries,
        skipped: tally.skipped,
        timed_out: tally.timed_out,
    })
}

fn spam_percentage(spam_count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * spam_count as f64 / total as f64
    }
}

impl BatchReport {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total_processed(&self) -> usize {
        self.total_processed
    }

    pub fn spam_count(&self) -> usize {
        self.spam_count
    }

    pub fn not_spam_count(&self) -> usize {
        self.not_spam_count
    }

    pub fn spam_percentage(&self) -> f64 {
        self.spam_percentage
    }

    /// Verdicts in fetch order
    pub fn verdicts(&self) -> &[ClassifiedEmail] {
        &self.verdicts
    }

    pub fn skipped(&self) -> &[SkippedRecord] {
        &self.skipped
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Number of verdicts recommending each action, in declaration order
    pub fn action_breakdown(&self) -> Vec<(RecommendedAction, usize)> {
        RecommendedAction::ALL
            .iter()
            .map(|action| {
                let count = self
                    .verdicts
                    .iter()
                    .filter(|e| e.verdict.recommended_action() == *action)
                    .count();
                (*action, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Number of verdicts of each spam type, in declaration order
    pub fn type_breakdown(&self) -> Vec<(SpamType, usize)> {
        SpamType::ALL
            .iter()
            .map(|spam_type| {
                let count = self
                    .verdicts
                    .iter()
                    .filter(|e| e.verdict.spam_type() == *spam_type)
                    .count();
                (*spam_type, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Generate markdown report
    pub fn to_markdown(&self, generated_at: DateTime<Utc>) -> String {
        let mut md = String::new();

        md.push_str("# Spam Classification Report\n\n");
        md.push_str(&format!(
            "**Generated:** {}\n\n",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Label:** {}\n", self.label));
        md.push_str(&format!("- **Emails processed:** {}\n", self.total_processed));
        md.push_str(&format!(
            "- **Spam:** {} ({:.1}%)\n",
            self.spam_count, self.spam_percentage
        ));
        md.push_str(&format!("- **Not spam:** {}\n", self.not_spam_count));
        if !self.skipped.is_empty() {
            md.push_str(&format!("- **Skipped:** {}\n", self.skipped.len()));
        }
        if self.timed_out {
            md.push_str("- **Timed out:** batch stopped early, results are partial\n");
        }
        md.push('\n');

        let actions = self.action_breakdown();
        if !actions.is_empty() {
            md.push_str("## Recommended Actions\n\n");
            md.push_str("| Action | Emails |\n");
            md.push_str("|--------|--------|\n");
            for (action, count) in actions {
                md.push_str(&format!("| {} | {} |\n", action, count));
            }
            md.push('\n');
        }

        md.push_str("## Emails\n\n");
        if self.verdicts.is_empty() {
            md.push_str("_No emails were classified._\n\n");
        } else {
            md.push_str("| Sender | Subject | Verdict | Type | Confidence | Action |\n");
            md.push_str("|--------|---------|---------|------|------------|--------|\n");
            for entry in &self.verdicts {
                let verdict = &entry.verdict;
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {:.0}% | {} |\n",
                    table_cell(&entry.record.sender, 40),
                    table_cell(&entry.record.subject, 60),
                    if verdict.is_spam() { "SPAM" } else { "not spam" },
                    verdict.spam_type(),
                    verdict.confidence() * 100.0,
                    verdict.recommended_action(),
                ));
            }
            md.push('\n');
        }

        let spam: Vec<&ClassifiedEmail> =
            self.verdicts.iter().filter(|e| e.verdict.is_spam()).collect();
        if !spam.is_empty() {
            md.push_str("## Spam Details\n\n");
            for entry in spam {
                md.push_str(&format!(
                    "### {}\n\n",
                    table_cell(&entry.record.subject, 80)
                ));
                md.push_str(&format!("- **From:** {}\n", entry.record.sender));
                md.push_str(&format!("- **Message ID:** `{}`\n", entry.record.id));
                md.push_str(&format!("- **Reasoning:** {}\n\n", entry.verdict.reasoning()));
            }
        }

        if !self.skipped.is_empty() {
            md.push_str("## Skipped\n\n");
            for skipped in &self.skipped {
                md.push_str(&format!(
                    "- position {} ({:?}): {}{}\n",
                    skipped.position,
                    skipped.stage,
                    skipped
                        .email_id
                        .as_deref()
                        .map(|id| format!("`{}` ", id))
                        .unwrap_or_default(),
                    skipped.reason
                ));
            }
            md.push('\n');
        }

        md
    }

    /// Save markdown report to file
    pub async fn save_markdown(&self, path: &Path, generated_at: DateTime<Utc>) -> Result<()> {
        tokio::fs::write(path, self.to_markdown(generated_at)).await?;
        Ok(())
    }

    /// Save JSON report to file
    pub async fn save_json(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Emit the run summary through tracing
    pub fn log_summary(&self) {
        info!("Spam classification summary for label {}", self.label);
        info!("  Total emails processed: {}", self.total_processed);
        info!(
            "  Spam: {} ({:.1}%)",
            self.spam_count, self.spam_percentage
        );
        info!("  Not spam: {}", self.not_spam_count);
        if !self.skipped.is_empty() {
            info!("  Skipped: {}", self.skipped.len());
        }
        if self.timed_out {
            info!("  Batch timed out; report is partial");
        }
        for entry in self.verdicts.iter().filter(|e| e.verdict.is_spam()) {
            info!(
                "  [{}] {} from {} ({:.0}%, {})",
                entry.verdict.spam_type(),
                entry.record.subject,
                entry.record.sender,
                entry.verdict.confidence() * 100.0,
                entry.verdict.recommended_action()
            );
        }
    }
}

/// Truncate and escape text for a markdown table cell (UTF-8 safe)
fn table_cell(text: &str, max_chars: usize) -> String {
    let truncated = if text.chars().count() > max_chars {
        format!(
            "{}...",
            text.chars().take(max_chars.saturating_sub(3)).collect::<String>()
        )
    } else {
        text.to_string()
    };
    let cell = truncated.replace('|', "\\|").replace('\n', " ");
    if cell.trim().is_empty() {
        "(none)".to_string()
    } else {
        cell
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    label: &'a str,
    total_processed: usize,
    spam_count: usize,
    not_spam_count: usize,
    spam_percentage: f64,
    emails: Vec<EmailEntry<'a>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    skipped: &'a [SkippedRecord],
    timed_out: bool,
}

#[derive(Serialize)]
struct EmailEntry<'a> {
    email_id: &'a str,
    subject: &'a str,
    from: &'a str,
    is_spam: bool,
    confidence: f32,
    spam_type: SpamType,
    reasoning: &'a str,
    recommended_action: RecommendedAction,
}

impl Serialize for BatchReport {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ReportDocument {
            label: &self.label,
            total_processed: self.total_processed,
            spam_count: self.spam_count,
            not_spam_count: self.not_spam_count,
            spam_percentage: self.spam_percentage,
            emails: self
                .verdicts
                .iter()
                .map(|entry| EmailEntry {
                    email_id: entry.verdict.email_id(),
                    subject: &entry.record.subject,
                    from: &entry.record.sender,
                    is_spam: entry.verdict.is_spam(),
                    confidence: entry.verdict.confidence(),
                    spam_type: entry.verdict.spam_type(),
                    reasoning: entry.verdict.reasoning(),
                    recommended_action: entry.verdict.recommended_action(),
                })
                .collect(),
            skipped: &self.skipped,
            timed_out: self.timed_out,
        }
        .serialize(serializer)
    }
}
