//! Batch orchestration: one classification per record, fetch order preserved

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::SpamClassifier;
use crate::error::{Result, SpamError};
use crate::models::{ClassificationVerdict, ClassifiedEmail, EmailRecord};
use crate::normalizer::{SkipStage, SkippedRecord};

/// Progress callback receiving `(finished, total)`; called with zero finished
/// before the first record starts, then once per finished record
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Classifications in flight at once; 1 processes the batch sequentially
    pub max_concurrent: usize,
    /// Stop issuing work after this long and keep what has completed
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            timeout: None,
        }
    }
}

/// Verdicts and counts accumulated over one batch
#[derive(Debug, Clone, Default)]
pub struct BatchTally {
    pub entries: Vec<ClassifiedEmail>,
    pub spam_count: usize,
    pub not_spam_count: usize,
    pub skipped: Vec<SkippedRecord>,
    pub timed_out: bool,
}

impl BatchTally {
    pub fn record(&mut self, record: EmailRecord, verdict: ClassificationVerdict) {
        if verdict.is_spam() {
            self.spam_count += 1;
        } else {
            self.not_spam_count += 1;
        }
        self.entries.push(ClassifiedEmail { record, verdict });
    }

    pub fn skip(&mut self, skipped: SkippedRecord) {
        self.skipped.push(skipped);
    }
}

enum RecordOutcome {
    Classified(EmailRecord, ClassificationVerdict),
    Skipped(SkippedRecord),
}

pub struct BatchOrchestrator {
    classifier: Arc<SpamClassifier>,
    options: BatchOptions,
    on_progress: Option<ProgressCallback>,
}

impl BatchOrchestrator {
    pub fn new(classifier: Arc<SpamClassifier>, options: BatchOptions) -> Self {
        Self {
            classifier,
            options,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Classify every record and accumulate the results in input order
    ///
    /// Each record comes with its position in the fetch, which is what a
    /// skipped record reports. Record-scoped failures are absorbed: an
    /// unparseable response becomes a sentinel verdict, a record that cannot
    /// be turned into a request is skipped. Any other error aborts the batch.
    pub async fn run(&self, records: Vec<(usize, EmailRecord)>) -> Result<BatchTally> {
        let total = records.len();
        let concurrency = self.options.max_concurrent.max(1);
        info!(
            "Classifying {} emails with {} concurrent request(s)",
            total, concurrency
        );

        if let Some(on_progress) = &self.on_progress {
            on_progress(0, total);
        }

        let mut outcomes = stream::iter(records)
            .map(|(position, record)| {
                let classifier = Arc::clone(&self.classifier);
                async move { classify_record(&classifier, position, record).await }
            })
            .buffered(concurrency);

        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);
        let mut tally = BatchTally::default();

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, outcomes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "Batch timeout reached after {} of {} emails; keeping completed results",
                            tally.entries.len() + tally.skipped.len(),
                            total
                        );
                        tally.timed_out = true;
                        break;
                    }
                },
                None => outcomes.next().await,
            };

            let Some(outcome) = next else { break };
            match outcome? {
                RecordOutcome::Classified(record, verdict) => tally.record(record, verdict),
                RecordOutcome::Skipped(skipped) => tally.skip(skipped),
            }

            if let Some(on_progress) = &self.on_progress {
                on_progress(tally.entries.len() + tally.skipped.len(), total);
            }
        }

        Ok(tally)
    }
}

/// Classify one record, isolating record-scoped failures
async fn classify_record(
    classifier: &SpamClassifier,
    position: usize,
    record: EmailRecord,
) -> Result<RecordOutcome> {
    debug!("Processing email {} (fetch position {})", record.id, position);

    match classifier.classify(&record).await {
        Ok(verdict) => Ok(RecordOutcome::Classified(record, verdict)),
        Err(SpamError::ClassificationParse { email_id, reason }) => {
            warn!("Unparseable classification for {}: {}; using sentinel verdict", email_id, reason);
            let verdict = ClassificationVerdict::sentinel(&record.id, reason);
            Ok(RecordOutcome::Classified(record, verdict))
        }
        Err(e @ SpamError::RequestBuild(_)) => {
            warn!("Skipping email at position {}: {}", position, e);
            Ok(RecordOutcome::Skipped(SkippedRecord {
                stage: SkipStage::RequestBuild,
                position,
                email_id: Some(record.id).filter(|id| !id.trim().is_empty()),
                reason: e.to_string(),
            }))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LanguageModel;
    use crate::models::{RecommendedAction, SpamType};
    use crate::prompt::{ClassificationRequest, RequestBuilder};
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers by email id, with a per-id delay to shuffle completion order
    struct KeyedModel {
        answers: HashMap<String, (String, u64)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for KeyedModel {
        async fn complete(&self, request: &ClassificationRequest) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (answer, delay_ms) = self
                .answers
                .get(&request.email_id)
                .cloned()
                .unwrap_or_else(|| ("not json".to_string(), 0));
            if answer == "NETWORK" {
                return Err(SpamError::NetworkError("connection reset".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(answer)
        }
    }

    fn spam(confidence: f32) -> String {
        format!(
            r#"{{"is_spam": true, "confidence": {}, "spam_type": "phishing", "reasoning": "r", "recommended_action": "delete"}}"#,
            confidence
        )
    }

    fn ham() -> String {
        r#"{"is_spam": false, "confidence": 0.99, "spam_type": "legitimate", "reasoning": "r", "recommended_action": "keep"}"#.to_string()
    }

    fn record(id: &str) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            subject: format!("subject {}", id),
            sender: "someone@example.com".to_string(),
            body_excerpt: "body".to_string(),
            labels: BTreeSet::new(),
        }
    }

    /// Records at consecutive fetch positions
    fn batch(ids: &[&str]) -> Vec<(usize, EmailRecord)> {
        ids.iter().map(|id| record(id)).enumerate().collect()
    }

    fn orchestrator(answers: Vec<(&str, String, u64)>, options: BatchOptions) -> (BatchOrchestrator, Arc<KeyedModel>) {
        let model = Arc::new(KeyedModel {
            answers: answers
                .into_iter()
                .map(|(id, answer, delay)| (id.to_string(), (answer, delay)))
                .collect(),
            calls: AtomicUsize::new(0),
        });
        let classifier = Arc::new(SpamClassifier::new(model.clone(), RequestBuilder::default()));
        (BatchOrchestrator::new(classifier, options), model)
    }

    #[tokio::test]
    async fn test_sequential_counts_and_order() {
        let (orchestrator, model) = orchestrator(
            vec![("a", spam(0.95), 0), ("b", ham(), 0), ("c", ham(), 0)],
            BatchOptions::default(),
        );

        let tally = orchestrator
            .run(batch(&["a", "b", "c"]))
            .await
            .unwrap();

        let ids: Vec<&str> = tally.entries.iter().map(|e| e.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(tally.spam_count, 1);
        assert_eq!(tally.not_spam_count, 2);
        assert!(!tally.timed_out);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_failure_becomes_sentinel() {
        let (orchestrator, _) = orchestrator(
            vec![("a", ham(), 0), ("b", "garbage".to_string(), 0), ("c", spam(0.9), 0)],
            BatchOptions::default(),
        );

        let tally = orchestrator
            .run(batch(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(tally.entries.len(), 3);
        let sentinel = &tally.entries[1].verdict;
        assert!(sentinel.is_sentinel());
        assert_eq!(sentinel.email_id(), "b");
        assert_eq!(sentinel.spam_type(), SpamType::Other);
        assert_eq!(sentinel.confidence(), 0.0);
        assert_eq!(sentinel.recommended_action(), RecommendedAction::Review);
        assert_eq!(tally.spam_count, 1);
        assert_eq!(tally.not_spam_count, 2);
    }

    #[tokio::test]
    async fn test_blank_id_is_skipped() {
        let (orchestrator, model) = orchestrator(vec![("a", ham(), 0)], BatchOptions::default());

        // Positions 1 and 2 were dropped during normalization
        let tally = orchestrator
            .run(vec![(0, record("a")), (3, record(" "))])
            .await
            .unwrap();

        assert_eq!(tally.entries.len(), 1);
        assert_eq!(tally.skipped.len(), 1);
        assert_eq!(tally.skipped[0].stage, SkipStage::RequestBuild);
        assert_eq!(tally.skipped[0].position, 3);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_preserves_fetch_order() {
        let answers = vec![
            ("a", spam(0.95), 60),
            ("b", ham(), 5),
            ("c", spam(0.7), 30),
            ("d", ham(), 0),
        ];
        let records = || batch(&["a", "b", "c", "d"]);

        let (sequential, _) = orchestrator(answers.clone(), BatchOptions::default());
        let (concurrent, _) = orchestrator(
            answers,
            BatchOptions {
                max_concurrent: 4,
                timeout: None,
            },
        );

        let expected = sequential.run(records()).await.unwrap();
        let actual = concurrent.run(records()).await.unwrap();

        assert_eq!(actual.entries, expected.entries);
        assert_eq!(actual.spam_count, 2);
        assert_eq!(actual.not_spam_count, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_batch() {
        let (orchestrator, _) = orchestrator(
            vec![("a", ham(), 0), ("b", "NETWORK".to_string(), 0)],
            BatchOptions::default(),
        );

        let err = orchestrator.run(batch(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, SpamError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_timeout_keeps_completed_results() {
        let (orchestrator, _) = orchestrator(
            vec![("a", ham(), 0), ("b", ham(), 5_000)],
            BatchOptions {
                max_concurrent: 1,
                timeout: Some(Duration::from_millis(500)),
            },
        );

        let tally = orchestrator.run(batch(&["a", "b"])).await.unwrap();

        assert!(tally.timed_out);
        assert_eq!(tally.entries.len(), 1);
        assert_eq!(tally.entries[0].record.id, "a");
        assert_eq!(tally.spam_count + tally.not_spam_count, 1);
    }

    #[tokio::test]
    async fn test_progress_called_per_record() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let (orchestrator, _) = orchestrator(vec![("a", ham(), 0), ("b", ham(), 0)], BatchOptions::default());
        let orchestrator = orchestrator.with_progress(Arc::new(move |done: usize, total: usize| {
            seen.lock().unwrap().push((done, total));
        }));

        orchestrator.run(batch(&["a", "b"])).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![(0, 2), (1, 2), (2, 2)]);
    }
}
