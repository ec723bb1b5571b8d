//! Gmail Spam Triage
//!
//! Fetches a bounded batch of messages from one mailbox label, asks a language
//! model to classify each one as spam or not spam, and returns an aggregate
//! report with a recommended action per message. The mailbox is never modified.
//!
//! # Overview
//!
//! - **Normalization**: raw mailbox messages become validated [`models::EmailRecord`]s
//! - **Request building**: each record becomes a prompt with the spam taxonomy and
//!   the expected response schema
//! - **Classification**: model output is parsed leniently, then confidence is
//!   clamped and the recommended action is held to a confidence-based policy
//! - **Orchestration**: bounded concurrency with results kept in fetch order;
//!   a bad model response only affects its own message
//! - **Reporting**: counts, spam percentage and per-message verdicts as JSON or
//!   markdown
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gmail_spam_triage::{
//!     classify_spam_workflow, BatchOptions, BatchOrchestrator, OpenAiCompatibleModel,
//!     RequestBuilder, SnapshotMailbox, SpamClassifier, WorkflowOptions,
//! };
//! use gmail_spam_triage::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let mailbox = SnapshotMailbox::load("inbox.json".as_ref()).await?;
//!
//!     let model = OpenAiCompatibleModel::from_config(&config.classifier)?;
//!     let classifier = SpamClassifier::new(Arc::new(model), RequestBuilder::default());
//!     let orchestrator = BatchOrchestrator::new(Arc::new(classifier), BatchOptions::default());
//!
//!     let options = WorkflowOptions { max_emails: 20, label: "UNREAD".to_string() };
//!     let report = classify_spam_workflow(&mailbox, &orchestrator, &options).await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Read-only Gmail mailbox with retry logic
//! - [`mailbox`] - Mailbox capability and JSON snapshot mailbox
//! - [`normalizer`] - Raw message validation and normalization
//! - [`prompt`] - Classification request construction
//! - [`llm`] - Language model capability and OpenAI-compatible client
//! - [`classifier`] - Response parsing, coercion and action policy
//! - [`orchestrator`] - Ordered, bounded-concurrency batch classification
//! - [`report`] - Batch report assembly and rendering
//! - [`workflow`] - The end-to-end entry point
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod prompt;
pub mod report;
pub mod workflow;

pub use classifier::SpamClassifier;
pub use error::{Result, SpamError};
pub use llm::{LanguageModel, OpenAiCompatibleModel};
pub use mailbox::{Mailbox, SnapshotMailbox};
pub use models::{
    ClassificationVerdict, ClassifiedEmail, EmailRecord, RawMessage, RecommendedAction, SpamType,
};
pub use orchestrator::{BatchOptions, BatchOrchestrator};
pub use prompt::RequestBuilder;
pub use report::BatchReport;
pub use workflow::{classify_spam_workflow, WorkflowOptions};
