//! Command-line interface

use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth;
use crate::classifier::SpamClassifier;
use crate::client::GmailMailbox;
use crate::config::Config;
use crate::error::Result;
use crate::llm::OpenAiCompatibleModel;
use crate::mailbox::{Mailbox, SnapshotMailbox};
use crate::orchestrator::{BatchOptions, BatchOrchestrator, ProgressCallback};
use crate::prompt::RequestBuilder;
use crate::report::BatchReport;
use crate::workflow::{classify_spam_workflow, WorkflowOptions};

#[derive(Parser, Debug)]
#[command(name = "gmail-spam-triage")]
#[command(version)]
#[command(about = "Classify Gmail messages as spam with a language model", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-spam-triage/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Fetch a batch of emails and classify each one
    Classify {
        /// Maximum number of emails to classify (overrides config)
        #[arg(short, long)]
        max_emails: Option<usize>,

        /// Gmail label id or name to fetch from (overrides config)
        #[arg(short, long)]
        label: Option<String>,

        /// Read messages from a JSON snapshot instead of Gmail
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a markdown report
        #[arg(long)]
        markdown: Option<PathBuf>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    /// Create a reporter drawing into an existing MultiProgress so log lines
    /// printed through it stay above the bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::with_template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style =
            ProgressStyle::with_template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments of the `classify` command
#[derive(Debug, Clone, Default)]
pub struct ClassifyArgs {
    pub max_emails: Option<usize>,
    pub label: Option<String>,
    pub snapshot: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub markdown: Option<PathBuf>,
}

/// Apply command-line overrides on top of the loaded configuration
pub fn workflow_options(config: &Config, args: &ClassifyArgs) -> WorkflowOptions {
    WorkflowOptions {
        max_emails: args.max_emails.unwrap_or(config.mailbox.max_emails),
        label: args
            .label
            .clone()
            .unwrap_or_else(|| config.mailbox.label.clone()),
    }
}

/// Build the classifier stack described by the configuration
pub fn build_classifier(config: &Config) -> Result<SpamClassifier> {
    let model = OpenAiCompatibleModel::from_config(&config.classifier)?;
    let builder = RequestBuilder::new(
        config.classifier.max_excerpt_chars,
        config.classifier.temperature,
    );
    let classifier = SpamClassifier::new(Arc::new(model), builder);
    Ok(match config.classifier.retry_max_elapsed() {
        Some(max_elapsed) => classifier.with_retry(max_elapsed),
        None => classifier,
    })
}

/// Run the `classify` command end to end and write its outputs
///
/// # Returns
/// * `Ok(BatchReport)` - The report, already written to the requested outputs
/// * `Err(SpamError)` - If configuration, authentication, fetch or a provider call fails
pub async fn run_classify(cli: &Cli, args: &ClassifyArgs, multi: MultiProgress) -> Result<BatchReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let config = Config::load(&cli.config).await?;
    reporter.finish_spinner(&config_spinner, &format!("Configuration loaded from {:?}", cli.config));

    let options = workflow_options(&config, args);

    let mailbox: Box<dyn Mailbox> = match &args.snapshot {
        Some(path) => {
            let snapshot = SnapshotMailbox::load(path).await?;
            info!("Using snapshot {:?} with {} messages", path, snapshot.len());
            Box::new(snapshot)
        }
        None => {
            let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            reporter.finish_spinner(&auth_spinner, "Gmail API authenticated successfully");
            Box::new(GmailMailbox::new(hub, config.mailbox.max_concurrent_fetches))
        }
    };

    let classifier = Arc::new(build_classifier(&config)?);

    // Sized once the fetch is known, which may be smaller than max_emails
    let classify_bar = reporter.add_progress_bar(0, "Classifying emails...");
    let bar = classify_bar.clone();
    let on_progress: ProgressCallback = Arc::new(move |done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    });

    let orchestrator = BatchOrchestrator::new(
        classifier,
        BatchOptions {
            max_concurrent: config.batch.max_concurrent_requests,
            timeout: config.batch.timeout(),
        },
    )
    .with_progress(on_progress);

    let result = classify_spam_workflow(mailbox.as_ref(), &orchestrator, &options).await;
    classify_bar.finish_and_clear();
    let report = result?;

    let _ = reporter.multi_progress().println(format!(
        "  ✓ Classified {} emails: {} spam ({:.1}%)",
        report.total_processed(),
        report.spam_count(),
        report.spam_percentage()
    ));

    match &args.output {
        Some(path) => {
            report.save_json(path).await?;
            info!("Report written to {:?}", path);
        }
        None => println!("{}", report.to_json()?),
    }

    if let Some(path) = &args.markdown {
        report.save_markdown(path, Utc::now()).await?;
        info!("Markdown report written to {:?}", path);
    }

    Ok(report)
}
