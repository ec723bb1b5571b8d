use anyhow::Result;
use clap::Parser;
use gmail_spam_triage::auth::{self, READONLY_SCOPE};
use gmail_spam_triage::cli::{self, ClassifyArgs, Cli, Commands};
use gmail_spam_triage::config::Config;
use gmail_spam_triage::error::SpamError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                // Logs go to stderr so a JSON report on stdout stays clean
                if self.multi.is_hidden() {
                    eprintln!("{}", msg);
                } else {
                    let _ = self.multi.println(msg);
                }
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-spam-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // On non-Windows platforms use aws-lc-rs, on Windows use ring (no NASM/CMake required)
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_spam_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_spam_triage=info,warn"))
    };

    // Progress bars and log lines share one MultiProgress drawing to stderr
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter {
        multi: Arc::clone(&multi_progress),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if *force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            // Same scope as the cached token, otherwise a second OAuth flow starts
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await
                .map_err(SpamError::from)?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Classify {
            max_emails,
            label,
            snapshot,
            output,
            markdown,
        } => {
            let args = ClassifyArgs {
                max_emails: *max_emails,
                label: label.clone(),
                snapshot: snapshot.clone(),
                output: output.clone(),
                markdown: markdown.clone(),
            };

            let report = cli::run_classify(&cli, &args, (*multi_progress).clone()).await?;

            if report.timed_out() {
                eprintln!(
                    "Batch timed out: {} emails classified before the deadline",
                    report.total_processed()
                );
            }

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !*force {
                return Err(SpamError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - mailbox.label: Gmail label to triage (id or name)");
            println!("  - mailbox.max_emails: How many emails to classify per run");
            println!("  - classifier.base_url / classifier.model: OpenAI-compatible endpoint");
            println!("  - classifier.api_key_env: Environment variable holding the API key");

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(spam_err) = error.downcast_ref::<SpamError>() {
        match spam_err {
            SpamError::AuthError(_) => {
                eprintln!("\nHint: Check credentials.json (or GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET)");
                eprintln!("      and the model API key environment variable.");
                eprintln!("      Try running: gmail-spam-triage auth --force");
            }
            SpamError::ServerError { .. } | SpamError::NetworkError(_) => {
                eprintln!("\nHint: This may be a temporary provider error.");
                eprintln!("      Try again, or set classifier.retry_max_elapsed_secs in config.");
            }
            SpamError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit a rate limit.");
                eprintln!("      Consider reducing batch.max_concurrent_requests in config.");
            }
            SpamError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-spam-triage init-config --force");
            }
            _ => {}
        }
    }
}
