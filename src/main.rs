use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use inbox_reasoner::config::Settings;
use inbox_reasoner::llm::build_reasoning;
use inbox_reasoner::pipeline::ClassificationPipeline;
use inbox_reasoner::server::api_routes;

/// Classify emails with an LLM and have a second model check the answer.
#[derive(Parser)]
#[command(name = "inbox-reasoner")]
#[command(version)]
#[command(about = "LLM email classification with self-evaluation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify one email
    Classify {
        /// Email text, or `-` / omit to read from stdin
        email: Option<String>,
        /// Print the full run as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate labeled test emails and report metrics
    Test {
        /// Number of test emails to generate
        #[arg(short, long, default_value_t = 10)]
        count: u32,
        /// Print the batch and metrics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP API
    Serve {
        /// Listen port (defaults to INBOX_REASONER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::from_env().context("invalid configuration")?;

    // Keeps the file writer flushing until main returns.
    let _log_guard = init_tracing(&settings);

    let reasoning = build_reasoning(&settings)?;
    let pipeline = Arc::new(ClassificationPipeline::new(Arc::new(reasoning)));

    match args.command {
        Command::Classify { email, json } => {
            let email = resolve_email(email)?;
            let run = pipeline.classify_and_refine(&email).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                let result = run.final_classification();
                println!("category:  {}", result.category);
                println!("spam:      {}", result.is_spam);
                match run.evaluation.verdict() {
                    Some(verdict) => println!("verdict:   {verdict:?}"),
                    None => println!("verdict:   (unreadable)"),
                }
                println!("refined:   {}", run.was_refined());
                println!("reasoning: {}", result.reasoning);
                if let Some(reply) = &result.suggested_response {
                    println!("reply:     {reply}");
                }
            }
        }

        Command::Test { count, json } => {
            let report = pipeline.run_test_suite(count).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "score: {}/{}",
                    report.batch.score,
                    report.batch.tests.len()
                );
                println!();
                println!("{}", report.metrics);
                if let Some(suggestion) = &report.batch.suggestion {
                    println!("suggestion: {suggestion}");
                }
            }
        }

        Command::Serve { port } => {
            let port = port.unwrap_or(settings.port);
            eprintln!("📬 Inbox Reasoner v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Classifier: {}", settings.classification_model);
            eprintln!("   Evaluator:  {}", settings.evaluation_model);
            eprintln!("   API: http://0.0.0.0:{}/api/classify", port);

            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind port {port}"))?;
            tracing::info!(port, "HTTP API listening");
            axum::serve(listener, api_routes(pipeline)).await?;
        }
    }

    Ok(())
}

/// Console logging always; a daily-rolling file as well when a log
/// directory is configured.
fn init_tracing(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &settings.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-reasoner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .init();

    guard
}

/// Take the email from the argument, or from stdin when the argument is
/// absent or `-`.
fn resolve_email(arg: Option<String>) -> anyhow::Result<String> {
    match arg {
        Some(text) if text != "-" => Ok(text),
        _ => {
            if io::stdin().is_terminal() {
                bail!("classify: no email provided (pass it as an argument or via stdin)");
            }
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}
