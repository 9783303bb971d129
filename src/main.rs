//! Lingo Relay - command-line harness
//!
//! Drives the translation service core directly, without the HTTP layer.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lingo_relay::cli::{Args, Commands, ConfigAction};
use lingo_relay::service::TranslationService;
use lingo_relay::translate::TranslationRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = setup_logging(&args.root, args.verbose)?;

    let service = TranslationService::new(&args.root)?;

    match args.command {
        Commands::Translate { text, from, to, provider } => {
            let request = TranslationRequest::new(text)
                .with_languages(from, to)
                .with_provider(provider);
            print_json(&service.translate(&request).await)?;
        }
        Commands::Batch { file, texts, from, to, provider } => {
            let texts = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?
                    .lines()
                    .map(str::to_string)
                    .collect(),
                None => texts,
            };
            print_json(&service.batch_translate(&texts, &from, &to, &provider).await)?;
        }
        Commands::Models => {
            let listing = service.list_models()?;
            println!("\nModels in {}:", listing.model_dir.display());
            println!("{:<50} {:>12}", "Name", "Size (MB)");
            println!("{}", "-".repeat(63));
            for model in &listing.models {
                println!("{:<50} {:>12.2}", model.name, model.size_mb);
            }
            if listing.models.is_empty() {
                println!("No .gguf models found.");
            }
        }
        Commands::Switch { name } => {
            print_json(&service.switch_model(&name).await?)?;
        }
        Commands::Mode { name } => match name {
            Some(name) => {
                let changed = service.set_inference_mode(&name).await?;
                println!("Inference mode: {} ({})", service.inference_mode(), if changed { "changed" } else { "unchanged" });
            }
            None => println!("Inference mode: {}", service.inference_mode()),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => print_json(&service.get_config())?,
            ConfigAction::Set { pairs } => {
                let mut doc = service.get_config();
                doc.merge(parse_pairs(&pairs)?);
                let saved = service.update_config(&doc)?;
                println!("Configuration saved to {}", saved.path.display());
            }
        },
        Commands::Health => print_json(&service.health())?,
    }

    service.shutdown().await;
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(root: &Path, verbose: bool) -> Result<WorkerGuard> {
    let log_dir = root.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "lingo-relay.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so JSON results on stdout stay parseable
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("lingo-relay.log").display());

    Ok(guard)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse KEY=VALUE pairs; values that are not valid JSON are taken as strings.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut patch = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        patch.insert(key.trim().to_string(), value);
    }
    Ok(patch)
}
