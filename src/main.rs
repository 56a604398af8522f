// SPDX-License-Identifier: MIT

//! schedsift CLI: classify images and relocate schedule-like content

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use schedsift::classifier::{RetryPolicy, ScheduleClassifier};
use schedsift::config::AppConfig;
use schedsift::history::MoveLog;
use schedsift::oracle::OllamaClient;
use schedsift::pipeline::{Pipeline, PipelineOptions};
use schedsift::relocate::Relocator;
use schedsift::report::RunStatus;
use schedsift::{scanner, sync, Result};

/// schedsift CLI - schedule-image classifier and relocator
#[derive(Parser, Debug)]
#[command(name = "schedsift")]
#[command(version = "1.0.0")]
#[command(about = "Classifies images with a local vision model and relocates schedule-like content", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format for the run report
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify images under a root tree and relocate positive matches
    Run {
        /// Root directory to scan
        root: PathBuf,

        /// Restrict the scan to a single subdirectory of the root
        #[arg(short, long)]
        folder: Option<String>,

        /// Minimum confidence for a move (overrides config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum classification attempts per image (overrides config)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Perform every decision but mutate nothing
        #[arg(long)]
        dry_run: bool,

        /// Skip the oracle health check on startup
        #[arg(long)]
        skip_health_check: bool,

        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show oracle status and model availability
    Status,

    /// Move history and undo operations
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List recent moves
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// Undo recent moves, restoring files and references
    Undo {
        /// Number of moves to undo
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Show what would be undone without doing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear the move log
    Clear {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            root,
            folder,
            threshold,
            max_attempts,
            dry_run,
            skip_health_check,
            report,
        } => {
            run_pipeline(
                config,
                root,
                folder,
                threshold,
                max_attempts,
                dry_run,
                skip_health_check,
                report,
                &cli.format,
            )
            .await
        }
        Commands::Status => run_status(config).await,
        Commands::History { action } => run_history_command(config, action),
        Commands::Config { action } => run_config_command(config, action, &cli.config),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    mut config: AppConfig,
    root: PathBuf,
    folder: Option<String>,
    threshold: Option<f64>,
    max_attempts: Option<u32>,
    dry_run: bool,
    skip_health_check: bool,
    report_path: Option<PathBuf>,
    format: &str,
) -> Result<()> {
    if let Some(threshold) = threshold {
        config.rules.confidence_threshold = threshold;
    }
    if let Some(max_attempts) = max_attempts {
        config.oracle.max_attempts = max_attempts.max(1);
    }

    if dry_run {
        warn!("DRY RUN MODE - no files will be moved");
    }

    let client = OllamaClient::new(
        &config.oracle.url,
        &config.oracle.model,
        config.oracle.timeout_secs,
    )?;

    if !skip_health_check {
        info!("Checking oracle availability...");
        client.health_check().await?;
        match client.model_available().await {
            Ok(true) => info!("Vision model '{}' available", client.model()),
            Ok(false) => warn!("Vision model '{}' not found on the oracle", client.model()),
            Err(e) => warn!("Could not list models: {}", e),
        }
    } else {
        warn!("Skipping oracle health check");
    }

    info!("Scanning {:?}...", root);
    let groups = scanner::scan(
        &root,
        folder.as_deref(),
        &config.scan.marker,
        &config.scan.image_extensions,
        &config.rules.destination,
    );

    if groups.is_empty() {
        info!("No image groups found, nothing to do");
        return Ok(());
    }

    let total_images: usize = groups.iter().map(|g| g.images.len()).sum();
    info!("Found {} groups with {} images", groups.len(), total_images);

    let policy = RetryPolicy {
        max_attempts: config.oracle.max_attempts,
        backoff: Duration::from_millis(config.oracle.backoff_ms),
        rate_limit_backoff: Duration::from_millis(config.oracle.rate_limit_backoff_ms),
    };

    let classifier = ScheduleClassifier::new(
        Arc::new(client),
        config.prompt.clone(),
        policy,
        config.rules.max_dimension,
    );

    let relocator = Relocator::new(config.rules.destination.clone(), dry_run);
    let move_log = (!dry_run).then(|| MoveLog::new(PathBuf::from(&config.history_path)));

    // Graceful shutdown: Ctrl+C flips the flag, honored between images.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing current image...");
            let _ = shutdown_tx.send(true);
        }
    });

    let options = PipelineOptions {
        confidence_threshold: config.rules.confidence_threshold,
        pacing: Duration::from_millis(config.oracle.pacing_ms),
        reference_extensions: config.scan.reference_extensions.clone(),
        dry_run,
    };

    let pipeline = Pipeline::new(classifier, relocator, move_log, options, shutdown_rx);
    let report = pipeline.run(&groups).await;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", report),
    }

    if let Some(path) = report_path {
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!("Report written to {:?}", path);
    }

    if report.status == RunStatus::OracleUnavailable {
        warn!("Every classification failed; the oracle looks unreachable");
    }

    Ok(())
}

/// Show oracle status
async fn run_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(
        &config.oracle.url,
        &config.oracle.model,
        config.oracle.timeout_secs,
    )?;

    println!("schedsift v1.0.0 Status");
    println!("=======================");

    match client.health_check().await {
        Ok(()) => println!("Oracle: Running at {}", config.oracle.url),
        Err(e) => println!("Oracle: Error - {}", e),
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m.starts_with(&config.oracle.model) { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    println!("\nConfiguration:");
    println!("  Vision model: {}", config.oracle.model);
    println!("  Confidence threshold: {}", config.rules.confidence_threshold);
    println!("  Destination: {}", config.rules.destination.join("/"));
    println!("  Move log: {}", config.history_path);

    Ok(())
}

/// Run history commands
fn run_history_command(config: AppConfig, action: HistoryCommands) -> Result<()> {
    let log = MoveLog::new(PathBuf::from(&config.history_path));

    match action {
        HistoryCommands::List { count } => {
            let records = log.get_recent(count)?;
            println!("Recent moves ({} entries):", records.len());
            for record in records {
                let status = if record.undone { "[UNDONE]" } else { "" };
                println!(
                    "  {} {} -> {} ({:?}, {:.0}%) {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.original_path.display(),
                    record.new_path.display(),
                    record.category,
                    record.confidence * 100.0,
                    status
                );
            }
        }
        HistoryCommands::Undo { count, dry_run } => {
            let records = log.get_undoable()?;
            let to_undo: Vec<_> = records.into_iter().rev().take(count).collect();

            if to_undo.is_empty() {
                println!("No moves to undo");
                return Ok(());
            }

            for record in to_undo {
                if !record.new_path.exists() {
                    warn!("File not found (moved or deleted): {:?}", record.new_path);
                    continue;
                }

                if dry_run {
                    println!(
                        "Would undo: {} -> {}",
                        record.new_path.display(),
                        record.original_path.display()
                    );
                    continue;
                }

                undo_move(&record)?;
                log.mark_undone(&record.id)?;
                println!(
                    "Undone: {} -> {}",
                    record.new_path.display(),
                    record.original_path.display()
                );
            }
        }
        HistoryCommands::Clear { force } => {
            if !force {
                eprintln!("Use --force to confirm clearing the move log");
                return Ok(());
            }
            log.clear()?;
            println!("Move log cleared");
        }
    }

    Ok(())
}

/// Move a file back where it came from and reverse the reference rewrite.
fn undo_move(record: &schedsift::history::MoveRecord) -> Result<()> {
    if let Some(parent) = record.original_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&record.new_path, &record.original_path)?;

    for document in &record.documents_updated {
        // Swapped arguments substitute the new reference back to the old.
        if let Err(e) = sync::sync_references(document, &record.new_path, &record.original_path) {
            warn!("Could not restore references in {:?}: {}", document, e);
        }
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            println!("Configuration at {:?} is valid", config_path);
            println!("  Oracle: {} ({})", config.oracle.url, config.oracle.model);
            println!("  Marker: {}", config.scan.marker);
            println!("  Threshold: {}", config.rules.confidence_threshold);
            println!("  Destination: {}", config.rules.destination.join("/"));
        }
    }

    Ok(())
}
