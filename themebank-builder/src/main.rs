//! themebank - themed audio clip bank builder
//!
//! Command-line entry point: runs and resumes bank-building sessions, asks a
//! running session to stop, and inspects or prunes the dedup ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use themebank_builder::config::Settings;
use themebank_builder::services::{
    ChatQueryExpander, EmbeddingBackend, HttpEmbeddingBackend, QueryExpander, YtDlp,
};
use themebank_builder::{Backends, Ledger, SessionRunner, SessionStart};
use themebank_common::config::{locate_config_file, resolve_root_folder, ROOT_FOLDER_ENV};
use themebank_common::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// File whose appearance in the root folder stops a running session
const STOP_FILE_NAME: &str = "stop.request";

/// Command-line arguments for themebank
#[derive(Parser, Debug)]
#[command(name = "themebank")]
#[command(about = "Build themed banks of short audio clips")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the ledger and sessions
    #[arg(short, long, global = true, env = ROOT_FOLDER_ENV)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new session
    Run {
        /// Use this id instead of a generated one
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Continue an interrupted session
    Resume {
        session_id: String,
    },
    /// Ask the running session to stop
    Stop,
    /// Ledger row counts
    Stats,
    /// Ledger record for a URL
    UrlInfo {
        url: String,
    },
    /// Delete ledger rows older than N days
    Prune {
        #[arg(long)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_file =
        locate_config_file(args.config.as_deref()).context("Failed to locate configuration")?;
    let settings = Settings::load(config_file.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config_file.as_deref(),
    );
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!(root_folder = %root_folder.display(), config = ?config_file, "themebank starting");

    match args.command {
        Command::Stop => {
            let stop_file = root_folder.join(STOP_FILE_NAME);
            std::fs::write(&stop_file, b"stop\n")
                .with_context(|| format!("Failed to write {}", stop_file.display()))?;
            println!("Stop requested ({})", stop_file.display());
            Ok(())
        }
        Command::Stats => {
            let ledger = open_ledger(&root_folder, &settings).await?;
            let stats = ledger.stats().await.context("Failed to read ledger stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            ledger.close().await;
            Ok(())
        }
        Command::UrlInfo { url } => {
            let ledger = open_ledger(&root_folder, &settings).await?;
            let record = ledger.get_url_info(&url).await.context("Failed to query ledger")?;
            match record {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("Not in ledger: {}", url),
            }
            ledger.close().await;
            Ok(())
        }
        Command::Prune { days } => {
            let ledger = open_ledger(&root_folder, &settings).await?;
            let report = ledger
                .prune_older_than(days)
                .await
                .context("Failed to prune ledger")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            ledger.close().await;
            Ok(())
        }
        Command::Run { session_id } => {
            run_session(root_folder, settings, SessionStart::New { session_id }).await
        }
        Command::Resume { session_id } => {
            run_session(root_folder, settings, SessionStart::Resume { session_id }).await
        }
    }
}

async fn open_ledger(root_folder: &Path, settings: &Settings) -> Result<Ledger> {
    let path = root_folder.join("ledger.db");
    Ledger::open_with(&path, settings.ledger.options())
        .await
        .with_context(|| format!("Failed to open ledger {}", path.display()))
}

async fn run_session(root_folder: PathBuf, settings: Settings, start: SessionStart) -> Result<()> {
    let ledger = open_ledger(&root_folder, &settings).await?;

    let yt_dlp = Arc::new(YtDlp::new(settings.fetch.clone()));
    if !yt_dlp.is_installed().await {
        warn!(tool = %settings.fetch.tool_path, "Download tool not found; every fetch will fail");
    }

    let embedding = if settings.scoring.enabled {
        let backend = HttpEmbeddingBackend::new(
            &settings.scoring.endpoint,
            Duration::from_secs(settings.scoring.request_timeout_seconds),
        )
        .context("Failed to create embedding client")?;
        Some(Arc::new(backend) as Arc<dyn EmbeddingBackend>)
    } else {
        None
    };

    let expander = if settings.expansion.enabled {
        match ChatQueryExpander::from_config(&settings.expansion) {
            Ok(expander) => Some(Arc::new(expander) as Arc<dyn QueryExpander>),
            Err(e) => {
                warn!(error = %e, "Query expansion disabled");
                None
            }
        }
    } else {
        None
    };

    let backends = Backends {
        search: yt_dlp.clone(),
        fetcher: yt_dlp,
        embedding,
        expander,
    };

    let cancel = CancellationToken::new();
    let stop_file = root_folder.join(STOP_FILE_NAME);
    if stop_file.exists() {
        // Left over from an earlier run
        let _ = std::fs::remove_file(&stop_file);
    }
    let watcher = tokio::spawn(watch_for_stop(stop_file, cancel.clone()));
    let signals = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
    };

    let runner = SessionRunner::new(settings, root_folder, ledger.clone(), backends, EventBus::new(1024));
    let result = runner.run(start, cancel).await;

    watcher.abort();
    signals.abort();
    ledger.close().await;

    let report = result.context("Session failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Cancel once `stop_file` appears; the file is consumed
async fn watch_for_stop(stop_file: PathBuf, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if stop_file.exists() {
            info!(path = %stop_file.display(), "Stop requested, finishing in-flight work");
            let _ = std::fs::remove_file(&stop_file);
            cancel.cancel();
            return;
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping session");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping session");
        },
    }
}
