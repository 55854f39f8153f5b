//! CLI entry point for the fetcher tool.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fetcher_core::{
    DownloadCoordinator, DownloadState, HttpTransport, ProgressListener, RelocationFinder, Sink,
    TransportConfig,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::FileConfig;
use cli::Args;
use progress::ProgressReporter;

fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", app_config::VerbositySetting::log_level),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, ?file_config, "configuration loaded");

    let config = transport_config(&args, &file_config);
    config.validate().context("Invalid transport configuration")?;
    let transport = Arc::new(HttpTransport::new(&config).context("Failed to start transport")?);

    if args.relocation {
        let finder = {
            let _runtime = transport.handle().enter();
            RelocationFinder::new(&config)?
        };
        let location = transport
            .handle()
            .block_on(finder.find_relocation(&args.url))
            .with_context(|| format!("Failed to query '{}'", args.url))?;
        if let Some(location) = location {
            println!("{location}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let coordinator = DownloadCoordinator::new(transport.clone());
    let listener: Arc<dyn ProgressListener> = Arc::new(ProgressReporter::new(!args.quiet));

    let task = match &args.output {
        Some(path) => coordinator.sync_download_file(&args.url, path, Some(listener)),
        None => coordinator.sync_download(&args.url, Sink::buffer(), Some(listener)),
    };

    let state = task.state();
    if state == DownloadState::Ok {
        if args.output.is_none()
            && let Some(body) = task.take_buffer()
        {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(&body)
                .and_then(|()| stdout.flush())
                .context("Failed to write body to stdout")?;
        }
        info!(bytes = task.done_size(), "download complete");
    } else {
        warn!(%state, url = %args.url, "download did not complete");
    }

    drop(coordinator);
    if let Ok(transport) = Arc::try_unwrap(transport) {
        transport.close();
    }

    Ok(if state == DownloadState::Ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Layers CLI flags over the config file over built-in defaults.
fn transport_config(args: &Args, file: &FileConfig) -> TransportConfig {
    let mut config = TransportConfig::default();
    if let Some(secs) = args.connect_timeout.or(file.connect_timeout_secs) {
        config = config.with_connect_timeout_secs(secs);
    }
    if let Some(secs) = args.read_timeout.or(file.read_timeout_secs) {
        config = config.with_read_timeout_secs(secs);
    }
    if let Some(workers) = file.worker_threads {
        config = config.with_worker_threads(workers);
    }
    if let Some(user_agent) = &file.user_agent {
        config = config.with_user_agent(user_agent.clone());
    }
    config
}
