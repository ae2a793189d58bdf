use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gesture_session::config::Configuration;
use gesture_session::events::SessionCommand;
use gesture_session::settings::SettingsStore;
use gesture_session::tasks::session::SessionSnapshot;
use gesture_session::tasks::{console, files, session};

#[derive(Debug, Parser)]
#[command(
    name = "gesture-session",
    version,
    about = "timed image practice sessions"
)]
struct Args {
    /// Directory of reference images; remembered for next time
    #[arg(value_name = "DIRECTORY")]
    directory: Option<PathBuf>,
    /// Path to YAML config (engine tunables)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Override the settings file location
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
    /// Set and remember the target time per image (e.g. `90s`, `2m`)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    duration: Option<std::time::Duration>,
    /// Start with autoplay enabled
    #[arg(long)]
    autoplay: bool,
    /// Deterministic RNG seed for image selection
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "gesture_session=debug",
        _ => "gesture_session=trace",
    };
    // Logs go to stderr; stdout carries the status line.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        directory,
        config,
        settings,
        duration,
        autoplay,
        seed,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let directory = directory
        .map(|dir| {
            dir.canonicalize()
                .with_context(|| format!("cannot open {}", dir.display()))
        })
        .transpose()?;

    let mut cfg = match &config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    }
    .validated()
    .context("invalid configuration values")?;
    if seed.is_some() {
        cfg.selection_seed = seed;
    }
    if settings.is_some() {
        cfg.settings_path = settings;
    }
    tracing::debug!("configuration:\n{:#?}", cfg);

    let store = SettingsStore::new(cfg.settings_file()?);

    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(cfg.command_buffer); // Console/Settings -> Session
    let (state_tx, state_rx) = watch::channel(SessionSnapshot::default()); // Session -> Console

    // Rescans follow the persisted directory, including the one restored below.
    let _directory_listener = files::follow_last_directory(&store, cmd_tx.clone());
    store.bootstrap();

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Session controller
    tasks.spawn({
        let cfg = cfg.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        async move {
            session::run(
                cfg,
                store,
                Arc::new(console::TerminalBell),
                cmd_rx,
                state_tx,
                cancel,
            )
            .await
            .context("session task failed")
        }
    });

    // Console input
    tasks.spawn({
        let cmd_tx = cmd_tx.clone();
        let state_rx = state_rx.clone();
        let cancel = cancel.clone();
        async move {
            console::run_input(cmd_tx, state_rx, cancel)
                .await
                .context("console input failed")
        }
    });

    // Status line
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            console::run_status(state_rx, cancel)
                .await
                .context("status line failed")
        }
    });

    // Startup requests go through the controller like any console command.
    let mut startup = Vec::new();
    if let Some(target) = duration {
        startup.push(SessionCommand::ChangeDuration(target));
    }
    if let Some(dir) = directory {
        startup.push(SessionCommand::OpenDirectory(Some(dir)));
    }
    if autoplay {
        startup.push(SessionCommand::ToggleAutoplay);
    }
    for cmd in startup {
        cmd_tx
            .send(cmd)
            .await
            .context("session task not running")?;
    }

    // Any task ending (quit, EOF, failure) stops the rest.
    while let Some(res) = tasks.join_next().await {
        cancel.cancel();
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}
