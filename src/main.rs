//! idlewatch - print idle and screen-lock changes of the current session.
//!
//! Subscribes to systemd-logind through the idle detection store and prints
//! every change until interrupted.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use idlewatch::IdleDetectionStore;
use idlewatch::LogindSensor;
use idlewatch::Permission;
use idlewatch::SensorSnapshot;
use idlewatch::SubscriptionState;
use idlewatch::config::Config;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Idle and screen-lock watcher for systemd-logind sessions.
#[derive(Parser, Debug)]
#[command(name = "idlewatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds without input before the user counts as idle.
    #[arg(short, long)]
    threshold: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print changes as JSON lines.
    #[arg(long)]
    json: bool,

    /// Exit after a number of changes.
    #[arg(long)]
    oneshot: bool,

    /// Number of changes to print in oneshot mode.
    #[arg(long, default_value = "1")]
    oneshot_count: usize,

    /// Report support and permission, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("idlewatch v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(threshold) = args.threshold {
        config.threshold_seconds = threshold;
    }
    if args.json {
        config.print_json = true;
    }

    debug!("Configuration loaded: {:?}", config);

    let store = IdleDetectionStore::new(LogindSensor::from_config(&config));

    if args.check {
        return run_check(&store).await;
    }

    if store.current_state() == SubscriptionState::NotSupported {
        error!("systemd-logind not detected.");
        error!("idlewatch needs a systemd host with a logind session.");
        anyhow::bail!("Idle detection not supported on this host");
    }

    let limit = args.oneshot.then_some(args.oneshot_count);
    run_watch(&store, &config, limit).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idlewatch={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Print support and permission and exit.
async fn run_check(store: &IdleDetectionStore<LogindSensor>) -> Result<()> {
    println!("supported: {}", store.controller().is_supported());

    let permission = store.request_permission().await;
    println!(
        "permission: {}",
        permission.map_or("unknown", Permission::as_str)
    );
    println!("state: {}", store.current_state());

    Ok(())
}

/// Subscribe and print changes until shutdown or `limit` changes.
async fn run_watch(
    store: &IdleDetectionStore<LogindSensor>,
    config: &Config,
    limit: Option<usize>,
) -> Result<()> {
    let mut snapshots = store.snapshots();
    let mut state = store.state();

    let permission = store
        .request_permission_and_start(Some(config.threshold()))
        .await;

    if permission != Some(Permission::Granted) {
        anyhow::bail!("Idle detection permission denied");
    }
    if store.current_state() != SubscriptionState::Started {
        anyhow::bail!(
            "Idle detection failed to start (state: {})",
            store.current_state()
        );
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut last_printed = None;
    let mut printed = 0;

    loop {
        // The first readout arrives during start, so check before waiting.
        let snapshot = snapshots.borrow_and_update();

        if last_printed != Some(snapshot) && snapshot != SensorSnapshot::default() {
            print_snapshot(snapshot, config.print_json)?;
            last_printed = Some(snapshot);
            printed += 1;

            if limit.is_some_and(|n| printed >= n) {
                info!("Oneshot mode complete, printed {} changes", printed);
                break;
            }
        }

        tokio::select! {
            res = snapshots.changed() => res.context("Store closed")?,
            res = state.changed() => {
                res.context("Store closed")?;
                let current = *state.borrow_and_update();
                if current == SubscriptionState::Stopped {
                    warn!("Idle detection stopped");
                    break;
                }
            }
            res = &mut shutdown => {
                res?;
                info!("Shutting down");
                break;
            }
        }
    }

    store.stop();
    Ok(())
}

fn print_snapshot(snapshot: SensorSnapshot, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(&snapshot).context("Failed to encode snapshot")?;
        println!("{line}");
    } else {
        println!("[IDLE] | {snapshot}");
    }
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}
