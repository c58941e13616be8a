use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod alist;
mod config;
mod error;
mod sync;
mod util;

use sync::SyncEngine;
use sync::lock::RunLock;
use sync::scheduler::{CronSchedule, Scheduler};

#[derive(Parser)]
#[command(
    name = "strmsync",
    version,
    about = "Mirror Alist directory trees as .strm pointer files"
)]
struct Cli {
    /// Path to config file [default: ~/.config/strmsync/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (foreground, for systemd). SIGUSR1 triggers a run.
    Start,
    /// Run one full sync now in this process
    SyncNow {
        /// Ignore the cache and rewrite every pointer file
        #[arg(long)]
        rebuild: bool,
    },
    /// Make the next run start from an empty cache
    Rebuild,
    /// Show sync status summary
    Status,
    /// Validate the config file and mount lines
    Check,
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "strmsync=info",
        1 => "strmsync=debug",
        2 => "strmsync=trace",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// The configured schedule, or `None` when scheduled runs are off.
fn load_schedule(cfg: &config::Config) -> Option<CronSchedule> {
    let expr = cfg.general.schedule.trim();
    if expr.is_empty() {
        tracing::info!("no schedule configured, scheduled runs are off");
        return None;
    }
    match CronSchedule::parse(expr) {
        Ok(schedule) => Some(schedule),
        Err(e) => {
            tracing::warn!(error = %e, "scheduled runs disabled; manual runs still work");
            None
        }
    }
}

fn spawn_run(runs: &mut JoinSet<()>, engine: Arc<SyncEngine>, trigger: &'static str) {
    runs.spawn(async move {
        tracing::info!(trigger, "sync run triggered");
        match engine.run_once(false).await {
            Ok(Some(summary)) => {
                tracing::debug!(trigger, pointers = summary.pointer_writes(), "run done");
            }
            Ok(None) => tracing::info!(trigger, "run skipped"),
            Err(e) => tracing::error!(trigger, error = %e, "sync run failed"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Start => {
            let engine = Arc::new(SyncEngine::new(cfg.clone())?);
            let cancel = CancellationToken::new();
            let mut runs = JoinSet::new();

            let scheduler = if cfg.general.enabled {
                load_schedule(&cfg)
                    .map(|schedule| Scheduler::start(engine.clone(), schedule, cancel.clone()))
            } else {
                tracing::warn!("syncing is disabled in the config; daemon is idle");
                None
            };
            if let Some(scheduler) = &scheduler
                && let Some(next) = scheduler.next_run()
            {
                tracing::info!(
                    schedule = %scheduler.schedule().expr(),
                    next = %next.to_rfc3339(),
                    "next scheduled run"
                );
            }

            if cfg.general.enabled && cfg.general.run_on_start {
                spawn_run(&mut runs, engine.clone(), "start");
            }

            // SIGTERM handling (for systemd graceful stop)
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigusr1 = signal(SignalKind::user_defined1())?;

            tracing::info!(pid = std::process::id(), "strmsync daemon ready");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("received SIGINT, shutting down");
                        break;
                    }

                    _ = sigterm.recv() => {
                        tracing::info!("received SIGTERM, shutting down");
                        break;
                    }

                    _ = sigusr1.recv() => {
                        if engine.is_running() {
                            tracing::info!("received SIGUSR1 during an active run, ignoring");
                        } else {
                            spawn_run(&mut runs, engine.clone(), "signal");
                        }
                    }

                    Some(joined) = runs.join_next() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "sync task panicked");
                        }
                    }
                }
            }

            cancel.cancel();
            if let Some(scheduler) = scheduler {
                scheduler.stop().await;
            }
            if !runs.is_empty() {
                tracing::info!("waiting for the active run to finish");
            }
            while runs.join_next().await.is_some() {}
            tracing::info!("strmsync stopped");
        }
        Command::SyncNow { rebuild } => {
            let engine = SyncEngine::new(cfg)?;
            tracing::info!(rebuild, "running full sync");
            match engine.run_once(rebuild).await? {
                Some(summary) => print_summary(&summary),
                None => println!("sync skipped: disabled, or another run is active"),
            }
        }
        Command::Rebuild => {
            let engine = SyncEngine::new(cfg)?;
            engine.store().request_rebuild().await?;
            println!("rebuild requested; the next run starts from an empty cache");
        }
        Command::Status => {
            let engine = SyncEngine::new(cfg)?;
            print_status(&engine).await;
        }
        Command::Check => check_config(&cfg)?,
    }

    Ok(())
}

fn print_summary(summary: &sync::context::RunSummary) {
    println!("sync complete");
    println!("  Mounts:    {} synced, {} failed", summary.mounts_synced, summary.mount_failures);
    println!(
        "  Pointers:  {} created, {} updated, {} restored, {} deleted",
        summary.pointers_created,
        summary.pointers_updated,
        summary.pointers_restored,
        summary.pointers_deleted
    );
    println!("  Dirs changed:  {}", summary.dirs_changed);
    println!("  Stale removed: {}", summary.stale_removed);
    if summary.listing_failures + summary.write_failures + summary.skipped_lines > 0 {
        println!(
            "  Problems:  {} listing failures, {} write failures, {} skipped mount lines",
            summary.listing_failures, summary.write_failures, summary.skipped_lines
        );
    }
}

/// Print enabled state, schedule, cache size, and run activity.
async fn print_status(engine: &SyncEngine) {
    let cfg = engine.config();
    let cache = engine.store().load().await;
    let parsed = sync::mount::parse_mounts(&cfg.mounts, cfg.scheme());

    println!("strmsync status");
    println!("===============");
    println!("Enabled:   {}", if cfg.general.enabled { "yes" } else { "no" });

    let expr = cfg.general.schedule.trim();
    if expr.is_empty() {
        println!("Schedule:  none");
    } else {
        match CronSchedule::parse(expr) {
            Ok(schedule) => {
                println!("Schedule:  {}", schedule.expr());
                match schedule.next_after(&chrono::Local::now()) {
                    Some(next) if cfg.general.enabled => {
                        println!("Next run:  {}", next.format("%Y-%m-%d %H:%M:%S %Z"));
                    }
                    _ => println!("Next run:  -"),
                }
            }
            Err(e) => println!("Schedule:  invalid ({e})"),
        }
    }

    println!("Mounts:    {}", parsed.mounts.len());
    for mount in &parsed.mounts {
        println!(
            "  {} <- {}{}",
            mount.local_root.display(),
            mount.base_url(),
            mount.remote_root
        );
    }
    println!(
        "Cached:    {} entries ({})",
        cache.len(),
        engine.store().path().display()
    );
    println!(
        "Running:   {}",
        if RunLock::is_held(engine.state_dir()) { "yes" } else { "no" }
    );
    if engine.store().rebuild_requested().await {
        println!("Rebuild:   pending");
    }
    println!("State dir: {}", engine.state_dir().display());
}

/// Report every config problem, failing if any was found.
fn check_config(cfg: &config::Config) -> Result<()> {
    let mut problems = 0;

    let parsed = sync::mount::parse_mounts(&cfg.mounts, cfg.scheme());
    for mount in &parsed.mounts {
        println!(
            "ok    {} <- {}{}",
            mount.local_root.display(),
            mount.base_url(),
            mount.remote_root
        );
    }
    for (line, err) in &parsed.rejected {
        println!("error mount line {line}: {err}");
        problems += 1;
    }
    if parsed.mounts.is_empty() {
        println!("warn  no mounts configured");
    }

    let expr = cfg.general.schedule.trim();
    if !expr.is_empty()
        && let Err(e) = CronSchedule::parse(expr)
    {
        println!("error {e}");
        problems += 1;
    }

    if let Err(e) = cfg.state_dir() {
        println!("error {e}");
        problems += 1;
    }

    if problems > 0 {
        anyhow::bail!("{problems} problem(s) found in config");
    }
    println!("config ok");
    Ok(())
}
