pub mod cache;
pub mod collector;
pub mod context;
pub mod lock;
pub mod mount;
pub mod pointer;
pub mod reconciler;
pub mod scheduler;
#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::sync::Mutex;

use crate::alist::{AlistClient, RemoteLister};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};

use cache::CacheStore;
use context::{RunContext, RunSummary};
use lock::RunLock;
use mount::MountConfig;

/// Runs full sync passes over every configured mount.
///
/// Holds no per-run data: each `run_once` builds its own `RunContext` from
/// the persisted cache and saves it back at the end.
pub struct SyncEngine {
    config: Config,
    store: CacheStore,
    state_dir: PathBuf,
    running: Mutex<()>,
}

impl SyncEngine {
    pub fn new(config: Config) -> Result<Self> {
        let state_dir = config.state_dir()?;
        Ok(Self {
            store: CacheStore::new(&state_dir),
            state_dir,
            config,
            running: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Whether this process is currently inside `run_once`.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Run one full pass against the live Alist servers.
    ///
    /// Returns `Ok(None)` when the run was refused: syncing is disabled, or
    /// another run (in this process or another one) is active.
    pub async fn run_once(&self, force_rebuild: bool) -> SyncResult<Option<RunSummary>> {
        if !self.config.general.enabled {
            tracing::warn!("syncing is disabled in the config, not running");
            return Ok(None);
        }

        let Ok(_running) = self.running.try_lock() else {
            tracing::info!("a sync run is already active, skipping");
            return Ok(None);
        };
        let Some(_lock) = RunLock::try_acquire(&self.state_dir)? else {
            tracing::info!(
                state_dir = %self.state_dir.display(),
                "another process holds the run lock, skipping"
            );
            return Ok(None);
        };

        let timeout = self.config.request_timeout();
        let retry = self.config.retry.policy();
        let summary = self
            .run_with(force_rebuild, |mount| {
                AlistClient::new(mount, timeout, retry.clone())
            })
            .await?;
        Ok(Some(summary))
    }

    /// The body of a run, with the lister for each mount supplied by
    /// `connect`. Callers hold the run guards.
    async fn run_with<L, F>(&self, force_rebuild: bool, connect: F) -> SyncResult<RunSummary>
    where
        L: RemoteLister,
        F: Fn(&MountConfig) -> SyncResult<L>,
    {
        let started = std::time::Instant::now();
        let parsed = mount::parse_mounts(&self.config.mounts, self.config.scheme());
        for (line, err) in &parsed.rejected {
            tracing::warn!(line, error = %err, "skipping mount line");
        }

        let rebuilding = force_rebuild || self.store.rebuild_requested().await;
        let mut ctx = RunContext::new(self.store.load_for_run(rebuilding).await);
        ctx.summary.skipped_lines = parsed.rejected.len();

        tracing::info!(
            mounts = parsed.mounts.len(),
            cached = ctx.cache.len(),
            rebuild = rebuilding,
            "sync run started"
        );

        for (index, mount) in parsed.mounts.iter().enumerate() {
            tracing::info!(
                local_root = %mount.local_root.display(),
                remote_root = %mount.remote_root,
                endpoint = %mount.endpoint,
                "syncing mount {}/{}", index + 1, parsed.mounts.len(),
            );

            if let Err(e) = self.sync_mount(mount, &connect, &mut ctx).await {
                tracing::error!(
                    remote_root = %mount.remote_root,
                    error = %e,
                    "mount sync failed"
                );
                ctx.mark_failed(&mount.remote_root);
                ctx.summary.mount_failures += 1;
            }
        }

        collector::collect_stale(&mut ctx, &parsed.mounts).await;

        let (cache, summary) = ctx.into_parts();
        summary.log();
        self.store.save(&cache).await?;
        if rebuilding {
            self.store.clear_rebuild().await?;
        }

        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "sync run complete");
        Ok(summary)
    }

    async fn sync_mount<L, F>(
        &self,
        mount: &MountConfig,
        connect: &F,
        ctx: &mut RunContext,
    ) -> SyncResult<()>
    where
        L: RemoteLister,
        F: Fn(&MountConfig) -> SyncResult<L>,
    {
        tokio::fs::create_dir_all(&mount.local_root)
            .await
            .map_err(|e| SyncError::io(&mount.local_root, e))?;

        let lister = connect(mount)?;
        reconciler::reconcile_mount(&lister, mount, self.config.general.max_depth, ctx).await;
        ctx.summary.mounts_synced += 1;
        Ok(())
    }
}
