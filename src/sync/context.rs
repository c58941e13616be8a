use std::collections::HashSet;

use crate::util::path as sync_path;

use super::cache::CacheMap;

/// Counters reported at the end of every run, partial failures included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub mounts_synced: usize,
    pub mount_failures: usize,
    pub skipped_lines: usize,
    pub pointers_created: usize,
    pub pointers_updated: usize,
    pub pointers_restored: usize,
    pub dirs_changed: usize,
    pub stale_removed: usize,
    pub pointers_deleted: usize,
    pub listing_failures: usize,
    pub write_failures: usize,
}

impl RunSummary {
    /// Number of pointer files written during the run.
    pub fn pointer_writes(&self) -> usize {
        self.pointers_created + self.pointers_updated + self.pointers_restored
    }

    pub fn log(&self) {
        tracing::info!(
            mounts = self.mounts_synced,
            mount_failures = self.mount_failures,
            skipped_lines = self.skipped_lines,
            created = self.pointers_created,
            updated = self.pointers_updated,
            restored = self.pointers_restored,
            dirs_changed = self.dirs_changed,
            stale_removed = self.stale_removed,
            pointers_deleted = self.pointers_deleted,
            listing_failures = self.listing_failures,
            write_failures = self.write_failures,
            "sync run finished"
        );
    }
}

/// Everything one run mutates. Built per invocation, dropped after the
/// cache is saved.
#[derive(Debug, Default)]
pub struct RunContext {
    pub cache: CacheMap,
    pub summary: RunSummary,
    visited: HashSet<String>,
    failed: Vec<String>,
}

impl RunContext {
    pub fn new(cache: CacheMap) -> Self {
        Self {
            cache,
            ..Self::default()
        }
    }

    pub fn mark_visited(&mut self, remote_path: &str) {
        self.visited.insert(remote_path.to_string());
    }

    pub fn was_visited(&self, remote_path: &str) -> bool {
        self.visited.contains(remote_path)
    }

    /// Record a directory whose contents are unknown this run.
    pub fn mark_failed(&mut self, remote_path: &str) {
        self.failed.push(remote_path.to_string());
    }

    /// Whether `remote_path` lies in a subtree whose listing failed, so its
    /// cached state must be kept as-is.
    pub fn is_protected(&self, remote_path: &str) -> bool {
        self.failed
            .iter()
            .any(|f| sync_path::is_same_or_descendant(remote_path, f))
    }

    pub fn into_parts(self) -> (CacheMap, RunSummary) {
        (self.cache, self.summary)
    }
}
