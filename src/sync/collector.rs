use std::path::{Path, PathBuf};

use crate::util::path as sync_path;

use super::context::RunContext;
use super::mount::MountConfig;
use super::pointer;

/// Drop every cache entry the walk did not reach, deleting its pointer file.
///
/// Only entries inside the remote root of one of `mounts` are considered.
/// Entries under a directory whose listing failed are kept: their remote
/// state is unknown this run, not gone. Entries outside every configured
/// remote root (a mount line that was skipped or removed) are left alone.
pub async fn collect_stale(ctx: &mut RunContext, mounts: &[MountConfig]) {
    let stale: Vec<String> = ctx
        .cache
        .keys()
        .filter(|path| in_namespace(mounts, path))
        .filter(|path| !ctx.was_visited(path) && !ctx.is_protected(path))
        .cloned()
        .collect();

    let untracked = ctx
        .cache
        .keys()
        .filter(|path| !in_namespace(mounts, path))
        .count();
    if untracked > 0 {
        tracing::debug!(count = untracked, "keeping entries outside every mount");
    }

    if stale.is_empty() {
        tracing::info!("cleanup finished, nothing stale");
        return;
    }

    for remote_path in stale {
        let Some(entry) = ctx.cache.remove(&remote_path) else {
            continue;
        };
        tracing::info!(path = %remote_path, is_dir = entry.is_dir, "removing stale entry");

        if !entry.is_dir
            && let Some(pointer) = entry.local_strm_path
        {
            let root = owning_root(mounts, &pointer);
            if remove_pointer(&pointer, root).await {
                ctx.summary.pointers_deleted += 1;
            }
        }
        ctx.summary.stale_removed += 1;
    }

    tracing::info!(count = ctx.summary.stale_removed, "cleanup finished");
}

fn in_namespace(mounts: &[MountConfig], remote_path: &str) -> bool {
    mounts
        .iter()
        .any(|m| sync_path::is_same_or_descendant(remote_path, &m.remote_root))
}

/// The configured local root that contains `pointer`, deepest first.
fn owning_root<'a>(mounts: &'a [MountConfig], pointer: &Path) -> Option<&'a Path> {
    mounts
        .iter()
        .map(|m| m.local_root.as_path())
        .filter(|root| pointer.starts_with(root))
        .max_by_key(|root| root.components().count())
}

/// Delete one pointer file and prune the directories it leaves empty.
///
/// Pruning stops at `stop_at` (never removed) or the first non-empty
/// directory. Without a known root only the file itself is removed.
/// Returns whether a file was actually deleted.
pub async fn remove_pointer(pointer: &Path, stop_at: Option<&Path>) -> bool {
    match tokio::fs::remove_file(pointer).await {
        Ok(()) => {
            let shown = stop_at
                .and_then(|root| sync_path::relative_path(root, pointer).ok())
                .unwrap_or_else(|| pointer.display().to_string());
            tracing::info!(path = %shown, "deleted pointer file");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %pointer.display(), "pointer file already gone");
            return false;
        }
        Err(e) => {
            tracing::error!(path = %pointer.display(), error = %e, "failed to delete pointer file");
            return false;
        }
    }

    if let (Some(parent), Some(root)) = (pointer.parent(), stop_at) {
        prune_empty_dirs(parent, root).await;
    }
    true
}

/// Remove `start` and its ancestors while they are empty, staying strictly
/// below `root`.
pub async fn prune_empty_dirs(start: &Path, root: &Path) {
    let mut dir: PathBuf = start.to_path_buf();

    while dir != root && dir.starts_with(root) {
        if !is_empty_dir(&dir).await {
            break;
        }
        if let Err(e) = tokio::fs::remove_dir(&dir).await {
            tracing::debug!(path = %dir.display(), error = %e, "cannot remove directory");
            break;
        }
        tracing::info!(path = %dir.display(), "removed empty directory");

        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
}

/// Whether `dir` holds nothing but staging files from interrupted pointer
/// writes. Those leftovers are deleted along the way.
async fn is_empty_dir(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };

    loop {
        match entries.next_entry().await {
            Ok(None) => return true,
            Ok(Some(entry)) if pointer::is_leftover_tmp(&entry.file_name()) => {
                let path = entry.path();
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    tracing::debug!(path = %path.display(), error = %e, "cannot remove leftover temp file");
                    return false;
                }
                tracing::info!(path = %path.display(), "removed leftover temp file");
            }
            Ok(Some(_)) | Err(_) => return false,
        }
    }
}
