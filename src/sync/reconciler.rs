use std::path::{Path, PathBuf};

use crate::alist::{RemoteLister, RemoteNode};
use crate::error::SyncError;
use crate::util::path as sync_path;

use super::cache::CacheEntry;
use super::collector;
use super::context::RunContext;
use super::mount::MountConfig;
use super::pointer;

/// A directory waiting to be listed.
#[derive(Debug)]
struct PendingDir {
    remote_path: String,
    relative_path: String,
    depth: usize,
}

/// What a media file needs this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileAction {
    Create,
    Update,
    /// Cached and unchanged, but the pointer is missing or sits elsewhere.
    Restore,
    Skip,
}

/// Walk one mount's remote tree and bring its pointer files and cache
/// entries up to date.
///
/// The walk is depth-first over an explicit stack. A directory counts as
/// visited only once its listing succeeded; a failed listing (or a directory
/// deeper than `max_depth`) is recorded as failed so the collector keeps
/// whatever was cached beneath it.
pub async fn reconcile_mount<L: RemoteLister>(
    lister: &L,
    mount: &MountConfig,
    max_depth: usize,
    ctx: &mut RunContext,
) {
    let mut stack = vec![PendingDir {
        remote_path: mount.remote_root.clone(),
        relative_path: String::new(),
        depth: 0,
    }];

    while let Some(dir) = stack.pop() {
        if dir.depth > max_depth {
            let err = SyncError::protocol(
                &dir.remote_path,
                format!("directory depth exceeds limit of {max_depth}"),
            );
            tracing::error!(error = %err, "not descending further");
            ctx.summary.listing_failures += 1;
            ctx.mark_failed(&dir.remote_path);
            continue;
        }

        let children = match lister.list(&dir.remote_path).await {
            Ok(children) => children,
            Err(e) => {
                tracing::error!(
                    path = %dir.remote_path,
                    error = %e,
                    "listing failed, keeping cached state for this subtree"
                );
                ctx.summary.listing_failures += 1;
                ctx.mark_failed(&dir.remote_path);
                continue;
            }
        };
        ctx.mark_visited(&dir.remote_path);
        tracing::debug!(path = %dir.remote_path, count = children.len(), "listed directory");

        let mut subdirs = Vec::new();
        for node in &children {
            if !sync_path::is_safe_name(&node.name) {
                tracing::warn!(
                    parent = %dir.remote_path,
                    name = %node.name,
                    "skipping entry with unusable name"
                );
                continue;
            }

            let remote_path = sync_path::join_remote(&dir.remote_path, &node.name);
            let relative_path = sync_path::join_relative(&dir.relative_path, &node.name);

            if node.is_dir {
                reconcile_dir(ctx, mount, &remote_path, node).await;
                subdirs.push(PendingDir {
                    remote_path,
                    relative_path,
                    depth: dir.depth + 1,
                });
            } else if pointer::is_media(&node.name) {
                reconcile_file(ctx, mount, &remote_path, &relative_path, node).await;
            } else {
                tracing::trace!(path = %remote_path, "skipping non-media file");
            }
        }

        // Reversed so the first listed subdirectory is walked first.
        stack.extend(subdirs.into_iter().rev());
    }
}

/// Update the cache entry for a directory when it is new or changed.
async fn reconcile_dir(
    ctx: &mut RunContext,
    mount: &MountConfig,
    remote_path: &str,
    node: &RemoteNode,
) {
    ctx.mark_visited(remote_path);

    let changed = match ctx.cache.get(remote_path) {
        None => true,
        Some(cached) => {
            !cached.is_dir || cached.name != node.name || cached.updated_at != node.updated_at
        }
    };
    if !changed {
        return;
    }

    tracing::info!(path = %remote_path, "directory new or changed");
    let previous = ctx
        .cache
        .insert(remote_path.to_string(), CacheEntry::directory(node));
    ctx.summary.dirs_changed += 1;

    // A media file that turned into a directory leaves its pointer behind.
    if let Some(old_pointer) = previous.and_then(|p| p.local_strm_path) {
        collector::remove_pointer(&old_pointer, Some(&mount.local_root)).await;
    }
}

/// Create, update, or restore the pointer file for one media file.
async fn reconcile_file(
    ctx: &mut RunContext,
    mount: &MountConfig,
    remote_path: &str,
    relative_path: &str,
    node: &RemoteNode,
) {
    ctx.mark_visited(remote_path);

    let link = pointer::pointer_link(mount, remote_path);
    let pointer_path = pointer::pointer_path(&mount.local_root, relative_path);
    let cached = ctx.cache.get(remote_path);
    let action = file_action(cached, node, &link, &pointer_path).await;

    match action {
        FileAction::Skip => {
            tracing::trace!(path = %remote_path, "unchanged");
        }
        FileAction::Create | FileAction::Update => {
            if action == FileAction::Create {
                tracing::info!(path = %remote_path, "new media file");
            } else {
                tracing::info!(path = %remote_path, "media file changed");
            }

            if let Err(e) = pointer::write_pointer(&pointer_path, &link).await {
                tracing::error!(path = %remote_path, error = %e, "failed to write pointer file");
                ctx.summary.write_failures += 1;
                return;
            }

            let previous = ctx.cache.insert(
                remote_path.to_string(),
                CacheEntry::media(node, link, pointer_path.clone()),
            );
            remove_relocated(previous.and_then(|p| p.local_strm_path), &pointer_path, mount)
                .await;

            if action == FileAction::Create {
                ctx.summary.pointers_created += 1;
            } else {
                ctx.summary.pointers_updated += 1;
            }
        }
        FileAction::Restore => {
            tracing::warn!(
                path = %remote_path,
                pointer = %pointer_path.display(),
                "cached pointer file missing, recreating"
            );

            if let Err(e) = pointer::write_pointer(&pointer_path, &link).await {
                tracing::error!(path = %remote_path, error = %e, "failed to restore pointer file");
                ctx.summary.write_failures += 1;
                return;
            }

            let mut previous = None;
            if let Some(entry) = ctx.cache.get_mut(remote_path) {
                previous = entry.local_strm_path.replace(pointer_path.clone());
            }
            remove_relocated(previous, &pointer_path, mount).await;
            ctx.summary.pointers_restored += 1;
        }
    }
}

async fn file_action(
    cached: Option<&CacheEntry>,
    node: &RemoteNode,
    link: &str,
    pointer_path: &Path,
) -> FileAction {
    let Some(cached) = cached else {
        return FileAction::Create;
    };

    if cached.is_dir
        || cached.size != node.size
        || cached.updated_at != node.updated_at
        || cached.strm_link.as_deref() != Some(link)
    {
        return FileAction::Update;
    }

    let in_place = cached.local_strm_path.as_deref() == Some(pointer_path);
    let exists = tokio::fs::try_exists(pointer_path).await.unwrap_or(false);
    if in_place && exists {
        FileAction::Skip
    } else {
        FileAction::Restore
    }
}

/// Delete a pointer that a previous run wrote at a different local path.
async fn remove_relocated(previous: Option<PathBuf>, current: &Path, mount: &MountConfig) {
    if let Some(old) = previous
        && old != current
    {
        tracing::info!(from = %old.display(), to = %current.display(), "pointer file moved");
        let root = old
            .starts_with(&mount.local_root)
            .then_some(mount.local_root.as_path());
        collector::remove_pointer(&old, root).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::cache::CacheMap;
    use crate::sync::mount::Scheme;
    use crate::sync::testing::{FakeTree, dir, file};

    fn mount(root: &Path) -> MountConfig {
        MountConfig {
            local_root: root.to_path_buf(),
            remote_root: "/Anime".into(),
            endpoint: "alist.local:5244".into(),
            token: "t".into(),
            scheme: Scheme::Http,
        }
    }

    fn scenario_tree() -> FakeTree {
        FakeTree::default()
            .with_dir("/Anime", vec![dir("S1", "d1")])
            .with_dir("/Anime/S1", vec![file("ep1.mkv", 100, "t1")])
    }

    async fn run(tree: &FakeTree, mount: &MountConfig, cache: CacheMap) -> RunContext {
        let mut ctx = RunContext::new(cache);
        reconcile_mount(tree, mount, 64, &mut ctx).await;
        ctx
    }

    #[tokio::test]
    async fn test_first_run_writes_pointer_and_caches_both_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());

        let ctx = run(&scenario_tree(), &mount, CacheMap::new()).await;

        let pointer = tmp.path().join("S1/ep1.strm");
        assert_eq!(
            std::fs::read_to_string(&pointer).unwrap(),
            "http://alist.local:5244/d/Anime/S1/ep1.mkv"
        );
        assert_eq!(ctx.cache.len(), 2);
        assert!(ctx.cache["/Anime/S1"].is_dir);
        assert!(ctx.cache["/Anime/S1"].strm_link.is_none());
        let entry = &ctx.cache["/Anime/S1/ep1.mkv"];
        assert_eq!(
            entry.strm_link.as_deref(),
            Some("http://alist.local:5244/d/Anime/S1/ep1.mkv")
        );
        assert_eq!(entry.local_strm_path.as_deref(), Some(pointer.as_path()));
        assert_eq!(ctx.summary.pointers_created, 1);
        assert_eq!(ctx.summary.dirs_changed, 1);
        assert!(ctx.was_visited("/Anime"));
        assert!(ctx.was_visited("/Anime/S1/ep1.mkv"));
    }

    #[tokio::test]
    async fn test_second_run_over_unchanged_tree_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        let tree = scenario_tree();

        let first = run(&tree, &mount, CacheMap::new()).await;
        let (cache, _) = first.into_parts();
        let pointer = tmp.path().join("S1/ep1.strm");
        let written_at = std::fs::metadata(&pointer).unwrap().modified().unwrap();

        let second = run(&tree, &mount, cache.clone()).await;

        assert_eq!(second.summary.pointer_writes(), 0);
        assert_eq!(second.summary.dirs_changed, 0);
        assert_eq!(second.cache, cache);
        assert_eq!(
            std::fs::metadata(&pointer).unwrap().modified().unwrap(),
            written_at
        );
    }

    #[tokio::test]
    async fn test_non_media_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        let tree = FakeTree::default().with_dir(
            "/Anime",
            vec![file("movie.mkv", 5, "t"), file("poster.jpg", 5, "t")],
        );

        let ctx = run(&tree, &mount, CacheMap::new()).await;

        assert!(tmp.path().join("movie.strm").exists());
        assert!(!tmp.path().join("poster.strm").exists());
        assert!(!ctx.cache.contains_key("/Anime/poster.jpg"));
        assert!(!ctx.was_visited("/Anime/poster.jpg"));
    }

    #[tokio::test]
    async fn test_changed_metadata_rewrites_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());

        let (cache, _) = run(&scenario_tree(), &mount, CacheMap::new())
            .await
            .into_parts();
        let resized = FakeTree::default()
            .with_dir("/Anime", vec![dir("S1", "d1")])
            .with_dir("/Anime/S1", vec![file("ep1.mkv", 200, "t2")]);

        let ctx = run(&resized, &mount, cache).await;

        assert_eq!(ctx.summary.pointers_updated, 1);
        assert_eq!(ctx.cache["/Anime/S1/ep1.mkv"].size, 200);
        assert_eq!(ctx.cache["/Anime/S1/ep1.mkv"].updated_at, "t2");
    }

    #[tokio::test]
    async fn test_missing_pointer_is_restored_without_touching_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        let tree = scenario_tree();

        let (cache, _) = run(&tree, &mount, CacheMap::new()).await.into_parts();
        std::fs::remove_file(tmp.path().join("S1/ep1.strm")).unwrap();

        let ctx = run(&tree, &mount, cache.clone()).await;

        assert_eq!(ctx.summary.pointers_restored, 1);
        assert!(tmp.path().join("S1/ep1.strm").exists());
        assert_eq!(ctx.cache, cache);
    }

    #[tokio::test]
    async fn test_moved_local_root_relocates_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let old_mount = mount(&tmp.path().join("old"));
        let new_mount = mount(&tmp.path().join("new"));
        let tree = scenario_tree();

        let (cache, _) = run(&tree, &old_mount, CacheMap::new()).await.into_parts();
        let ctx = run(&tree, &new_mount, cache).await;

        assert_eq!(ctx.summary.pointers_restored, 1);
        assert!(tmp.path().join("new/S1/ep1.strm").exists());
        assert!(!tmp.path().join("old/S1/ep1.strm").exists());
        assert_eq!(
            ctx.cache["/Anime/S1/ep1.mkv"].local_strm_path.as_deref(),
            Some(tmp.path().join("new/S1/ep1.strm").as_path())
        );
    }

    #[tokio::test]
    async fn test_failed_listing_marks_subtree_failed_not_visited() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        let tree = FakeTree::default()
            .with_dir("/Anime", vec![dir("S1", "d1"), dir("S2", "d2")])
            .with_dir("/Anime/S2", vec![file("ep1.mkv", 1, "t")])
            .failing("/Anime/S1");

        let ctx = run(&tree, &mount, CacheMap::new()).await;

        assert_eq!(ctx.summary.listing_failures, 1);
        assert!(ctx.is_protected("/Anime/S1/anything.mkv"));
        assert!(tmp.path().join("S2/ep1.strm").exists());
    }

    #[tokio::test]
    async fn test_depth_limit_stops_descent() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        let tree = FakeTree::default()
            .with_dir("/Anime", vec![dir("a", "1")])
            .with_dir("/Anime/a", vec![dir("b", "1")])
            .with_dir("/Anime/a/b", vec![file("deep.mkv", 1, "t")]);

        let mut ctx = RunContext::new(CacheMap::new());
        reconcile_mount(&tree, &mount, 1, &mut ctx).await;

        assert_eq!(ctx.summary.listing_failures, 1);
        assert!(ctx.is_protected("/Anime/a/b"));
        assert!(!tmp.path().join("a/b/deep.strm").exists());
    }

    #[tokio::test]
    async fn test_unsafe_names_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(&tmp.path().join("root"));
        let tree = FakeTree::default()
            .with_dir("/Anime", vec![dir("..", "x"), file("../x.mkv", 1, "t")]);

        let ctx = run(&tree, &mount, CacheMap::new()).await;

        assert!(ctx.cache.is_empty());
        assert!(!tmp.path().join("x.strm").exists());
    }

    #[tokio::test]
    async fn test_write_failure_leaves_cache_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let mount = mount(tmp.path());
        std::fs::write(tmp.path().join("S1"), "a file where a directory should be").unwrap();

        let ctx = run(&scenario_tree(), &mount, CacheMap::new()).await;

        assert_eq!(ctx.summary.write_failures, 1);
        assert!(!ctx.cache.contains_key("/Anime/S1/ep1.mkv"));
        assert!(ctx.was_visited("/Anime/S1/ep1.mkv"));
    }
}
