use std::path::Path;

use anyhow::{Context, Result};

/// Join a remote directory path and a child name with a single `/`.
///
/// `("/Anime", "S1")` → `"/Anime/S1"`, `("/", "S1")` → `"/S1"`
pub fn join_remote(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Join a local-relative path and a child name; the root is the empty string.
pub fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Whether remote path `path` is `ancestor` itself or lies beneath it.
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    if path == ancestor {
        return true;
    }
    if ancestor.ends_with('/') {
        return path.starts_with(ancestor);
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Reject listing entries whose name would escape the local root or
/// collide with path syntax.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Normalize a configured remote root: leading `/`, no trailing `/`
/// (except for the root itself).
pub fn normalize_remote_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Compute the relative path from `base` to `full` as a forward-slash string.
pub fn relative_path(base: &Path, full: &Path) -> Result<String> {
    let rel = full
        .strip_prefix(base)
        .with_context(|| format!("{} is not under {}", full.display(), base.display()))?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}
