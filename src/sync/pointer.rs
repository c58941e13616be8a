use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};

use super::mount::MountConfig;

/// Extension written in place of the media container's.
pub const POINTER_EXTENSION: &str = "strm";

/// Suffix of the sibling a pointer is staged in before the rename.
const TMP_SUFFIX: &str = ".strmsync.tmp";

/// Container formats that get a pointer file. Lowercase, without the dot.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "ts", "rmvb", "m2ts", "mpg", "mpeg", "rm", "asf",
    "iso",
];

/// Whether `name` carries an allow-listed media extension (case-insensitive).
pub fn is_media(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|m| ext.eq_ignore_ascii_case(m))
        })
}

/// `local_root/relative` with the media extension swapped for `.strm`.
pub fn pointer_path(local_root: &Path, relative: &str) -> PathBuf {
    local_root.join(relative).with_extension(POINTER_EXTENSION)
}

/// `{scheme}://{endpoint}/d{remote_path}`, used verbatim as file content.
pub fn pointer_link(mount: &MountConfig, remote_path: &str) -> String {
    format!("{}/d{remote_path}", mount.base_url())
}

/// Write `link` as the whole content of `path`, creating parent directories.
///
/// Goes through a `.strmsync.tmp` sibling and a rename so a reader never
/// sees a half-written pointer.
pub async fn write_pointer(path: &Path, link: &str) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }

    let tmp = tmp_path(path);
    if let Err(e) = tokio::fs::write(&tmp, link).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SyncError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(SyncError::io(path, e));
    }

    tracing::info!(path = %path.display(), "wrote pointer file");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{TMP_SUFFIX}"))
}

/// Whether `name` is a staging file left by an interrupted `write_pointer`.
pub fn is_leftover_tmp(name: &OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TMP_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mount::Scheme;

    #[test]
    fn test_media_extension_matching() {
        assert!(is_media("movie.mkv"));
        assert!(is_media("MOVIE.MKV"));
        assert!(is_media("show.s01e01.Mp4"));
        assert!(!is_media("poster.jpg"));
        assert!(!is_media("movie.nfo"));
        assert!(!is_media("mkv"));
    }

    #[test]
    fn test_pointer_path_replaces_extension() {
        let root = Path::new("/strm/anime");
        assert_eq!(
            pointer_path(root, "S1/ep1.mkv"),
            PathBuf::from("/strm/anime/S1/ep1.strm")
        );
        assert_eq!(
            pointer_path(root, "Show.2024.1080p.mp4"),
            PathBuf::from("/strm/anime/Show.2024.1080p.strm")
        );
    }

    #[test]
    fn test_pointer_link_is_deterministic() {
        let mount = MountConfig {
            local_root: PathBuf::from("/strm"),
            remote_root: "/Anime".into(),
            endpoint: "192.168.1.10:5244".into(),
            token: "t".into(),
            scheme: Scheme::Https,
        };
        let link = pointer_link(&mount, "/Anime/S1/ep1.mkv");
        assert_eq!(link, "https://192.168.1.10:5244/d/Anime/S1/ep1.mkv");
        assert_eq!(link, pointer_link(&mount, "/Anime/S1/ep1.mkv"));
    }

    #[tokio::test]
    async fn test_write_pointer_creates_parents_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/ep1.strm");

        write_pointer(&path, "http://h/d/old").await.unwrap();
        write_pointer(&path, "http://h/d/new").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "http://h/d/new");
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temp file left behind: {leftovers:?}");
    }

    #[test]
    fn test_leftover_tmp_names() {
        let tmp = tmp_path(Path::new("/strm/S1/ep1.strm"));
        assert!(is_leftover_tmp(tmp.file_name().unwrap()));
        assert!(!is_leftover_tmp(OsStr::new("ep1.strm")));
        assert!(!is_leftover_tmp(OsStr::new("notes.strmsync.tmp")));
    }

    #[tokio::test]
    async fn test_write_pointer_fails_when_parent_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), "x").unwrap();

        let err = write_pointer(&dir.path().join("blocker/ep1.strm"), "l")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }));
    }
}
