use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alist::RemoteNode;
use crate::error::{SyncError, SyncResult};

const CACHE_FILE: &str = "strm_cache.json";
const REBUILD_FLAG: &str = "rebuild.flag";

/// Last observed state of one remote path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub updated_at: String,
    /// Exact content of the pointer file (media files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strm_link: Option<String>,
    /// Absolute path of the pointer file (media files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_strm_path: Option<PathBuf>,
}

impl CacheEntry {
    pub fn directory(node: &RemoteNode) -> Self {
        Self {
            name: node.name.clone(),
            is_dir: true,
            size: node.size,
            updated_at: node.updated_at.clone(),
            strm_link: None,
            local_strm_path: None,
        }
    }

    pub fn media(node: &RemoteNode, link: String, pointer: PathBuf) -> Self {
        Self {
            name: node.name.clone(),
            is_dir: false,
            size: node.size,
            updated_at: node.updated_at.clone(),
            strm_link: Some(link),
            local_strm_path: Some(pointer),
        }
    }
}

/// Remote path → last observed entry. Ordered so the cache file is stable.
pub type CacheMap = BTreeMap<String, CacheEntry>;

/// On-disk home of the cache file and the one-shot rebuild flag.
#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_path: PathBuf,
    rebuild_flag: PathBuf,
}

impl CacheStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            cache_path: state_dir.join(CACHE_FILE),
            rebuild_flag: state_dir.join(REBUILD_FLAG),
        }
    }

    pub fn path(&self) -> &Path {
        &self.cache_path
    }

    /// Read the cache file. A missing file and a corrupt file both yield an
    /// empty map; the latter is logged.
    pub async fn load(&self) -> CacheMap {
        let content = match tokio::fs::read(&self.cache_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.cache_path.display(), "no cache file, starting empty");
                return CacheMap::new();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.cache_path.display(),
                    error = %e,
                    "cannot read cache file, starting empty"
                );
                return CacheMap::new();
            }
        };

        match serde_json::from_slice::<CacheMap>(&content) {
            Ok(map) => {
                tracing::info!(count = map.len(), "loaded cache");
                map
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.cache_path.display(),
                    error = %e,
                    "cache file is corrupt, starting empty"
                );
                CacheMap::new()
            }
        }
    }

    /// The cache a run should start from: empty when a rebuild is forced or
    /// pending, otherwise whatever is on disk.
    pub async fn load_for_run(&self, force_rebuild: bool) -> CacheMap {
        if force_rebuild || self.rebuild_requested().await {
            tracing::info!("rebuild requested, starting from an empty cache");
            return CacheMap::new();
        }
        self.load().await
    }

    /// Replace the cache file with `map` via a temp file and rename.
    pub async fn save(&self, map: &CacheMap) -> SyncResult<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(map).map_err(|e| {
            SyncError::io(
                &self.cache_path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        let tmp = self.cache_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| SyncError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.cache_path)
            .await
            .map_err(|e| SyncError::io(&self.cache_path, e))?;

        tracing::info!(count = map.len(), path = %self.cache_path.display(), "saved cache");
        Ok(())
    }

    /// Ask the next run to start from an empty cache.
    pub async fn request_rebuild(&self) -> SyncResult<()> {
        if let Some(parent) = self.rebuild_flag.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io(parent, e))?;
        }
        let stamp = chrono::Local::now().to_rfc3339();
        tokio::fs::write(&self.rebuild_flag, stamp)
            .await
            .map_err(|e| SyncError::io(&self.rebuild_flag, e))
    }

    pub async fn rebuild_requested(&self) -> bool {
        tokio::fs::try_exists(&self.rebuild_flag)
            .await
            .unwrap_or(false)
    }

    /// Drop the rebuild flag once a rebuilt cache has been saved.
    pub async fn clear_rebuild(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.rebuild_flag).await {
            Ok(()) => {
                tracing::info!("rebuild flag cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::io(&self.rebuild_flag, e)),
        }
    }
}
