use std::fmt;
use std::path::PathBuf;

use crate::error::{SyncError, SyncResult};
use crate::util::path as sync_path;

/// The only adapter tag this version understands.
pub const ADAPTER_ALIST: &str = "alist";

const FIELD_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One local root mirroring one remote root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub local_root: PathBuf,
    pub remote_root: String,
    /// `host[:port]`, no scheme.
    pub endpoint: String,
    pub token: String,
    pub scheme: Scheme,
}

impl MountConfig {
    /// `{scheme}://{endpoint}`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.endpoint)
    }
}

/// Result of parsing the multi-line mount list.
#[derive(Debug, Default)]
pub struct ParsedMounts {
    pub mounts: Vec<MountConfig>,
    /// 1-based line number and the reason the line was skipped.
    pub rejected: Vec<(usize, SyncError)>,
}

/// Parse one `<localRoot>#<adapter>#<remoteRoot>#<endpoint>#<token>` line.
pub fn parse_mount_line(line: &str, scheme: Scheme) -> SyncResult<MountConfig> {
    let parts: Vec<&str> = line.trim().split('#').map(str::trim).collect();
    if parts.len() != FIELD_COUNT {
        return Err(SyncError::Config(format!(
            "expected {FIELD_COUNT} '#'-separated fields, found {}",
            parts.len()
        )));
    }

    let [local_root, adapter, remote_root, endpoint, token] = [
        parts[0], parts[1], parts[2], parts[3], parts[4],
    ];

    if adapter != ADAPTER_ALIST {
        return Err(SyncError::Config(format!(
            "unsupported adapter '{adapter}' (only '{ADAPTER_ALIST}' is recognized)"
        )));
    }
    if local_root.is_empty() {
        return Err(SyncError::Config("local root is empty".into()));
    }
    if remote_root.is_empty() {
        return Err(SyncError::Config("remote root is empty".into()));
    }
    if endpoint.is_empty() {
        return Err(SyncError::Config("endpoint is empty".into()));
    }

    Ok(MountConfig {
        local_root: PathBuf::from(local_root),
        remote_root: sync_path::normalize_remote_root(remote_root),
        endpoint: endpoint.trim_end_matches('/').to_string(),
        token: token.to_string(),
        scheme,
    })
}

/// Parse the whole mount list. Blank lines and `#` comments are ignored;
/// malformed lines are collected in `rejected` instead of failing the list.
pub fn parse_mounts(text: &str, scheme: Scheme) -> ParsedMounts {
    let mut parsed = ParsedMounts::default();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_mount_line(line, scheme) {
            Ok(mount) => parsed.mounts.push(mount),
            Err(e) => parsed.rejected.push((index + 1, e)),
        }
    }

    parsed
}
