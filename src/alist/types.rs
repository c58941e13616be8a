use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SyncError, SyncResult};

/// Status code Alist embeds in every successful response body.
pub const CODE_OK: i64 = 200;

/// Request body for POST /api/fs/list.
#[derive(Debug, Serialize)]
pub struct ListRequest<'a> {
    pub path: &'a str,
    pub page: u32,
    /// 0 asks the server for every entry in one page.
    pub per_page: u32,
}

impl<'a> ListRequest<'a> {
    pub fn all(path: &'a str) -> Self {
        Self {
            path,
            page: 1,
            per_page: 0,
        }
    }
}

/// Envelope returned by every Alist API call.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<ListData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListData {
    /// `null` for an existing but empty directory.
    #[serde(default)]
    pub content: Option<Vec<RemoteNode>>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteNode {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_dir: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u64,
    /// Opaque server timestamp, compared for equality only.
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ListResponse {
    /// Unwrap the envelope into the listed children of `path`.
    pub fn into_nodes(self, path: &str) -> SyncResult<Vec<RemoteNode>> {
        if self.code != CODE_OK {
            return Err(SyncError::Protocol {
                path: path.to_string(),
                message: format!(
                    "code {}: {}",
                    self.code,
                    self.message.as_deref().unwrap_or("no message")
                ),
                retryable: false,
            });
        }

        match self.data.and_then(|d| d.content) {
            Some(nodes) => Ok(nodes),
            None => {
                tracing::debug!(path, "directory listing is empty");
                Ok(Vec::new())
            }
        }
    }
}
