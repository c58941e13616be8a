//! In-memory remote tree for exercising the reconciler without HTTP.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use crate::alist::{RemoteLister, RemoteNode};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Default)]
pub struct FakeTree {
    dirs: HashMap<String, Vec<RemoteNode>>,
    failing: HashSet<String>,
}

impl FakeTree {
    pub fn with_dir(mut self, path: &str, children: Vec<RemoteNode>) -> Self {
        self.dirs.insert(path.to_string(), children);
        self
    }

    /// Make listings of `path` fail with a transport error.
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }
}

impl RemoteLister for FakeTree {
    fn list(&self, path: &str) -> impl Future<Output = SyncResult<Vec<RemoteNode>>> + Send {
        let result = if self.failing.contains(path) {
            Err(SyncError::Transport {
                path: path.to_string(),
                message: "connection refused".into(),
            })
        } else {
            match self.dirs.get(path) {
                Some(children) => Ok(children.clone()),
                None => Err(SyncError::protocol(path, "code 500: object not found")),
            }
        };
        async move { result }
    }
}

pub fn dir(name: &str, updated_at: &str) -> RemoteNode {
    RemoteNode {
        name: name.into(),
        is_dir: true,
        size: 0,
        updated_at: updated_at.into(),
    }
}

pub fn file(name: &str, size: u64, updated_at: &str) -> RemoteNode {
    RemoteNode {
        name: name.into(),
        is_dir: false,
        size,
        updated_at: updated_at.into(),
    }
}
