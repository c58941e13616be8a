mod client;
mod retry;
mod types;

pub use client::{AlistClient, RemoteLister};
pub use retry::RetryPolicy;
pub use types::RemoteNode;
