//! Error types for the tenant index cache.

use std::sync::Arc;
use std::time::Duration;

use folder_index::StorageError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The index is switched off for this process.
    #[error("permission index is disabled")]
    Disabled,

    /// The bulk read for the tenant failed. Shared by every caller that
    /// waited on the same load.
    #[error("failed to load permission index for tenant {tenant_id}: {source}")]
    Load {
        tenant_id: i32,
        source: Arc<StorageError>,
    },

    /// The caller stopped waiting; the load itself keeps running.
    #[error("gave up waiting for permission index of tenant {tenant_id} after {waited:?}")]
    Timeout { tenant_id: i32, waited: Duration },

    /// The worker running the load panicked or was cancelled.
    #[error("index worker failed: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl From<tokio::task::JoinError> for IndexError {
    fn from(e: tokio::task::JoinError) -> Self {
        IndexError::Runtime(e.to_string())
    }
}
