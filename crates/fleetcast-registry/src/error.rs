//! Error types for the persistence layer.

use std::path::PathBuf;

/// Errors from a [`KeyValueStore`](crate::KeyValueStore).
///
/// The registry never propagates these: it logs them and keeps the
/// in-memory state. They surface to callers only through `load` and
/// direct store use.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading, writing or renaming the backing file failed.
    #[error("store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value couldn't be converted to JSON.
    #[error("failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value doesn't have the shape the caller asked for.
    #[error("malformed entry {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Injected failure from a test store.
    #[error("store unavailable")]
    Unavailable,
}
