//! Key-value persistence.
//!
//! Stores hold one JSON value per string key. Callers pick the value type
//! per call (`put::<DeviceRecord>`, `entries::<FeedRecord>`), so the same
//! store type backs both the device registry and the coordinator's feed
//! cache.
//!
//! Writes are two steps: [`KeyValueStore::stage`] updates memory and
//! [`KeyValueStore::flush`] makes it durable. Staging is cheap enough to do
//! under a caller's lock; flushing may block on disk and belongs on a
//! blocking thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::StoreError;

/// A string-keyed store of JSON values.
pub trait KeyValueStore: Send + Sync + 'static {
    /// Every entry that deserializes as `V`, in key order.
    ///
    /// Entries of the wrong shape are skipped with a warning rather than
    /// failing the whole read.
    fn entries<V: DeserializeOwned>(&self) -> Result<Vec<(String, V)>, StoreError>;

    /// The entry for `key`, if present.
    ///
    /// # Errors
    /// [`StoreError::Malformed`] if the stored value isn't a `V`.
    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Inserts or replaces the entry for `key` in memory. Reads see it
    /// at once; it reaches disk on the next [`flush`](Self::flush).
    fn stage<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError>;

    /// Writes everything staged so far. May block on file IO.
    fn flush(&self) -> Result<(), StoreError>;

    /// Stages and flushes in one call.
    fn put<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError> {
        self.stage(key, value)?;
        self.flush()
    }
}

/// A shared store, so a caller can keep a handle to a store it hands to
/// the registry.
impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    fn entries<V: DeserializeOwned>(&self) -> Result<Vec<(String, V)>, StoreError> {
        (**self).entries()
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StoreError> {
        (**self).get(key)
    }

    fn stage<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError> {
        (**self).stage(key, value)
    }

    fn flush(&self) -> Result<(), StoreError> {
        (**self).flush()
    }
}

fn lock(map: &Mutex<Map<String, Value>>) -> MutexGuard<'_, Map<String, Value>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn typed_entries<V: DeserializeOwned>(map: &Map<String, Value>) -> Vec<(String, V)> {
    map.iter()
        .filter_map(|(key, value)| match serde_json::from_value(value.clone()) {
            Ok(v) => Some((key.clone(), v)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping malformed store entry");
                None
            }
        })
        .collect()
}

fn typed_get<V: DeserializeOwned>(
    map: &Map<String, Value>,
    key: &str,
) -> Result<Option<V>, StoreError> {
    map.get(key)
        .map(|value| {
            serde_json::from_value(value.clone()).map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn to_json<V: Serialize>(key: &str, value: &V) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// A store backed by a single JSON object on disk.
///
/// The whole object is cached in memory and rewritten on every flush
/// that has something new: serialized to a sibling temp file, then renamed
/// over the original, so the file on disk is always the last complete
/// write. Anything still staged is flushed on drop.
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
    dirty: AtomicBool,
    /// Held for the whole file write so flushes never interleave.
    writing: Mutex<()>,
}

impl JsonFileStore {
    /// Opens (or prepares to create) the store at `path`.
    ///
    /// Parent directories are created. A missing file starts empty. An
    /// unreadable or unparseable file also starts empty, with a warning;
    /// it is replaced on the first `put`.
    ///
    /// # Errors
    /// [`StoreError::Io`] if the parent directory can't be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let data = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "store file unparseable, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "creating new store file");
                Map::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "store file unreadable, starting empty");
                Map::new()
            }
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
            writing: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, bytes).map_err(io_err)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn entries<V: DeserializeOwned>(&self) -> Result<Vec<(String, V)>, StoreError> {
        Ok(typed_entries(&lock(&self.data)))
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StoreError> {
        typed_get(&lock(&self.data), key)
    }

    fn stage<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError> {
        let value = to_json(key, value)?;
        lock(&self.data).insert(key.to_string(), value);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);

        // Snapshot under the data lock only; stages carry on during the
        // write and mark the store dirty again.
        let bytes = {
            let data = lock(&self.data);
            if !self.dirty.swap(false, Ordering::SeqCst) {
                return Ok(());
            }
            serde_json::to_vec_pretty(&*data)
        };
        let result = bytes
            .map_err(|source| StoreError::Serialize {
                key: String::new(),
                source,
            })
            .and_then(|bytes| self.write_file(&bytes));
        if result.is_err() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        result
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to flush store on drop");
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A store that lives only in memory.
///
/// `set_fail_writes(true)` makes every write fail without storing, for
/// exercising the "persistence failed" paths.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Map<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn entries<V: DeserializeOwned>(&self) -> Result<Vec<(String, V)>, StoreError> {
        Ok(typed_entries(&lock(&self.data)))
    }

    fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, StoreError> {
        typed_get(&lock(&self.data), key)
    }

    fn stage<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let value = to_json(key, value)?;
        lock(&self.data).insert(key.to_string(), value);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}
