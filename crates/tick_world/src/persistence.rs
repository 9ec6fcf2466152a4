//! Room blob storage keyed `ticks/<time>/<room>`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

const TICKS_DIR: &str = "ticks";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage key {key:?}")]
    InvalidKey { key: String },
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

pub trait BlobStorage: Send + Sync {
    /// `None` when nothing is stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

pub fn room_key(time: u64, room: &str) -> String {
    format!("{TICKS_DIR}/{time}/{room}")
}

pub fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Loads the named rooms stored for `time`. Missing rooms are skipped.
pub fn load_rooms<'a>(
    storage: &dyn BlobStorage,
    time: u64,
    rooms: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
    let mut loaded = BTreeMap::new();
    for room in rooms {
        if let Some(bytes) = storage.load(&room_key(time, room))? {
            loaded.insert(room.to_string(), bytes);
        }
    }
    Ok(loaded)
}

pub fn save_rooms(
    storage: &dyn BlobStorage,
    time: u64,
    rooms: &BTreeMap<String, Vec<u8>>,
) -> Result<(), StorageError> {
    for (room, bytes) in rooms {
        let key = room_key(time, room);
        storage.save(&key, bytes)?;
        tracing::debug!(key = %key, hash = %blake3_hex(bytes), len = bytes.len(), "room saved");
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStorage {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

impl BlobStorage for InMemoryBlobStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Stores each key as a file below `root`.
#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    root: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStorage for LocalBlobStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        write_bytes_atomic(&path, bytes)
    }
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|source| StorageError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
