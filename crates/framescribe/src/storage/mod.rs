pub mod filesystem;
pub mod keys;

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::StorageError;

pub use filesystem::FileStore;

/// Key/value object storage the pipeline reads archives from and writes
/// derived assets to.
///
/// Keys are `/`-separated relative paths. Implementations must be safe to
/// share between worker threads.
pub trait ObjectStore: Send + Sync {
    /// Opens a streaming reader over an object.
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Reads a whole object into memory.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open(key)?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| StorageError::ReadObject {
                path: key.into(),
                source: e,
            })?;
        Ok(buf)
    }

    /// Writes an object, replacing any previous content. Returns the size.
    fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Uploads a local file as an object. Returns the size.
    fn put_file(&self, key: &str, path: &Path) -> Result<u64, StorageError> {
        let data = std::fs::read(path).map_err(|e| StorageError::ReadObject {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.put(key, &data)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Size in bytes, or `None` if the object does not exist.
    fn size(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// Lists keys under a prefix, in lexical order.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Deletes an object. Deleting a missing object is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Deletes every object under a prefix and returns how many were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// A URL that grants read access to the object until `ttl` elapses.
    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
