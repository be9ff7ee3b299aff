use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::StorageError;
use crate::secrets::UrlSigner;
use crate::storage::ObjectStore;

/// Object store backed by a local directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// reader never observes a half-written object.
pub struct FileStore {
    root: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P, public_base_url: &str, signer: UrlSigner) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Checks a signed URL's query parameters, for whatever serves the
    /// store's files over HTTP.
    pub fn verify_signature(&self, key: &str, expires_at: i64, signature: &str) -> bool {
        self.signer
            .verify(key, expires_at, signature, chrono::Utc::now().timestamp())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        let relative = Path::new(key);
        if relative.is_absolute() {
            return Err(invalid("key is an absolute path"));
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(invalid("key contains path traversal"));
        }

        Ok(self.root.join(relative))
    }

    fn ensure_parent(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        path.with_file_name(name)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl ObjectStore for FileStore {
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.resolve(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadObject { path, source: e }),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        self.ensure_parent(&path)?;

        let tmp = Self::temp_path(&path);
        let write = |tmp: &Path| -> std::io::Result<()> {
            let mut file = File::create(tmp)?;
            file.write_all(data)?;
            file.sync_all()
        };
        if let Err(e) = write(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StorageError::WriteObject { path, source: e });
        }
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::WriteObject {
            path: path.clone(),
            source: e,
        })?;

        debug!("Stored object {} ({} bytes)", key, data.len());
        Ok(data.len() as u64)
    }

    fn put_file(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        self.ensure_parent(&path)?;

        let tmp = Self::temp_path(&path);
        let size = std::fs::copy(source, &tmp).map_err(|e| StorageError::WriteObject {
            path: path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::WriteObject {
            path: path.clone(),
            source: e,
        })?;

        debug!("Stored object {} from file ({} bytes)", key, size);
        Ok(size)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(key)?.is_file())
    }

    fn size(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.resolve(key)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadObject { path, source: e }),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Walk from the deepest directory the prefix names, then filter.
        let dir_part = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_part)?
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry.map_err(|e| StorageError::List {
                prefix: prefix.to_string(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = self.key_for(entry.path()) {
                if key.starts_with(prefix) && !key.ends_with(".tmp") {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteObject { path, source: e }),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list(prefix)?;
        for key in &keys {
            self.delete(key)?;
        }

        // Drop the directory itself when the prefix names one.
        if let Some(dir) = prefix.strip_suffix('/') {
            if !dir.is_empty() {
                let path = self.resolve(dir)?;
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                        .map_err(|e| StorageError::DeleteObject { path, source: e })?;
                }
            }
        }

        Ok(keys.len())
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve(key)?;
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires_at = chrono::Utc::now().timestamp().saturating_add(ttl_secs);
        let signature = self
            .signer
            .sign(key, expires_at)
            .map_err(|e| StorageError::Signing(e.to_string()))?;

        let mut url = Url::parse(&self.public_base_url)
            .map_err(|e| StorageError::Signing(format!("invalid public base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Signing("public base URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires_at.to_string())
            .append_pair("signature", &signature);

        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let signer = UrlSigner::from_hex_key(TEST_KEY).unwrap();
        let store = FileStore::new(dir.path(), "https://files.example.com/", signer);
        (dir, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let size = store.put("jobs/a/x.bin", b"hello").unwrap();
        assert_eq!(size, 5);
        assert_eq!(store.get("jobs/a/x.bin").unwrap(), b"hello");
        assert_eq!(store.size("jobs/a/x.bin").unwrap(), Some(5));
        assert!(store.exists("jobs/a/x.bin").unwrap());
    }

    #[test]
    fn test_missing_object() {
        let (_dir, store) = store();
        assert!(matches!(store.open("nope.zip"), Err(StorageError::NotFound(_))));
        assert_eq!(store.size("nope.zip").unwrap(), None);
        assert!(!store.exists("nope.zip").unwrap());
        store.delete("nope.zip").unwrap();
    }

    #[test]
    fn test_rejects_traversal_and_absolute_keys() {
        let (_dir, store) = store();
        assert!(matches!(
            store.put("../escape.txt", b"x"),
            Err(StorageError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.put("/etc/passwd", b"x"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_list_and_delete_prefix() {
        let (_dir, store) = store();
        store.put("jobs/a/crops/000002-2.png.png", b"2").unwrap();
        store.put("jobs/a/crops/000001-1.png.png", b"1").unwrap();
        store.put("jobs/a/thumbnail.jpg", b"t").unwrap();
        store.put("jobs/ab/crops/000001-1.png.png", b"other").unwrap();

        let keys = store.list("jobs/a/crops/").unwrap();
        assert_eq!(
            keys,
            vec![
                "jobs/a/crops/000001-1.png.png".to_string(),
                "jobs/a/crops/000002-2.png.png".to_string(),
            ]
        );

        assert_eq!(store.list("jobs/a/").unwrap().len(), 3);
        assert_eq!(store.delete_prefix("jobs/a/crops/").unwrap(), 2);
        assert!(store.list("jobs/a/crops/").unwrap().is_empty());
        assert!(store.exists("jobs/a/thumbnail.jpg").unwrap());
        assert!(store.exists("jobs/ab/crops/000001-1.png.png").unwrap());
    }

    #[test]
    fn test_put_file() {
        let (dir, store) = store();
        let local = dir.path().join("local.bin");
        std::fs::write(&local, b"abc").unwrap();
        assert_eq!(store.put_file("jobs/a/out.bin", &local).unwrap(), 3);
        assert_eq!(store.get("jobs/a/out.bin").unwrap(), b"abc");
    }

    #[test]
    fn test_signed_url_verifies() {
        let (_dir, store) = store();
        store.put("jobs/a/crop.png", b"png").unwrap();
        let url = store
            .signed_url("jobs/a/crop.png", Duration::from_secs(600))
            .unwrap();
        assert!(url.starts_with("https://files.example.com/jobs/a/crop.png?expires="));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v,
                _ => {}
            }
        }
        assert!(store.verify_signature("jobs/a/crop.png", expires, signature));
        assert!(!store.verify_signature("jobs/a/other.png", expires, signature));
    }

    #[test]
    fn test_signed_url_escapes_key_segments() {
        let (_dir, store) = store();
        let key = "jobs/j/crops/000000-12 #2.png.png";
        store.put(key, b"png").unwrap();

        let signed = store.signed_url(key, Duration::from_secs(600)).unwrap();
        let url = Url::parse(&signed).unwrap();

        assert_eq!(url.path(), "/jobs/j/crops/000000-12%20%232.png.png");
        assert_eq!(url.fragment(), None);

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = query["expires"].parse().unwrap();
        assert!(store.verify_signature(key, expires, &query["signature"]));
    }

    #[test]
    fn test_signed_url_keeps_base_path() {
        let dir = TempDir::new().unwrap();
        let signer = UrlSigner::from_hex_key(TEST_KEY).unwrap();
        let store = FileStore::new(dir.path(), "https://cdn.example.com/files/", signer);

        let url = store
            .signed_url("jobs/a/crop.png", Duration::from_secs(60))
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/files/jobs/a/crop.png?expires="));
    }
}
