//! Filesystem blob store and blob key generation.
//!
//! Blobs live under `{base}/blobs/{xx}/{yy}/{uuid}.{ext}` where `xx`/`yy` are
//! the first two byte pairs of a UUIDv7. Keys are never reused.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use notekeep_core::{defaults::BLOB_PREFIX, Error, Result, StorageBackend};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Filesystem storage backend.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(Error::InvalidInput(format!("invalid blob key: {}", key)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Write, read back and remove a probe file under the base path.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(BLOB_PREFIX).join(".health-check");
        let test_file = test_dir.join("probe.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"notekeep-storage-probe";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_back = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!(subsystem = "storage", component = "blob_store", op = "write", blob_key = %key, size_bytes = data.len(), "Writing blob");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "blob_store: create_dir_all failed");
                e
            })?;
        }

        // Temp file + rename: a live key never points at a partial blob.
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "blob_store: create failed");
            e
        })?;
        if let Err(e) = file.write_all(data).await {
            warn!(error = %e, "blob_store: write_all failed");
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "blob_store: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        Ok(fs::read(full_path).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

/// Compute the BLAKE3 hash of data with a `blake3:` prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// Generate a blob key from a UUID and the file's extension.
///
/// Example: `blobs/01/94/01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f.png`
pub fn generate_blob_key(id: &Uuid, extension: Option<&str>) -> String {
    let hex = id.simple().to_string();
    let ext = extension
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");
    format!(
        "{}/{}/{}/{}.{}",
        BLOB_PREFIX,
        &hex[0..2],
        &hex[2..4],
        id.as_hyphenated(),
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_blob_key_layout() {
        let id = Uuid::parse_str("01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f").unwrap();
        assert_eq!(
            generate_blob_key(&id, Some("png")),
            "blobs/01/94/01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f.png"
        );
    }

    #[test]
    fn test_generate_blob_key_rejects_odd_extensions() {
        let id = Uuid::now_v7();
        assert!(generate_blob_key(&id, None).ends_with(".bin"));
        assert!(generate_blob_key(&id, Some("../x")).ends_with(".bin"));
    }

    #[test]
    fn test_generate_blob_key_unique() {
        let a = generate_blob_key(&Uuid::now_v7(), Some("pdf"));
        let b = generate_blob_key(&Uuid::now_v7(), Some("pdf"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_format() {
        let hash = compute_content_hash(b"hello");
        assert!(hash.starts_with("blake3:"));
        assert_eq!(hash.len(), "blake3:".len() + 64);
        assert_eq!(hash, compute_content_hash(b"hello"));
    }

    #[tokio::test]
    async fn test_write_read_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        let key = generate_blob_key(&Uuid::now_v7(), Some("pdf"));

        backend.write(&key, b"%PDF-1.4").await.unwrap();
        assert!(backend.exists(&key).await.unwrap());
        assert_eq!(backend.read(&key).await.unwrap(), b"%PDF-1.4");

        assert!(backend.delete(&key).await.unwrap());
        assert!(!backend.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_absent_blob_reports_false() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        let key = generate_blob_key(&Uuid::now_v7(), None);
        assert!(!backend.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        let key = generate_blob_key(&Uuid::now_v7(), Some("png"));
        backend.write(&key, b"data").await.unwrap();
        let temp = dir.path().join(&key).with_extension("tmp");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_base_path() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        for key in ["../outside.bin", "/etc/passwd", "", "blobs/../../x"] {
            let err = backend.write(key, b"x").await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "key {:?}", key);
        }
    }

    #[tokio::test]
    async fn test_validate_succeeds_on_writable_dir() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.validate().await.unwrap();
    }
}
