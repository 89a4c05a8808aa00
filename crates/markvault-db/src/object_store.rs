//! Object-store backend and content addressing for snapshot payloads.
//!
//! This module provides:
//! - BLAKE3 content hashing shared by writer, reader, and cleanup
//! - A pluggable async `StorageBackend` trait (filesystem, S3, ...)
//! - A filesystem backend with atomic write operations
//! - Storage-key derivation for HTML bodies and deduplicated images,
//!   including the explicit legacy key-variant list the image proxy
//!   tolerates for data written by earlier layouts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use markvault_core::Result;

/// Storage backend trait for different storage implementations.
///
/// Allows abstracting over filesystem, S3, or other storage providers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to the specified key.
    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Read data from the specified key.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete data at the specified key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if data exists at the specified key.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Filesystem storage backend.
///
/// Stores blobs under a base directory, with storage keys used directly as
/// relative paths.
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

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Validate that the storage backend can write, read, and delete files.
    ///
    /// Performs a full round-trip test at startup to catch filesystem issues
    /// (overlayfs quirks, permission errors, missing directories) early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await; // Best-effort cleanup

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key);
        debug!(storage_key = %key, full_path = %full_path.display(), size = data.len(), "object_store: write");

        // Create parent directories
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "object_store: create_dir_all failed");
                e
            })?;
        }

        // Atomic write: temp file + rename
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "object_store: File::create failed");
            e
        })?;
        file.write_all(data).await.map_err(|e| {
            warn!(error = %e, "object_store: write_all failed");
            e
        })?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "object_store: rename failed");
            e
        })?;

        // Set permissions to 0644 (rw-r--r--, no execute)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key);
        Ok(fs::read(full_path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key);
        if tokio::fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key);
        Ok(tokio::fs::try_exists(full_path).await?)
    }
}

/// Compute BLAKE3 hash of data with "blake3:" prefix.
///
/// Returns a string in the format: `blake3:{64-char-hex}`. This is the one
/// digest used for page-level change detection and image deduplication
/// across the whole subsystem.
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

/// Strip the algorithm prefix from a content hash, leaving the raw hex.
pub fn digest_hex(content_hash: &str) -> &str {
    content_hash
        .strip_prefix("blake3:")
        .unwrap_or(content_hash)
}

/// Storage key for a snapshot HTML body.
///
/// Key format: `snapshots/{owner}/{bookmark}/{unix-ts}-v{version}.html`
///
/// Owner and bookmark segments make operator-side inspection and
/// per-bookmark deletion tractable; the timestamp-version leaf keeps keys
/// unique across force-rewrites within one second boundary.
pub fn snapshot_storage_key(
    owner_id: &Uuid,
    bookmark_id: &Uuid,
    created_at: DateTime<Utc>,
    version: i32,
) -> String {
    format!(
        "snapshots/{}/{}/{}-v{}.html",
        owner_id,
        bookmark_id,
        created_at.timestamp(),
        version
    )
}

/// Current storage key for a deduplicated image blob.
///
/// Key format: `images/{first-2-hex}/{64-hex}` — fanned out on the first
/// hash byte so directories stay small.
pub fn image_storage_key(content_hash: &str) -> String {
    let hex = digest_hex(content_hash);
    format!("images/{}/{}", &hex[..2.min(hex.len())], hex)
}

/// Ordered candidate keys for resolving an image blob.
///
/// The current layout comes first; the remainder covers layouts written by
/// earlier releases (flat directory, `.bin` suffix, MIME-derived
/// extension). Resolution walks the list in order rather than probing
/// ad hoc.
pub fn image_key_variants(content_hash: &str, mime_type: &str) -> Vec<String> {
    let hex = digest_hex(content_hash);
    let mut variants = vec![image_storage_key(content_hash)];
    variants.push(format!("images/{}", hex));
    variants.push(format!("images/{}.bin", hex));
    if let Some(ext) = extension_for_mime(mime_type) {
        variants.push(format!("images/{}.{}", hex, ext));
    }
    variants
}

/// File extension for the image MIME types the capture script produces.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/avif" => Some("avif"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        _ => None,
    }
}
