//! # markvault-db
//!
//! PostgreSQL metadata layer and snapshot storage pipeline for markvault.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for snapshots, the image dedup ledger,
//!   bookmark-side lookups, and the maintenance job queue
//! - The snapshot ingest/read pipeline over a pluggable object store
//! - Quota admission control and retention/orphan-repair passes
//!
//! ## Example
//!
//! ```rust,ignore
//! use markvault_core::{CapturePayload, SnapshotConfig};
//! use markvault_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/markvault")
//!         .await?
//!         .with_snapshot_storage("/var/markvault/blobs", SnapshotConfig::default());
//!
//!     let store = db.snapshot_store.as_ref().unwrap();
//!     let outcome = store
//!         .create_snapshot(owner_id, bookmark_id, &CapturePayload {
//!             html: "<html>…</html>".into(),
//!             title: Some("Example".into()),
//!             source_url: Some("https://example.com".into()),
//!             images: None,
//!             force: false,
//!         })
//!         .await?;
//!
//!     println!("stored: {:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod bookmarks;
pub mod image_blobs;
pub mod jobs;
pub mod object_store;
pub mod pool;
pub mod quota;
pub mod retention;
pub mod snapshot_store;
pub mod snapshots;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use markvault_core::*;

// Re-export repository implementations
pub use bookmarks::PgBookmarkRepository;
pub use image_blobs::PgImageBlobRepository;
pub use jobs::PgSnapshotJobRepository;
pub use object_store::{
    compute_content_hash, digest_hex, extension_for_mime, image_key_variants, image_storage_key,
    snapshot_storage_key, FilesystemBackend, StorageBackend,
};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use quota::QuotaEnforcer;
pub use retention::RetentionManager;
pub use snapshot_store::{
    detect_encoding, image_refs, proxy_image_path, rewrite_capture_placeholders,
    rewrite_image_refs, ImageRef, SnapshotEncoding, SnapshotStore, CAPTURE_PLACEHOLDER_SCHEME,
    IMAGE_PROXY_PREFIX,
};
pub use snapshots::PgSnapshotRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Bookmark-side lookups (ownership, counters, retention config).
    pub bookmarks: PgBookmarkRepository,
    /// Snapshot metadata repository.
    pub snapshots: PgSnapshotRepository,
    /// Image dedup ledger.
    pub images: PgImageBlobRepository,
    /// Maintenance job queue.
    pub jobs: PgSnapshotJobRepository,
    /// Snapshot ingest/read pipeline; configure with
    /// [`with_snapshot_storage`](Self::with_snapshot_storage).
    pub snapshot_store: Option<Arc<SnapshotStore>>,
    /// Retention and repair passes; configured alongside the store.
    pub retention: Option<Arc<RetentionManager>>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            bookmarks: PgBookmarkRepository::new(pool.clone()),
            snapshots: PgSnapshotRepository::new(pool.clone()),
            images: PgImageBlobRepository::new(pool.clone()),
            jobs: PgSnapshotJobRepository::new(pool.clone()),
            snapshot_store: None,
            retention: None,
            pool,
        }
    }

    /// Configure snapshot storage with a filesystem backend path.
    pub fn with_snapshot_storage(self, path: &str, config: SnapshotConfig) -> Self {
        self.with_snapshot_backend(Arc::new(FilesystemBackend::new(path)), config)
    }

    /// Configure snapshot storage with an arbitrary backend.
    pub fn with_snapshot_backend(
        mut self,
        backend: Arc<dyn StorageBackend>,
        config: SnapshotConfig,
    ) -> Self {
        self.snapshot_store = Some(Arc::new(SnapshotStore::new(
            self.pool.clone(),
            backend.clone(),
            config.clone(),
        )));
        self.retention = Some(Arc::new(RetentionManager::new(
            self.pool.clone(),
            backend,
            config,
        )));
        self
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            bookmarks: PgBookmarkRepository::new(self.pool.clone()),
            snapshots: PgSnapshotRepository::new(self.pool.clone()),
            images: PgImageBlobRepository::new(self.pool.clone()),
            jobs: PgSnapshotJobRepository::new(self.pool.clone()),
            snapshot_store: self.snapshot_store.clone(),
            retention: self.retention.clone(),
        }
    }
}
