//! Retention pruning and orphan repair.
//!
//! Two independent policies govern automatic pruning: keep the N newest
//! versions per bookmark, or delete versions older than a day count.
//! Neither ever deletes a latest row, which makes both safe to run
//! concurrently with new writes. Orphan repair is the self-healing pass
//! for partial writer failures: metadata rows whose blob is gone are
//! removed (re-promoting a latest row where needed), and image blobs no
//! snapshot references anymore are collected.
//!
//! Every snapshot delete recomputes image reference counts from
//! `snapshot_image` inside the deleting transaction — a blob is removed
//! iff no surviving snapshot shares its hash.

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use markvault_core::{defaults, CleanupReport, Result, Snapshot, SnapshotConfig};

use crate::bookmarks::PgBookmarkRepository;
use crate::image_blobs::PgImageBlobRepository;
use crate::object_store::{image_key_variants, StorageBackend};
use crate::snapshots::PgSnapshotRepository;

/// Prunes old snapshot versions and repairs storage/metadata drift.
pub struct RetentionManager {
    pool: PgPool,
    backend: Arc<dyn StorageBackend>,
    config: SnapshotConfig,
    snapshots: PgSnapshotRepository,
    images: PgImageBlobRepository,
    bookmarks: PgBookmarkRepository,
}

impl RetentionManager {
    /// Create a retention manager over a pool and storage backend.
    pub fn new(pool: PgPool, backend: Arc<dyn StorageBackend>, config: SnapshotConfig) -> Self {
        Self {
            snapshots: PgSnapshotRepository::new(pool.clone()),
            images: PgImageBlobRepository::new(pool.clone()),
            bookmarks: PgBookmarkRepository::new(pool.clone()),
            backend,
            config,
            pool,
        }
    }

    /// Apply the keep-count policy to one bookmark.
    ///
    /// The effective count resolves per-bookmark override → per-owner
    /// default → system default unless `keep_override` pins it. A negative
    /// count means unlimited retention and the pass is a no-op.
    #[instrument(skip(self), fields(bookmark_id = %bookmark_id))]
    pub async fn prune_bookmark(
        &self,
        bookmark_id: Uuid,
        keep_override: Option<i32>,
    ) -> Result<CleanupReport> {
        let keep = match keep_override {
            Some(n) => n,
            None => {
                self.bookmarks
                    .keep_count_for(bookmark_id, self.config.keep_count_default)
                    .await?
            }
        };

        let mut report = CleanupReport::default();
        if keep < 0 {
            return Ok(report); // unlimited retention
        }

        let prunable = self
            .snapshots
            .versions_beyond_keep(bookmark_id, keep as i64)
            .await?;

        for snapshot in prunable {
            report.absorb(self.delete_snapshot_row(&snapshot).await?);
        }

        if report.snapshots_deleted > 0 {
            info!(
                subsystem = "db",
                component = "retention",
                op = "prune_bookmark",
                bookmark_id = %bookmark_id,
                result_count = report.snapshots_deleted,
                bytes = report.bytes_reclaimed,
                "Pruned snapshot versions beyond keep-count"
            );
        }
        Ok(report)
    }

    /// Apply the keep-count policy to every bookmark with snapshots,
    /// one bookmark at a time.
    pub async fn prune_all(&self, keep_override: Option<i32>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for bookmark_id in self.bookmarks.ids_with_snapshots().await? {
            report.absorb(self.prune_bookmark(bookmark_id, keep_override).await?);
        }
        Ok(report)
    }

    /// Apply the age policy: delete non-latest versions older than `days`.
    #[instrument(skip(self))]
    pub async fn prune_older_than(&self, days: i32) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for snapshot in self.snapshots.versions_older_than(days).await? {
            report.absorb(self.delete_snapshot_row(&snapshot).await?);
        }

        if report.snapshots_deleted > 0 {
            info!(
                subsystem = "db",
                component = "retention",
                op = "prune_older_than",
                result_count = report.snapshots_deleted,
                bytes = report.bytes_reclaimed,
                "Pruned snapshot versions by age"
            );
        }
        Ok(report)
    }

    /// Owner-initiated delete of a single snapshot.
    ///
    /// Unlike the policies above this may remove a latest row, so the
    /// next-newest survivor is promoted in the same transaction.
    pub async fn delete_snapshot(&self, id: Uuid, owner_id: Uuid) -> Result<CleanupReport> {
        let snapshot = self.snapshots.get_owned(id, owner_id).await?;
        self.delete_snapshot_row(&snapshot).await
    }

    /// Scan for drift between metadata and storage and repair it.
    ///
    /// Pass 1 removes snapshot rows whose blob no longer exists (the
    /// orphans produced by partial writer failures), fixing counters and
    /// latest pointers. Pass 2 collects image blobs with zero derived
    /// references, guarded by a minimum age so in-flight writers keep
    /// their uploads.
    #[instrument(skip(self))]
    pub async fn verify_and_fix(&self) -> Result<CleanupReport> {
        let start = Instant::now();
        let mut report = CleanupReport::default();

        // Snapshot of the table up front: rows are deleted below, which
        // would shift offset-based pages underneath the scan.
        let mut rows: Vec<Snapshot> = Vec::new();
        let mut offset = 0i64;
        loop {
            let page = self
                .snapshots
                .scan_page(defaults::SCAN_BATCH_SIZE, offset)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as i64;
            rows.extend(page);
        }

        for snapshot in &rows {
            if self.backend.exists(&snapshot.storage_key).await? {
                continue;
            }
            warn!(
                subsystem = "db",
                component = "retention",
                op = "verify_and_fix",
                snapshot_id = %snapshot.id,
                storage_key = %snapshot.storage_key,
                "Snapshot blob missing, removing metadata row"
            );
            // The blob is already gone, so only metadata is touched and
            // nothing is reclaimed for the row itself.
            let mut row_report = self.delete_metadata_only(snapshot).await?;
            row_report.orphans_repaired += 1;
            report.absorb(row_report);
        }

        // Unreferenced image blobs past the age guard.
        for blob in self
            .images
            .unreferenced_older_than(self.config.orphan_min_age_hours)
            .await?
        {
            let mut tx = self.pool.begin().await?;
            self.images.delete_tx(&mut tx, &blob.hash).await?;
            tx.commit().await?;
            self.delete_image_blob_from_storage(&blob.hash, &blob.mime_type)
                .await;
            report.images_deleted += 1;
            report.bytes_reclaimed += blob.size_bytes;
        }

        info!(
            subsystem = "db",
            component = "retention",
            op = "verify_and_fix",
            result_count = rows.len(),
            orphans = report.orphans_repaired,
            images = report.images_deleted,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orphan repair pass complete"
        );
        Ok(report)
    }

    /// Delete one snapshot: metadata transactionally, then blobs
    /// best-effort.
    ///
    /// Metadata commits first; a blob delete that fails afterwards leaves
    /// an unreferenced blob for the next repair pass rather than a row
    /// pointing at nothing.
    async fn delete_snapshot_row(&self, snapshot: &Snapshot) -> Result<CleanupReport> {
        let mut report = self.delete_metadata_only(snapshot).await?;
        report.snapshots_deleted += 1;
        report.bytes_reclaimed += snapshot.storage_size;

        if let Err(e) = self.backend.delete(&snapshot.storage_key).await {
            warn!(
                subsystem = "db",
                component = "retention",
                snapshot_id = %snapshot.id,
                storage_key = %snapshot.storage_key,
                error = %e,
                "Failed to delete snapshot blob"
            );
        }
        Ok(report)
    }

    /// Transactional part of a snapshot delete: remove the row, drop
    /// ledger rows for images only this snapshot referenced, fix the
    /// bookmark counter, and re-promote a latest row if needed.
    ///
    /// The returned report counts image cleanup and promotions only; the
    /// caller accounts for the snapshot row and its blob.
    async fn delete_metadata_only(&self, snapshot: &Snapshot) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let hashes = self.snapshots.image_hashes(snapshot.id).await?;

        let mut stranded: Vec<(String, String, i64)> = Vec::new();

        let mut tx = self.pool.begin().await?;
        for hash in &hashes {
            let remaining = self
                .images
                .reference_count_excluding_tx(&mut tx, hash, snapshot.id)
                .await?;
            if remaining == 0 {
                if let Some(blob) = self.images.find_by_hash(hash).await? {
                    stranded.push((blob.hash.clone(), blob.mime_type.clone(), blob.size_bytes));
                }
                self.images.delete_tx(&mut tx, hash).await?;
            }
        }
        self.snapshots.delete_tx(&mut tx, snapshot.id).await?;
        self.bookmarks
            .adjust_snapshot_count_tx(&mut tx, snapshot.bookmark_id, -1)
            .await?;
        let promoted = if snapshot.is_latest {
            self.snapshots
                .promote_latest_tx(&mut tx, snapshot.bookmark_id)
                .await?
        } else {
            false
        };
        tx.commit().await?;

        for (hash, mime_type, size_bytes) in stranded {
            self.delete_image_blob_from_storage(&hash, &mime_type).await;
            report.images_deleted += 1;
            report.bytes_reclaimed += size_bytes;
        }

        if promoted {
            report.latest_promoted += 1;
        }
        Ok(report)
    }

    /// Best-effort removal of an image blob under every key layout it may
    /// have been written with.
    async fn delete_image_blob_from_storage(&self, hash: &str, mime_type: &str) {
        for key in image_key_variants(hash, mime_type) {
            if let Err(e) = self.backend.delete(&key).await {
                warn!(
                    subsystem = "db",
                    component = "retention",
                    image_hash = %hash,
                    storage_key = %key,
                    error = %e,
                    "Failed to delete image blob"
                );
            }
        }
    }
}
