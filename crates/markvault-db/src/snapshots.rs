//! Snapshot metadata repository.
//!
//! Owns the `snapshot` and `snapshot_image` tables. The invariant-bearing
//! operation is [`PgSnapshotRepository::insert_version_tx`]: flipping the
//! previous latest row and inserting the new one must commit as a single
//! transaction, or the exactly-one-latest invariant tears. A partial
//! unique index on `(bookmark_id) WHERE is_latest` backs this up at the
//! schema level.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use markvault_core::{Error, Result, Snapshot, SnapshotStatus};

/// PostgreSQL snapshot metadata repository.
#[derive(Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
}

const SNAPSHOT_COLUMNS: &str = "id, bookmark_id, owner_id, version, is_latest, content_hash, \
     storage_key, storage_size, mime_type, title, source_url, status, created_at";

impl PgSnapshotRepository {
    /// Create a new snapshot repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a snapshot by ID.
    pub async fn get(&self, id: Uuid) -> Result<Snapshot> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::SnapshotNotFound(id))?;

        snapshot_from_row(&row)
    }

    /// Get a snapshot by ID, scoped to an owner.
    ///
    /// A mismatch surfaces as not-found so existence is not leaked.
    pub async fn get_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Snapshot> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::SnapshotNotFound(id))?;

        snapshot_from_row(&row)
    }

    /// Resolve the snapshot identified by an owner/bookmark/version triple.
    ///
    /// The image proxy re-derives ownership through this lookup instead of
    /// trusting a hash-only reference.
    pub async fn get_by_triple(
        &self,
        owner_id: Uuid,
        bookmark_id: Uuid,
        version: i32,
    ) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot
             WHERE owner_id = $1 AND bookmark_id = $2 AND version = $3"
        ))
        .bind(owner_id)
        .bind(bookmark_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// The current latest snapshot for a bookmark, if any.
    pub async fn latest_for_bookmark(&self, bookmark_id: Uuid) -> Result<Option<Snapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot
             WHERE bookmark_id = $1 AND is_latest = TRUE"
        ))
        .bind(bookmark_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Highest version number ever assigned for a bookmark (0 if none).
    ///
    /// Retention deletions never renumber survivors, so the next version is
    /// always max + 1 even when older rows are gone.
    pub async fn max_version(&self, bookmark_id: Uuid) -> Result<i32> {
        let max: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM snapshot WHERE bookmark_id = $1")
                .bind(bookmark_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0))
    }

    /// List a bookmark's snapshots, newest first, with the total count.
    pub async fn list_by_bookmark(
        &self,
        bookmark_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Snapshot>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM snapshot WHERE bookmark_id = $1")
                .bind(bookmark_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot
             WHERE bookmark_id = $1
             ORDER BY version DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(bookmark_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(snapshot_from_row(row)?);
        }
        Ok((snapshots, total))
    }

    /// Insert a new latest version, demoting every other row for the
    /// bookmark in the same transaction.
    pub async fn insert_version_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot: &Snapshot,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE snapshot SET is_latest = FALSE WHERE bookmark_id = $1 AND is_latest = TRUE",
        )
        .bind(snapshot.bookmark_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO snapshot
               (id, bookmark_id, owner_id, version, is_latest, content_hash,
                storage_key, storage_size, mime_type, title, source_url, status, created_at)
               VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(snapshot.id)
        .bind(snapshot.bookmark_id)
        .bind(snapshot.owner_id)
        .bind(snapshot.version)
        .bind(&snapshot.content_hash)
        .bind(&snapshot.storage_key)
        .bind(snapshot.storage_size)
        .bind(&snapshot.mime_type)
        .bind(&snapshot.title)
        .bind(&snapshot.source_url)
        .bind(snapshot.status.to_string())
        .bind(snapshot.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Record which image hashes a snapshot references.
    pub async fn link_images_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot_id: Uuid,
        image_hashes: &[String],
    ) -> Result<()> {
        for hash in image_hashes {
            sqlx::query(
                r#"INSERT INTO snapshot_image (snapshot_id, image_hash)
                   VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
            )
            .bind(snapshot_id)
            .bind(hash)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Image hashes referenced by a snapshot.
    pub async fn image_hashes(&self, snapshot_id: Uuid) -> Result<Vec<String>> {
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT image_hash FROM snapshot_image WHERE snapshot_id = $1")
                .bind(snapshot_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(hashes)
    }

    /// Delete a snapshot row (and its image links, via FK cascade) inside
    /// the caller's transaction.
    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM snapshot WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::SnapshotNotFound(id));
        }
        Ok(())
    }

    /// Re-promote the highest-version survivor to latest if the bookmark
    /// currently has no latest row. Returns whether a promotion happened.
    ///
    /// Mirrors the writer's transactional discipline: callers run this in
    /// the same transaction as the delete that removed the previous latest.
    pub async fn promote_latest_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        bookmark_id: Uuid,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE snapshot SET is_latest = TRUE
               WHERE id = (
                   SELECT id FROM snapshot
                   WHERE bookmark_id = $1
                   ORDER BY version DESC
                   LIMIT 1
               )
               AND NOT EXISTS (
                   SELECT 1 FROM snapshot WHERE bookmark_id = $1 AND is_latest = TRUE
               )"#,
        )
        .bind(bookmark_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Non-latest versions beyond the newest `keep` for a bookmark, oldest
    /// first — the keep-count policy's prune set.
    pub async fn versions_beyond_keep(
        &self,
        bookmark_id: Uuid,
        keep: i64,
    ) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot
             WHERE bookmark_id = $1 AND is_latest = FALSE
               AND id NOT IN (
                   SELECT id FROM snapshot WHERE bookmark_id = $1
                   ORDER BY version DESC LIMIT $2
               )
             ORDER BY version ASC"
        ))
        .bind(bookmark_id)
        .bind(keep)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(snapshot_from_row(row)?);
        }
        Ok(snapshots)
    }

    /// Non-latest versions older than `days` across all bookmarks — the
    /// age policy's prune set.
    pub async fn versions_older_than(&self, days: i32) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot
             WHERE is_latest = FALSE
               AND created_at < NOW() - ($1::TEXT || ' days')::interval
             ORDER BY bookmark_id, version ASC"
        ))
        .bind(days)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(snapshot_from_row(row)?);
        }
        Ok(snapshots)
    }

    /// One page of the full snapshot table, for the orphan-repair scan.
    pub async fn scan_page(&self, limit: i64, offset: i64) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshot ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(snapshot_from_row(row)?);
        }
        Ok(snapshots)
    }
}

/// Convert a database row to a Snapshot.
fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<Snapshot> {
    let status: String = row.get("status");
    Ok(Snapshot {
        id: row.get("id"),
        bookmark_id: row.get("bookmark_id"),
        owner_id: row.get("owner_id"),
        version: row.get("version"),
        is_latest: row.get("is_latest"),
        content_hash: row.get("content_hash"),
        storage_key: row.get("storage_key"),
        storage_size: row.get("storage_size"),
        mime_type: row.get("mime_type"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        status: SnapshotStatus::from_str(&status).map_err(Error::Serialization)?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}
