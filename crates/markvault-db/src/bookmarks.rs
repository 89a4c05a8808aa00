//! Bookmark-side lookups the snapshot subsystem depends on.
//!
//! The bookmark table itself belongs to the CRUD layer; this repository
//! only performs the narrow operations the snapshot pipeline needs:
//! ownership checks, snapshot counter maintenance, and retention
//! keep-count resolution.

use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use markvault_core::{Error, Result};

/// PostgreSQL bookmark repository (snapshot-facing subset).
#[derive(Clone)]
pub struct PgBookmarkRepository {
    pool: PgPool,
}

impl PgBookmarkRepository {
    /// Create a new bookmark repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Assert that a bookmark exists, belongs to `owner_id`, and is not
    /// soft-deleted. Required before any snapshot read or write.
    ///
    /// Ownership mismatch and absence are indistinguishable to the caller
    /// so existence is not leaked to non-owners.
    pub async fn ensure_owned(&self, bookmark_id: Uuid, owner_id: Uuid) -> Result<()> {
        let found: Option<bool> = sqlx::query_scalar(
            r#"SELECT TRUE FROM bookmark
               WHERE id = $1 AND owner_id = $2 AND deleted_at IS NULL"#,
        )
        .bind(bookmark_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match found {
            Some(_) => Ok(()),
            None => Err(Error::BookmarkNotFound(bookmark_id)),
        }
    }

    /// Adjust the bookmark's denormalized snapshot counter inside the
    /// caller's transaction. `delta` may be negative.
    pub async fn adjust_snapshot_count_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        bookmark_id: Uuid,
        delta: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE bookmark
               SET snapshot_count = GREATEST(snapshot_count + $2, 0)
               WHERE id = $1"#,
        )
        .bind(bookmark_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Resolve the effective keep-count for a bookmark.
    ///
    /// Resolution order: per-bookmark override → per-owner default
    /// (`owner_setting` key `snapshot_keep_count`) → `system_default`.
    /// A value of `-1` at any level means unlimited retention.
    pub async fn keep_count_for(&self, bookmark_id: Uuid, system_default: i32) -> Result<i32> {
        let row = sqlx::query(
            r#"SELECT b.snapshot_keep_count, b.owner_id,
                      (SELECT value FROM owner_setting
                       WHERE owner_id = b.owner_id AND key = 'snapshot_keep_count')
                      AS owner_default
               FROM bookmark b WHERE b.id = $1"#,
        )
        .bind(bookmark_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::BookmarkNotFound(bookmark_id))?;

        if let Some(count) = row.get::<Option<i32>, _>("snapshot_keep_count") {
            return Ok(count);
        }
        if let Some(value) = row.get::<Option<serde_json::Value>, _>("owner_default") {
            if let Some(count) = value.as_i64() {
                return Ok(count as i32);
            }
        }
        Ok(system_default)
    }

    /// Set the per-owner retention default.
    pub async fn set_owner_keep_count(&self, owner_id: Uuid, keep_count: i32) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO owner_setting (owner_id, key, value)
               VALUES ($1, 'snapshot_keep_count', $2::jsonb)
               ON CONFLICT (owner_id, key) DO UPDATE SET value = EXCLUDED.value"#,
        )
        .bind(owner_id)
        .bind(serde_json::json!(keep_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Set (or clear) the per-bookmark keep-count override.
    pub async fn set_bookmark_keep_count(
        &self,
        bookmark_id: Uuid,
        keep_count: Option<i32>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE bookmark SET snapshot_keep_count = $2 WHERE id = $1")
            .bind(bookmark_id)
            .bind(keep_count)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::BookmarkNotFound(bookmark_id));
        }
        Ok(())
    }

    /// Bookmarks that currently have at least one snapshot, for retention
    /// passes that iterate per bookmark rather than in one unbounded scan.
    pub async fn ids_with_snapshots(&self) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT DISTINCT bookmark_id FROM snapshot ORDER BY bookmark_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    /// Insert a bookmark row. Exists for tests and fixtures; production
    /// bookmark creation lives in the CRUD layer.
    pub async fn insert(&self, owner_id: Uuid, url: &str, title: Option<&str>) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"INSERT INTO bookmark (id, owner_id, url, title, snapshot_count, created_at)
               VALUES ($1, $2, $3, $4, 0, NOW())"#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(url)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Soft-delete a bookmark. Exists for tests; the CRUD layer owns the
    /// real delete path (snapshot rows cascade on purge).
    pub async fn soft_delete(&self, bookmark_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE bookmark SET deleted_at = NOW() WHERE id = $1")
            .bind(bookmark_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
