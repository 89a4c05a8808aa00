//! Image dedup ledger.
//!
//! Identical image bytes referenced by any number of snapshots share one
//! stored blob. The ledger is keyed by content hash; rows are created on
//! first sight of a hash and never mutated. Reference counts are always
//! derived by scanning `snapshot_image` — there is no stored counter to
//! drift out of sync.

use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use markvault_core::{ImageBlob, Result};

/// PostgreSQL image dedup ledger.
#[derive(Clone)]
pub struct PgImageBlobRepository {
    pool: PgPool,
}

impl PgImageBlobRepository {
    /// Create a new image blob repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a ledger row by content hash.
    ///
    /// Dedup is global across owners by content hash: a hit means the
    /// bytes are already stored and the existing key is reused.
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<ImageBlob>> {
        let row = sqlx::query(
            r#"SELECT hash, storage_key, size_bytes, mime_type,
                      first_owner_id, first_bookmark_id, created_at
               FROM image_blob WHERE hash = $1"#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(image_blob_from_row))
    }

    /// Insert a new ledger row on first sight of a hash.
    ///
    /// Concurrent first-sight races resolve via ON CONFLICT: both writers
    /// end up referencing the same row.
    pub async fn insert(
        &self,
        hash: &str,
        storage_key: &str,
        size_bytes: i64,
        mime_type: &str,
        first_owner_id: Option<Uuid>,
        first_bookmark_id: Option<Uuid>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO image_blob
               (hash, storage_key, size_bytes, mime_type, first_owner_id, first_bookmark_id, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW())
               ON CONFLICT (hash) DO NOTHING"#,
        )
        .bind(hash)
        .bind(storage_key)
        .bind(size_bytes)
        .bind(mime_type)
        .bind(first_owner_id)
        .bind(first_bookmark_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of snapshots referencing a hash, derived by scan.
    pub async fn reference_count(&self, hash: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_image WHERE image_hash = $1")
                .bind(hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Reference count excluding one snapshot — used when deciding whether
    /// deleting that snapshot strands the blob.
    pub async fn reference_count_excluding_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        hash: &str,
        excluded_snapshot: Uuid,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM snapshot_image WHERE image_hash = $1 AND snapshot_id != $2",
        )
        .bind(hash)
        .bind(excluded_snapshot)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    /// Delete a ledger row inside the caller's transaction.
    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Postgres>, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM image_blob WHERE hash = $1")
            .bind(hash)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Ledger rows no snapshot references, older than `min_age_hours`.
    ///
    /// The age guard keeps the orphan scan from collecting images uploaded
    /// by a writer whose metadata transaction has not committed yet.
    pub async fn unreferenced_older_than(&self, min_age_hours: i32) -> Result<Vec<ImageBlob>> {
        let rows = sqlx::query(
            r#"SELECT ib.hash, ib.storage_key, ib.size_bytes, ib.mime_type,
                      ib.first_owner_id, ib.first_bookmark_id, ib.created_at
               FROM image_blob ib
               WHERE NOT EXISTS (
                   SELECT 1 FROM snapshot_image si WHERE si.image_hash = ib.hash
               )
               AND ib.created_at < NOW() - ($1::TEXT || ' hours')::interval"#,
        )
        .bind(min_age_hours)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(image_blob_from_row).collect())
    }
}

/// Convert a database row to an ImageBlob.
fn image_blob_from_row(row: &sqlx::postgres::PgRow) -> ImageBlob {
    ImageBlob {
        hash: row.get("hash"),
        storage_key: row.get("storage_key"),
        size_bytes: row.get("size_bytes"),
        mime_type: row.get("mime_type"),
        first_owner_id: row.get("first_owner_id"),
        first_bookmark_id: row.get("first_bookmark_id"),
        created_at: row.get("created_at"),
    }
}
