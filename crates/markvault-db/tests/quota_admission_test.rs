//! Quota admission contract tests against a live aggregate.

use std::sync::Arc;

use markvault_core::{Error, SnapshotConfig};
use markvault_db::test_fixtures::{capture_payload, create_test_bookmark, purge_owner, test_pool};
use markvault_db::{FilesystemBackend, QuotaEnforcer, SnapshotStore};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_unlimited_quota_reports_usage_but_always_allows() {
    let pool = test_pool().await;
    let quota = QuotaEnforcer::new(pool.clone(), None);

    let decision = quota.check(i64::MAX / 2).await.unwrap();
    assert!(decision.allowed);
    assert!(decision.limit_bytes.is_none());
    assert!(decision.used_bytes >= 0);
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_non_positive_configured_limit_means_unlimited() {
    let pool = test_pool().await;
    for raw in [Some(0), Some(-5)] {
        let quota = QuotaEnforcer::new(pool.clone(), raw);
        assert!(quota.limit_bytes().is_none());
        assert!(quota.check(1_000_000_000).await.unwrap().allowed);
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_write_rejected_when_quota_would_be_exceeded() {
    // Fill usage to 900 bytes above the baseline and set the ceiling 1000
    // above it: a 200-byte write is rejected with used/limit reported, a
    // 50-byte write is accepted.
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(FilesystemBackend::new(temp_dir.path()));

    let baseline = QuotaEnforcer::new(pool.clone(), None)
        .used_bytes()
        .await
        .unwrap();

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    // Seed 900 bytes of usage with an unlimited store.
    let seed_store = SnapshotStore::new(
        pool.clone(),
        backend.clone(),
        SnapshotConfig::default().with_quota(None),
    );
    let filler = format!("<html>{}</html>", "x".repeat(900 - "<html></html>".len()));
    assert_eq!(filler.len(), 900);
    seed_store
        .create_snapshot(owner, bookmark, &capture_payload(&filler))
        .await
        .unwrap();

    let limit = baseline + 1000;
    let store = SnapshotStore::new(
        pool.clone(),
        backend,
        SnapshotConfig::default().with_quota(Some(limit)),
    );

    let big = format!("<html>{}</html>", "y".repeat(200 - "<html></html>".len()));
    assert_eq!(big.len(), 200);
    let err = store
        .create_snapshot(owner, bookmark, &capture_payload(&big))
        .await
        .unwrap_err();
    match err {
        Error::QuotaExceeded {
            used_bytes,
            limit_bytes,
        } => {
            assert_eq!(used_bytes, baseline + 900);
            assert_eq!(limit_bytes, limit);
        }
        other => panic!("expected QuotaExceeded, got {:?}", other),
    }

    let small = format!("<html>{}</html>", "z".repeat(50 - "<html></html>".len()));
    assert_eq!(small.len(), 50);
    store
        .create_snapshot(owner, bookmark, &capture_payload(&small))
        .await
        .unwrap();

    let used = QuotaEnforcer::new(pool.clone(), None)
        .used_bytes()
        .await
        .unwrap();
    assert_eq!(used, baseline + 950);

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_oversized_payload_rejected_before_quota() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let mut config = SnapshotConfig::default();
    config.max_snapshot_bytes = 100;
    let store = SnapshotStore::new(
        pool.clone(),
        Arc::new(FilesystemBackend::new(temp_dir.path())),
        config,
    );

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    let err = store
        .create_snapshot(
            owner,
            bookmark,
            &capture_payload(&format!("<html>{}</html>", "x".repeat(200))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    // Nothing was written.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshot WHERE bookmark_id = $1")
        .bind(bookmark)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    purge_owner(&pool, owner).await;
}
