//! Snapshot writer lifecycle tests: exactly-one-latest, the dedup
//! short-circuit, version monotonicity, and the keep-count scenario.

use std::sync::Arc;

use markvault_core::{SnapshotConfig, SnapshotWriteOutcome};
use markvault_db::test_fixtures::{capture_payload, create_test_bookmark, purge_owner, test_pool};
use markvault_db::{FilesystemBackend, RetentionManager, SnapshotStore};
use sqlx::PgPool;
use tempfile::TempDir;
use uuid::Uuid;

fn setup_store(pool: PgPool, temp_dir: &TempDir, config: SnapshotConfig) -> SnapshotStore {
    SnapshotStore::new(
        pool,
        Arc::new(FilesystemBackend::new(temp_dir.path())),
        config,
    )
}

async fn latest_flags(pool: &PgPool, bookmark_id: Uuid) -> Vec<(i32, bool)> {
    sqlx::query_as::<_, (i32, bool)>(
        "SELECT version, is_latest FROM snapshot WHERE bookmark_id = $1 ORDER BY version",
    )
    .bind(bookmark_id)
    .fetch_all(pool)
    .await
    .expect("Failed to query snapshot flags")
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_first_snapshot_is_version_one_and_latest() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let store = setup_store(pool.clone(), &temp_dir, SnapshotConfig::default());

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    let outcome = store
        .create_snapshot(owner, bookmark, &capture_payload("<html>v1</html>"))
        .await
        .unwrap();

    match outcome {
        SnapshotWriteOutcome::Created(snap) => {
            assert_eq!(snap.version, 1);
            assert!(snap.is_latest);
            assert!(snap.content_hash.starts_with("blake3:"));
        }
        other => panic!("expected Created, got {:?}", other),
    }

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_new_version_demotes_previous_latest() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let store = setup_store(pool.clone(), &temp_dir, SnapshotConfig::default());

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>v1</html>"))
        .await
        .unwrap();
    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>v2</html>"))
        .await
        .unwrap();

    // Exactly one latest, and it is the highest version.
    assert_eq!(
        latest_flags(&pool, bookmark).await,
        vec![(1, false), (2, true)]
    );

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_identical_capture_short_circuits() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let store = setup_store(pool.clone(), &temp_dir, SnapshotConfig::default());

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    let first = store
        .create_snapshot(owner, bookmark, &capture_payload("<html>same</html>"))
        .await
        .unwrap();
    let first_id = match first {
        SnapshotWriteOutcome::Created(ref snap) => snap.id,
        _ => panic!("expected Created"),
    };

    let second = store
        .create_snapshot(owner, bookmark, &capture_payload("<html>same</html>"))
        .await
        .unwrap();

    match second {
        SnapshotWriteOutcome::Unchanged { id, version, .. } => {
            assert_eq!(id, first_id);
            assert_eq!(version, 1);
        }
        other => panic!("expected Unchanged, got {:?}", other),
    }

    // Exactly one row was created.
    assert_eq!(latest_flags(&pool, bookmark).await.len(), 1);

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_force_writes_even_when_identical() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let store = setup_store(pool.clone(), &temp_dir, SnapshotConfig::default());

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>same</html>"))
        .await
        .unwrap();

    let mut forced = capture_payload("<html>same</html>");
    forced.force = true;
    let outcome = store.create_snapshot(owner, bookmark, &forced).await.unwrap();

    match outcome {
        SnapshotWriteOutcome::Created(snap) => assert_eq!(snap.version, 2),
        other => panic!("expected Created, got {:?}", other),
    }

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_versions_are_not_renumbered_after_pruning() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let config = SnapshotConfig::default();
    let store = setup_store(pool.clone(), &temp_dir, config.clone());
    let retention = RetentionManager::new(
        pool.clone(),
        Arc::new(FilesystemBackend::new(temp_dir.path())),
        config,
    );

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    for i in 1..=3 {
        store
            .create_snapshot(owner, bookmark, &capture_payload(&format!("<html>v{i}</html>")))
            .await
            .unwrap();
    }

    let report = retention.prune_bookmark(bookmark, Some(1)).await.unwrap();
    assert_eq!(report.snapshots_deleted, 2);

    // Survivor keeps its original version number; the next write continues
    // the sequence from there.
    assert_eq!(latest_flags(&pool, bookmark).await, vec![(3, true)]);

    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>v4</html>"))
        .await
        .unwrap();
    assert_eq!(
        latest_flags(&pool, bookmark).await,
        vec![(3, false), (4, true)]
    );

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_keep_count_scenario_from_two_versions() {
    // v1, v2 → cleanup(keep_count=1) deletes v1; a second run is a no-op.
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let config = SnapshotConfig::default();
    let store = setup_store(pool.clone(), &temp_dir, config.clone());
    let retention = RetentionManager::new(
        pool.clone(),
        Arc::new(FilesystemBackend::new(temp_dir.path())),
        config,
    );

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>first</html>"))
        .await
        .unwrap();
    store
        .create_snapshot(owner, bookmark, &capture_payload("<html>second</html>"))
        .await
        .unwrap();

    let report = retention.prune_bookmark(bookmark, Some(1)).await.unwrap();
    assert_eq!(report.snapshots_deleted, 1);
    assert_eq!(latest_flags(&pool, bookmark).await, vec![(2, true)]);

    let again = retention.prune_bookmark(bookmark, Some(1)).await.unwrap();
    assert_eq!(again.snapshots_deleted, 0);
    assert_eq!(latest_flags(&pool, bookmark).await, vec![(2, true)]);

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_snapshot_counter_tracks_writes_and_deletes() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let config = SnapshotConfig::default();
    let store = setup_store(pool.clone(), &temp_dir, config.clone());
    let retention = RetentionManager::new(
        pool.clone(),
        Arc::new(FilesystemBackend::new(temp_dir.path())),
        config,
    );

    let owner = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    for i in 1..=2 {
        store
            .create_snapshot(owner, bookmark, &capture_payload(&format!("<html>{i}</html>")))
            .await
            .unwrap();
    }

    let count: i32 = sqlx::query_scalar("SELECT snapshot_count FROM bookmark WHERE id = $1")
        .bind(bookmark)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    retention.prune_bookmark(bookmark, Some(1)).await.unwrap();
    let count: i32 = sqlx::query_scalar("SELECT snapshot_count FROM bookmark WHERE id = $1")
        .bind(bookmark)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    purge_owner(&pool, owner).await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_foreign_bookmark_is_invisible() {
    let pool = test_pool().await;
    let temp_dir = TempDir::new().unwrap();
    let store = setup_store(pool.clone(), &temp_dir, SnapshotConfig::default());

    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let bookmark = create_test_bookmark(&pool, owner).await;

    let err = store
        .create_snapshot(stranger, bookmark, &capture_payload("<html>x</html>"))
        .await
        .unwrap_err();
    assert!(matches!(err, markvault_core::Error::BookmarkNotFound(_)));

    purge_owner(&pool, owner).await;
}
