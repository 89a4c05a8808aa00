//! Snapshot CRUD and maintenance HTTP handlers.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use markvault_core::{
    defaults, CapturePayload, CleanupReport, JobType, SnapshotSummary, SnapshotWriteOutcome,
};
use markvault_crypto::CapabilityAction;
use markvault_db::{JobRepository, SnapshotStore};

use crate::{require_owner, ApiError, AppState, ListResponse};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Response body for a successful snapshot creation.
#[derive(Debug, Serialize)]
pub struct CreateSnapshotResponse {
    pub id: Uuid,
    pub version: i32,
    pub file_size: i64,
    pub content_hash: String,
    pub is_latest: bool,
    pub created_at: DateTime<Utc>,
    /// Pre-signed view URL, valid for the configured TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_url: Option<String>,
}

/// Response body for the dedup short-circuit.
#[derive(Debug, Serialize)]
pub struct DuplicateSnapshotResponse {
    pub is_duplicate: bool,
    pub id: Uuid,
    pub version: i32,
    pub content_hash: String,
}

/// Pagination query for snapshot listings.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for the administrative cleanup endpoint.
///
/// Any combination of the three operations may be requested; they run in
/// the order keep-count → age → repair.
#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    /// Apply the keep-count policy with this count (overrides configured
    /// policies; `-1` means unlimited and is a no-op).
    pub keep_count: Option<i32>,
    /// Delete non-latest versions older than this many days.
    pub older_than_days: Option<i32>,
    /// Run the orphan-repair scan.
    #[serde(default)]
    pub verify_and_fix: bool,
}

pub(crate) fn snapshot_store(state: &AppState) -> Result<&SnapshotStore, ApiError> {
    state
        .db
        .snapshot_store
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Snapshot storage not configured".to_string()))
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Create a snapshot of a bookmark from a capture payload.
///
/// # Returns
/// - 201 Created with the stored version's metadata and a signed view URL
/// - 200 OK with `{ "is_duplicate": true }` when the capture is identical
///   to the current latest version
/// - 404 Not Found if the bookmark doesn't exist or isn't the caller's
/// - 413 Payload Too Large with `{used, limit}` when the quota denies it
pub async fn create_snapshot(
    State(state): State<AppState>,
    Path(bookmark_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<CapturePayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let owner_id = require_owner(&headers)?;
    let store = snapshot_store(&state)?;

    match store.create_snapshot(owner_id, bookmark_id, &payload).await? {
        SnapshotWriteOutcome::Created(snapshot) => {
            let capability = state.signer.issue(
                owner_id,
                snapshot.id,
                state.view_ttl_secs,
                CapabilityAction::View,
            );
            let view_url = crate::handlers::view::signed_view_url(
                &state.base_url,
                snapshot.id,
                owner_id,
                &capability,
            );

            let response = CreateSnapshotResponse {
                id: snapshot.id,
                version: snapshot.version,
                file_size: snapshot.storage_size,
                content_hash: snapshot.content_hash,
                is_latest: snapshot.is_latest,
                created_at: snapshot.created_at,
                view_url: Some(view_url),
            };
            Ok((StatusCode::CREATED, Json(serde_json::to_value(response)?)))
        }
        SnapshotWriteOutcome::Unchanged {
            id,
            version,
            content_hash,
        } => {
            let response = DuplicateSnapshotResponse {
                is_duplicate: true,
                id,
                version,
                content_hash,
            };
            Ok((StatusCode::OK, Json(serde_json::to_value(response)?)))
        }
    }
}

/// List a bookmark's snapshots, newest first.
pub async fn list_snapshots(
    State(state): State<AppState>,
    Path(bookmark_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<SnapshotSummary>>, ApiError> {
    let owner_id = require_owner(&headers)?;
    state.db.bookmarks.ensure_owned(bookmark_id, owner_id).await?;

    let limit = query.limit.unwrap_or(defaults::PAGE_LIMIT).clamp(1, 500);
    let offset = query.offset.unwrap_or(defaults::PAGE_OFFSET).max(0);

    let (snapshots, total) = state
        .db
        .snapshots
        .list_by_bookmark(bookmark_id, limit, offset)
        .await?;

    let summaries: Vec<SnapshotSummary> = snapshots.iter().map(SnapshotSummary::from).collect();
    Ok(Json(ListResponse::new(
        summaries,
        total as usize,
        limit as usize,
        offset as usize,
    )))
}

/// Delete a snapshot the caller owns.
///
/// Image blobs the snapshot referenced are collected when no other
/// snapshot shares them; if the deleted row was latest, the next-newest
/// survivor is promoted.
pub async fn delete_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let owner_id = require_owner(&headers)?;
    let retention = state
        .db
        .retention
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Snapshot storage not configured".to_string()))?;

    let report = retention.delete_snapshot(id, owner_id).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "bytes_reclaimed": report.bytes_reclaimed,
        "images_deleted": report.images_deleted,
    })))
}

/// Administrative cleanup: keep-count pruning, age pruning, and orphan
/// repair, in any combination.
pub async fn cleanup_snapshots(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupReport>, ApiError> {
    // Cleanup spans every owner's data; it still requires an
    // authenticated principal.
    require_owner(&headers)?;

    if request.keep_count.is_none() && request.older_than_days.is_none() && !request.verify_and_fix
    {
        return Err(ApiError::BadRequest(
            "one of keep_count, older_than_days, or verify_and_fix is required".to_string(),
        ));
    }

    let retention = state
        .db
        .retention
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Snapshot storage not configured".to_string()))?;

    let mut report = CleanupReport::default();
    if let Some(keep) = request.keep_count {
        report.absorb(retention.prune_all(Some(keep)).await?);
    }
    if let Some(days) = request.older_than_days {
        if days < 0 {
            return Err(ApiError::BadRequest(
                "older_than_days must be non-negative".to_string(),
            ));
        }
        report.absorb(retention.prune_older_than(days).await?);
    }
    if request.verify_and_fix {
        report.absorb(retention.verify_and_fix().await?);
    }

    Ok(Json(report))
}

/// Queue an orphan-repair job instead of running it inline.
pub async fn queue_repair(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    require_owner(&headers)?;

    let queued = state
        .db
        .jobs
        .queue_deduplicated(
            None,
            JobType::OrphanRepair,
            JobType::OrphanRepair.default_priority(),
            None,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "queued": queued.is_some(),
            "job_id": queued,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_request_deserialization() {
        let json = r#"{"keep_count": 5}"#;
        let req: CleanupRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.keep_count, Some(5));
        assert!(req.older_than_days.is_none());
        assert!(!req.verify_and_fix);
    }

    #[test]
    fn test_cleanup_request_combined() {
        let json = r#"{"older_than_days": 30, "verify_and_fix": true}"#;
        let req: CleanupRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.older_than_days, Some(30));
        assert!(req.verify_and_fix);
    }

    #[test]
    fn test_create_snapshot_response_omits_absent_view_url() {
        let response = CreateSnapshotResponse {
            id: Uuid::nil(),
            version: 1,
            file_size: 100,
            content_hash: "blake3:aa".to_string(),
            is_latest: true,
            created_at: Utc::now(),
            view_url: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("view_url"));
        assert!(json.contains("\"version\":1"));
    }

    #[test]
    fn test_duplicate_response_shape() {
        let response = DuplicateSnapshotResponse {
            is_duplicate: true,
            id: Uuid::nil(),
            version: 2,
            content_hash: "blake3:bb".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"is_duplicate\":true"));
    }

    #[test]
    fn test_list_query_defaults_absent() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert!(query.limit.is_none());
        assert!(query.offset.is_none());
    }
}
