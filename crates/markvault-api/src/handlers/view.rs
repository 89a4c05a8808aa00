//! Snapshot viewing, image proxying, and share-URL issuance.
//!
//! The view path renders a stored capture without a login session when a
//! valid capability rides along as query parameters. V2 pages get every
//! image reference rewritten into a fully-qualified, capability-carrying
//! proxy URL so the page is self-contained in the viewer's browser.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use markvault_core::Snapshot;
use markvault_crypto::{CapabilityAction, IssuedCapability};
use markvault_db::{detect_encoding, proxy_image_path, rewrite_image_refs, SnapshotEncoding};

use crate::{require_owner, ApiError, AppState};

use super::snapshots::snapshot_store;

/// Captured pages are free-form third-party content and must render with
/// their original styling and scripting intact; isolation is traded for
/// fidelity, scoped to this single response.
const PERMISSIVE_CSP: &str = "default-src * data: blob: 'unsafe-inline' 'unsafe-eval'; \
     img-src * data: blob:; style-src * 'unsafe-inline'; \
     script-src * data: blob: 'unsafe-inline' 'unsafe-eval'";

/// Stored content is hash-addressed and immutable.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

/// Capability tuple carried as query parameters on view/image requests.
#[derive(Debug, Default, Deserialize)]
pub struct CapabilityQuery {
    pub signature: Option<String>,
    pub expires_at: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub action: Option<String>,
}

impl CapabilityQuery {
    fn is_present(&self) -> bool {
        self.signature.is_some()
    }
}

/// Response for share-URL issuance.
#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub url: String,
    pub signature: String,
    pub expires_at: i64,
}

/// Build a signed view URL from an issued capability.
pub fn signed_view_url(
    base_url: &str,
    snapshot_id: Uuid,
    owner_id: Uuid,
    capability: &IssuedCapability,
) -> String {
    format!(
        "{}/api/snapshots/{}/view?signature={}&expires_at={}&owner_id={}&action=view",
        base_url, snapshot_id, capability.signature, capability.expires_at, owner_id
    )
}

fn signed_image_url(
    base_url: &str,
    owner_id: Uuid,
    bookmark_id: Uuid,
    version: i32,
    digest: &str,
    capability: &IssuedCapability,
) -> String {
    format!(
        "{}{}?signature={}&expires_at={}&owner_id={}&action=view",
        base_url,
        proxy_image_path(owner_id, bookmark_id, version, digest),
        capability.signature,
        capability.expires_at,
        owner_id
    )
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Authorize read access to a snapshot and return the capability to
/// propagate into image URLs.
///
/// Two paths: a complete, verified capability tuple (bearer semantics), or
/// the owner's own session, in which case a fresh capability is minted so
/// embedded image requests can authenticate themselves.
fn authorize_view(
    state: &AppState,
    snapshot: &Snapshot,
    headers: &HeaderMap,
    query: &CapabilityQuery,
) -> Result<(Uuid, IssuedCapability), ApiError> {
    if query.is_present() {
        let signature = query.signature.as_deref().unwrap_or_default();
        let (expires_at, owner_id, action) =
            match (query.expires_at, query.owner_id, query.action.as_deref()) {
                (Some(e), Some(o), Some(a)) => (e, o, a),
                _ => {
                    return Err(ApiError::BadRequest(
                        "signature, expires_at, owner_id, and action are all required".to_string(),
                    ))
                }
            };
        let action = CapabilityAction::from_str(action)?;

        state
            .signer
            .verify(signature, expires_at, owner_id, snapshot.id, action)?;

        return Ok((
            owner_id,
            IssuedCapability {
                signature: signature.to_string(),
                expires_at,
            },
        ));
    }

    // Session path: must be the owner. Mismatch is a 404, not a 403, so
    // snapshot existence is not leaked.
    let session_owner = require_owner(headers)?;
    if session_owner != snapshot.owner_id {
        return Err(ApiError::NotFound(format!(
            "Snapshot {} not found",
            snapshot.id
        )));
    }

    let capability = state.signer.issue(
        session_owner,
        snapshot.id,
        state.view_ttl_secs,
        CapabilityAction::View,
    );
    Ok((session_owner, capability))
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Issue a signed view URL for a snapshot the caller owns.
pub async fn share_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ShareResponse>, ApiError> {
    let owner_id = require_owner(&headers)?;
    let snapshot = state.db.snapshots.get_owned(id, owner_id).await?;

    let capability = state.signer.issue(
        owner_id,
        snapshot.id,
        state.view_ttl_secs,
        CapabilityAction::View,
    );

    Ok(Json(ShareResponse {
        url: signed_view_url(&state.base_url, snapshot.id, owner_id, &capability),
        signature: capability.signature.clone(),
        expires_at: capability.expires_at,
    }))
}

/// Render a stored snapshot page.
///
/// Accepts either a capability tuple in the query string or the owner's
/// session. V2 pages have their image references rewritten into signed
/// proxy URLs before serving.
pub async fn view_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<CapabilityQuery>,
) -> Result<Response, ApiError> {
    let snapshot = state.db.snapshots.get(id).await?;
    let (_viewer, capability) = authorize_view(&state, &snapshot, &headers, &query)?;

    let store = snapshot_store(&state)?;
    let html = store.load_html(&snapshot).await?;

    let body = match detect_encoding(&html) {
        SnapshotEncoding::Inline => html,
        SnapshotEncoding::Extracted => rewrite_image_refs(&html, |image_ref| {
            signed_image_url(
                &state.base_url,
                image_ref.owner_id,
                image_ref.bookmark_id,
                image_ref.version,
                &image_ref.digest,
                &capability,
            )
        }),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CONTENT_SECURITY_POLICY, PERMISSIVE_CSP),
            (header::CACHE_CONTROL, "private, max-age=86400"),
        ],
        body,
    )
        .into_response())
}

/// Serve one stored image blob.
///
/// The path carries the owner/bookmark/version triple; the handler
/// re-validates that a snapshot row exists for it before authorizing and
/// serving, rather than trusting a hash-only reference.
pub async fn image_proxy(
    State(state): State<AppState>,
    Path((owner_id, bookmark_id, version, digest)): Path<(Uuid, Uuid, i32, String)>,
    headers: HeaderMap,
    Query(query): Query<CapabilityQuery>,
) -> Result<Response, ApiError> {
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::BadRequest("malformed image digest".to_string()));
    }

    let snapshot = state
        .db
        .snapshots
        .get_by_triple(owner_id, bookmark_id, version)
        .await?
        .ok_or_else(|| ApiError::NotFound("snapshot not found".to_string()))?;

    authorize_view(&state, &snapshot, &headers, &query)?;

    let store = snapshot_store(&state)?;
    let (bytes, mime_type) = store
        .fetch_image(owner_id, bookmark_id, version, &digest)
        .await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_type),
            (header::CACHE_CONTROL, IMMUTABLE_CACHE.to_string()),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_view_url_shape() {
        let snapshot = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let capability = IssuedCapability {
            signature: "ab12".to_string(),
            expires_at: 1_700_000_000,
        };
        let url = signed_view_url("https://vault.example", snapshot, owner, &capability);
        assert!(url.starts_with(&format!(
            "https://vault.example/api/snapshots/{}/view?",
            snapshot
        )));
        assert!(url.contains("signature=ab12"));
        assert!(url.contains("expires_at=1700000000"));
        assert!(url.contains(&format!("owner_id={}", owner)));
        assert!(url.contains("action=view"));
    }

    #[test]
    fn test_signed_image_url_carries_triple_and_capability() {
        let owner = Uuid::new_v4();
        let bookmark = Uuid::new_v4();
        let digest = "c".repeat(64);
        let capability = IssuedCapability {
            signature: "ff00".to_string(),
            expires_at: 42,
        };
        let url = signed_image_url("https://vault.example", owner, bookmark, 7, &digest, &capability);
        assert!(url.contains(&format!(
            "/api/snapshots/image/{}/{}/7/{}",
            owner, bookmark, digest
        )));
        assert!(url.contains("signature=ff00"));
        assert!(url.contains("expires_at=42"));
    }

    #[test]
    fn test_capability_query_presence() {
        let empty = CapabilityQuery::default();
        assert!(!empty.is_present());

        let with_sig = CapabilityQuery {
            signature: Some("aa".to_string()),
            ..Default::default()
        };
        assert!(with_sig.is_present());
    }

    #[test]
    fn test_permissive_csp_allows_inline_content() {
        assert!(PERMISSIVE_CSP.contains("'unsafe-inline'"));
        assert!(PERMISSIVE_CSP.contains("data:"));
        assert!(PERMISSIVE_CSP.contains("img-src *"));
    }
}
