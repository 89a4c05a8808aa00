//! markvault-api library surface: shared state, error mapping, and the
//! HTTP handlers.

pub mod handlers;

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use markvault_crypto::{CapabilityError, CapabilitySigner};
use markvault_db::Database;

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Capability signer for view/image signed URLs.
    pub signer: Arc<CapabilitySigner>,
    /// Externally reachable base URL, used when building signed URLs.
    pub base_url: String,
    /// Validity window for issued view capabilities, in seconds.
    pub view_ttl_secs: i64,
}

// =============================================================================
// STANDARD RESPONSE TYPES
// =============================================================================

/// Standardized pagination metadata for list responses.
#[derive(Serialize, Deserialize, Debug)]
pub struct PaginationMeta {
    /// Total number of items matching the query (across all pages)
    pub total: usize,
    /// Maximum number of items per page (request parameter)
    pub limit: usize,
    /// Number of items skipped (request parameter)
    pub offset: usize,
    /// True if more items are available after this page
    pub has_more: bool,
}

/// Standardized list response wrapper with pagination metadata.
#[derive(Serialize, Deserialize, Debug)]
pub struct ListResponse<T> {
    /// The list of items for the current page
    pub data: Vec<T>,
    /// Pagination metadata
    pub pagination: PaginationMeta,
}

impl<T: Serialize> ListResponse<T> {
    /// Create a new paginated list response.
    ///
    /// Automatically calculates `has_more` based on offset, data length,
    /// and total count.
    pub fn new(data: Vec<T>, total: usize, limit: usize, offset: usize) -> Self {
        let has_more = offset + data.len() < total;
        Self {
            data,
            pagination: PaginationMeta {
                total,
                limit,
                offset,
                has_more,
            },
        }
    }
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Header carrying the authenticated principal, set by the session layer
/// in front of this service.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Extract the authenticated owner from request headers.
pub fn require_owner(headers: &axum::http::HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Uuid>().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing or invalid owner header".to_string()))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

/// HTTP-facing error type.
#[derive(Debug)]
pub enum ApiError {
    Database(markvault_core::Error),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// Storage quota denial; carries usage for the client's error display.
    QuotaExceeded { used_bytes: i64, limit_bytes: i64 },
}

impl From<markvault_core::Error> for ApiError {
    fn from(err: markvault_core::Error) -> Self {
        match err {
            markvault_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            markvault_core::Error::BookmarkNotFound(id) => {
                ApiError::NotFound(format!("Bookmark {} not found", id))
            }
            markvault_core::Error::SnapshotNotFound(id) => {
                ApiError::NotFound(format!("Snapshot {} not found", id))
            }
            markvault_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            markvault_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            markvault_core::Error::Forbidden(msg) => ApiError::Forbidden(msg),
            markvault_core::Error::QuotaExceeded {
                used_bytes,
                limit_bytes,
            } => ApiError::QuotaExceeded {
                used_bytes,
                limit_bytes,
            },
            other => ApiError::Database(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Database(markvault_core::Error::Serialization(e.to_string()))
    }
}

impl From<CapabilityError> for ApiError {
    fn from(err: CapabilityError) -> Self {
        // Expiry and tampering surface distinctly to aid client
        // diagnostics; neither reveals anything about the secret.
        match err {
            CapabilityError::Expired(_) => ApiError::Unauthorized("capability expired".to_string()),
            CapabilityError::InvalidSignature => {
                ApiError::Unauthorized("invalid signature".to_string())
            }
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Database(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": err.to_string() }),
            ),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, serde_json::json!({ "error": msg }))
            }
            ApiError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, serde_json::json!({ "error": msg }))
            }
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg }))
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, serde_json::json!({ "error": msg }))
            }
            ApiError::QuotaExceeded {
                used_bytes,
                limit_bytes,
            } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                serde_json::json!({
                    "error": "storage quota exceeded",
                    "used": used_bytes,
                    "limit": limit_bytes,
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
