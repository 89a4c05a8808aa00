//! Centralized default constants for the markvault system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their
//! own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// SNAPSHOT STORAGE
// =============================================================================

/// Hard per-snapshot HTML size ceiling in bytes (10 MiB). Applies before
/// any quota accounting; a single pathological capture cannot blow past it.
pub const MAX_SNAPSHOT_BYTES: i64 = 10 * 1024 * 1024;

/// System-default number of snapshot versions kept per bookmark.
pub const KEEP_COUNT_DEFAULT: i32 = 10;

/// Keep-count sentinel meaning "retain every version".
pub const KEEP_COUNT_UNLIMITED: i32 = -1;

/// Minimum age before an unreferenced image blob is collectable. Guards
/// in-flight writes that uploaded images but have not committed metadata.
pub const ORPHAN_MIN_AGE_HOURS: i32 = 24;

/// Stored MIME type for snapshot HTML bodies.
pub const SNAPSHOT_MIME_TYPE: &str = "text/html";

// =============================================================================
// CAPABILITIES (signed URLs)
// =============================================================================

/// Default validity window for issued view capabilities (24 hours).
pub const VIEW_TTL_SECS: i64 = 86_400;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for snapshot listing endpoints.
pub const PAGE_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Page size used by full-table maintenance scans (orphan repair).
pub const SCAN_BATCH_SIZE: i64 = 500;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

/// Maximum request body size in bytes (64 MiB — a full V2 capture with
/// base64 images comfortably fits; anything larger is rejected up front).
pub const MAX_BODY_SIZE_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum retry count for failed maintenance jobs.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Default polling interval for the maintenance worker (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default maximum concurrent maintenance jobs. Retention work is
/// I/O-light; two slots keep prune latency low without pool pressure.
pub const JOB_MAX_CONCURRENT: usize = 2;

/// Default interval between periodic orphan-repair enqueues (6 hours).
pub const ORPHAN_SCAN_INTERVAL_SECS: u64 = 6 * 3600;
