//! Structured logging schema and field name constants for markvault.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (scan rows, image batches) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job → sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "storage", "jobs", "crypto"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "snapshot_store", "retention", "quota", "pool", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create_snapshot", "verify_and_fix", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owner UUID the operation acts for.
pub const OWNER_ID: &str = "owner_id";

/// Bookmark UUID being operated on.
pub const BOOKMARK_ID: &str = "bookmark_id";

/// Snapshot UUID being operated on.
pub const SNAPSHOT_ID: &str = "snapshot_id";

/// Image content hash (blake3-prefixed).
pub const IMAGE_HASH: &str = "image_hash";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows/items returned or affected.
pub const RESULT_COUNT: &str = "result_count";

/// Byte size of a payload, blob, or reclaimed storage.
pub const BYTES: &str = "bytes";

/// Snapshot version number.
pub const VERSION: &str = "version";

// ─── Quota fields ──────────────────────────────────────────────────────────

/// Aggregate stored bytes at admission time.
pub const QUOTA_USED: &str = "quota_used";

/// Configured quota ceiling in bytes.
pub const QUOTA_LIMIT: &str = "quota_limit";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
