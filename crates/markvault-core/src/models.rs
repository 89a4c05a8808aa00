//! Core data models for markvault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// One versioned, stored capture of a bookmark's page content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub bookmark_id: Uuid,
    pub owner_id: Uuid,
    /// Per-bookmark position in history, starting at 1. Never renumbered.
    pub version: i32,
    /// At most one row per bookmark carries this flag.
    pub is_latest: bool,
    /// BLAKE3 digest of the HTML payload, `blake3:{64-hex}`.
    pub content_hash: String,
    pub storage_key: String,
    pub storage_size: i64,
    pub mime_type: String,
    pub title: Option<String>,
    pub source_url: Option<String>,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
}

/// Persisted snapshot state.
///
/// `completed` is the only steady state the writer ever produces: a failed
/// write leaves no row at all rather than a partial one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    #[default]
    Completed,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid snapshot status: {}", s)),
        }
    }
}

/// Listing row for a bookmark's snapshot history (no storage key exposed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub version: i32,
    pub is_latest: bool,
    pub content_hash: String,
    pub file_size: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id,
            version: s.version,
            is_latest: s.is_latest,
            content_hash: s.content_hash.clone(),
            file_size: s.storage_size,
            title: s.title.clone(),
            created_at: s.created_at,
        }
    }
}

// =============================================================================
// IMAGE DEDUP LEDGER
// =============================================================================

/// A stored image blob, shared by every snapshot whose page embeds the same
/// bytes. Keyed by content hash; global across owners; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlob {
    pub hash: String,
    pub storage_key: String,
    pub size_bytes: i64,
    pub mime_type: String,
    /// Owner/bookmark that first introduced the hash (informational only).
    pub first_owner_id: Option<Uuid>,
    pub first_bookmark_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// CAPTURE PAYLOAD (wire input from the browser extension)
// =============================================================================

/// Page capture submitted by the browser-side capture script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePayload {
    pub html: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Extracted images (V2 encoding). Absent for V1 captures, where the
    /// client inlines images as data URIs before submitting.
    #[serde(default)]
    pub images: Option<Vec<CaptureImage>>,
    /// Skip the unchanged-content short-circuit and always write a version.
    #[serde(default)]
    pub force: bool,
}

/// One extracted image in a V2 capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureImage {
    /// Client-claimed content hash. Binds this entry to its placeholder in
    /// the HTML; the server recomputes the digest used for deduplication.
    pub hash: String,
    /// Base64-encoded image bytes.
    pub data: String,
    pub mime_type: String,
}

/// Outcome of a create-snapshot call.
#[derive(Debug, Clone)]
pub enum SnapshotWriteOutcome {
    /// A new version was written.
    Created(Snapshot),
    /// The capture was byte-identical to the current latest version; nothing
    /// was written.
    Unchanged {
        id: Uuid,
        version: i32,
        content_hash: String,
    },
}

// =============================================================================
// QUOTA
// =============================================================================

/// Result of a quota admission check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Fresh aggregate of all stored snapshot and image bytes.
    pub used_bytes: i64,
    /// Configured ceiling; `None` means unlimited.
    pub limit_bytes: Option<i64>,
}

// =============================================================================
// RETENTION / CLEANUP
// =============================================================================

/// Summary of a retention or repair pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub snapshots_deleted: i64,
    pub images_deleted: i64,
    pub bytes_reclaimed: i64,
    /// Metadata rows removed because their backing blob was missing.
    pub orphans_repaired: i64,
    /// Bookmarks whose latest pointer was re-promoted after a repair.
    pub latest_promoted: i64,
}

impl CleanupReport {
    /// Fold another report into this one.
    pub fn absorb(&mut self, other: CleanupReport) {
        self.snapshots_deleted += other.snapshots_deleted;
        self.images_deleted += other.images_deleted;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.orphans_repaired += other.orphans_repaired;
        self.latest_promoted += other.latest_promoted;
    }
}

/// Constructor-injected snapshot subsystem configuration.
///
/// Deliberately not a module-level global so tests can instantiate
/// independent instances per case.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Hard per-snapshot HTML size ceiling, independent of the quota.
    pub max_snapshot_bytes: i64,
    /// Global storage ceiling across snapshots and image blobs.
    /// `None` (or a non-positive configured value) means unlimited.
    pub quota_bytes: Option<i64>,
    /// System-default keep-count; `-1` keeps every version.
    pub keep_count_default: i32,
    /// Unreferenced image blobs younger than this are left alone by the
    /// orphan scan, protecting uploads from in-flight writers.
    pub orphan_min_age_hours: i32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshot_bytes: crate::defaults::MAX_SNAPSHOT_BYTES,
            quota_bytes: None,
            keep_count_default: crate::defaults::KEEP_COUNT_DEFAULT,
            orphan_min_age_hours: crate::defaults::ORPHAN_MIN_AGE_HOURS,
        }
    }
}

impl SnapshotConfig {
    /// Normalize a raw configured quota: absent, zero, or negative means
    /// unlimited.
    pub fn with_quota(mut self, raw: Option<i64>) -> Self {
        self.quota_bytes = raw.filter(|v| *v > 0);
        self
    }
}

// =============================================================================
// MAINTENANCE JOBS
// =============================================================================

/// Background maintenance job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Prune old versions of one bookmark per the retention policy.
    RetentionPrune,
    /// Full scan: repair metadata rows with missing blobs, collect
    /// unreferenced image blobs.
    OrphanRepair,
}

impl JobType {
    /// Default queue priority for this job type (higher runs first).
    pub fn default_priority(&self) -> i32 {
        match self {
            JobType::RetentionPrune => 5,
            JobType::OrphanRepair => 1,
        }
    }
}

/// Lifecycle state of a maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// A queued maintenance job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub bookmark_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_snapshot_status_roundtrip() {
        assert_eq!(SnapshotStatus::Completed.to_string(), "completed");
        assert_eq!(
            SnapshotStatus::from_str("completed").unwrap(),
            SnapshotStatus::Completed
        );
        assert!(SnapshotStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_capture_payload_defaults() {
        let json = r#"{"html":"<html></html>"}"#;
        let payload: CapturePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.html, "<html></html>");
        assert!(payload.title.is_none());
        assert!(payload.images.is_none());
        assert!(!payload.force);
    }

    #[test]
    fn test_capture_payload_with_images() {
        let json = r#"{
            "html": "<img src=\"markvault-img://abc\">",
            "title": "Example",
            "source_url": "https://example.com",
            "images": [{"hash": "abc", "data": "aGVsbG8=", "mime_type": "image/png"}],
            "force": true
        }"#;
        let payload: CapturePayload = serde_json::from_str(json).unwrap();
        assert!(payload.force);
        let images = payload.images.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/png");
    }

    #[test]
    fn test_snapshot_config_with_quota_normalizes_non_positive() {
        assert_eq!(
            SnapshotConfig::default().with_quota(Some(1000)).quota_bytes,
            Some(1000)
        );
        assert_eq!(SnapshotConfig::default().with_quota(Some(0)).quota_bytes, None);
        assert_eq!(SnapshotConfig::default().with_quota(Some(-1)).quota_bytes, None);
        assert_eq!(SnapshotConfig::default().with_quota(None).quota_bytes, None);
    }

    #[test]
    fn test_cleanup_report_absorb() {
        let mut a = CleanupReport {
            snapshots_deleted: 1,
            images_deleted: 2,
            bytes_reclaimed: 300,
            orphans_repaired: 0,
            latest_promoted: 0,
        };
        a.absorb(CleanupReport {
            snapshots_deleted: 4,
            images_deleted: 0,
            bytes_reclaimed: 100,
            orphans_repaired: 2,
            latest_promoted: 1,
        });
        assert_eq!(a.snapshots_deleted, 5);
        assert_eq!(a.bytes_reclaimed, 400);
        assert_eq!(a.latest_promoted, 1);
    }

    #[test]
    fn test_job_type_priorities_order_prune_first() {
        assert!(JobType::RetentionPrune.default_priority() > JobType::OrphanRepair.default_priority());
    }

    #[test]
    fn test_snapshot_summary_from_snapshot() {
        let snap = Snapshot {
            id: Uuid::new_v4(),
            bookmark_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            version: 3,
            is_latest: true,
            content_hash: "blake3:ab".into(),
            storage_key: "snapshots/x".into(),
            storage_size: 1024,
            mime_type: "text/html".into(),
            title: Some("A page".into()),
            source_url: None,
            status: SnapshotStatus::Completed,
            created_at: Utc::now(),
        };
        let summary = SnapshotSummary::from(&snap);
        assert_eq!(summary.version, 3);
        assert_eq!(summary.file_size, 1024);
        assert!(summary.is_latest);
    }
}
