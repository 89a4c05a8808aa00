//! Core traits for markvault abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Job, JobType};

// =============================================================================
// MAINTENANCE JOB QUEUE
// =============================================================================

/// Queue statistics snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Persistent queue for retention and repair jobs.
///
/// The writer enqueues, the worker claims; claims must be safe under
/// concurrent workers (the Postgres implementation uses
/// `FOR UPDATE SKIP LOCKED`).
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a job unconditionally.
    async fn queue(
        &self,
        bookmark_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid>;

    /// Queue a job unless an identical pending job already exists for the
    /// same bookmark and type. Returns `None` when deduplicated away.
    async fn queue_deduplicated(
        &self,
        bookmark_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Option<Uuid>>;

    /// Claim the highest-priority pending job, marking it running.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Mark a job completed.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Mark a job failed. Re-queues as pending while retries remain.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    /// Current queue statistics.
    async fn queue_stats(&self) -> Result<QueueStats>;
}
