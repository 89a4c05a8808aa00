//! Handlers executing retention and repair work claimed from the queue.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use markvault_core::JobType;
use markvault_db::RetentionManager;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Applies the keep-count policy to the job's bookmark.
///
/// The writer queues one of these after every successful snapshot commit;
/// an optional `keep_count` in the payload overrides the resolved policy
/// (used by the admin cleanup endpoint).
pub struct RetentionPruneHandler {
    retention: Arc<RetentionManager>,
}

impl RetentionPruneHandler {
    /// Create a handler over a retention manager.
    pub fn new(retention: Arc<RetentionManager>) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl JobHandler for RetentionPruneHandler {
    fn job_type(&self) -> JobType {
        JobType::RetentionPrune
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let keep_override = ctx
            .payload()
            .and_then(|p| p.get("keep_count"))
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let result = match ctx.bookmark_id() {
            Some(bookmark_id) => self.retention.prune_bookmark(bookmark_id, keep_override).await,
            None => self.retention.prune_all(keep_override).await,
        };

        match result {
            Ok(report) => {
                info!(
                    subsystem = "jobs",
                    component = "retention_prune",
                    job_id = %ctx.job.id,
                    result_count = report.snapshots_deleted,
                    bytes = report.bytes_reclaimed,
                    "Retention prune complete"
                );
                JobResult::Success(serde_json::to_value(report).ok())
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

/// Runs the full orphan-repair scan.
///
/// Queued periodically by the worker; also queueable on demand through
/// the admin cleanup endpoint.
pub struct OrphanRepairHandler {
    retention: Arc<RetentionManager>,
}

impl OrphanRepairHandler {
    /// Create a handler over a retention manager.
    pub fn new(retention: Arc<RetentionManager>) -> Self {
        Self { retention }
    }
}

#[async_trait]
impl JobHandler for OrphanRepairHandler {
    fn job_type(&self) -> JobType {
        JobType::OrphanRepair
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        match self.retention.verify_and_fix().await {
            Ok(report) => {
                info!(
                    subsystem = "jobs",
                    component = "orphan_repair",
                    job_id = %ctx.job.id,
                    result_count = report.orphans_repaired,
                    bytes = report.bytes_reclaimed,
                    "Orphan repair complete"
                );
                JobResult::Success(serde_json::to_value(report).ok())
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
