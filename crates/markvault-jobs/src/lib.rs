//! # markvault-jobs
//!
//! Background maintenance for markvault snapshots.
//!
//! This crate provides:
//! - Priority-based claiming from the persisted maintenance queue
//! - Concurrent job execution with graceful shutdown
//! - Retention-prune and orphan-repair handlers
//! - Periodic enqueueing of the orphan-repair scan
//!
//! ## Example
//!
//! ```ignore
//! use markvault_jobs::{JobWorker, OrphanRepairHandler, RetentionPruneHandler, WorkerConfig};
//! use markvault_db::Database;
//!
//! let db = Database::connect("postgres://...").await?
//!     .with_snapshot_storage("/var/markvault/blobs", config);
//!
//! let worker = JobWorker::new(db.clone(), WorkerConfig::from_env());
//! let retention = db.retention.clone().unwrap();
//! worker.register_handler(RetentionPruneHandler::new(retention.clone())).await;
//! worker.register_handler(OrphanRepairHandler::new(retention)).await;
//!
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod retention_handler;
pub mod worker;

// Re-export core types
pub use markvault_core::*;

// Re-export job types
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use retention_handler::{OrphanRepairHandler, RetentionPruneHandler};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
