//! Snapshot ingest and read pipeline.
//!
//! The writer runs hash → dedup short-circuit → per-image dedup/quota →
//! placeholder rewrite → quota admission → object write → one metadata
//! transaction → async retention follow-up. Only the metadata transaction
//! is atomic; everything before it can leave orphans that the repair pass
//! reclaims, and per-image failures are tolerated by design.
//!
//! Two wire encodings flow through here:
//! - **V1**: the capture client inlined every image as a data URI. The
//!   stored HTML is self-contained and no ledger rows exist.
//! - **V2**: images arrive extracted, the HTML carries
//!   `markvault-img://{hash}` placeholders, and the writer rewrites them
//!   into proxy paths carrying the owner/bookmark/version triple.
//!
//! Old rows have no format column; the reader tells the encodings apart by
//! detecting the proxy-path pattern in the stored HTML.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use base64::Engine;
use chrono::Utc;
use regex::{Captures, Regex};
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use markvault_core::{
    defaults, CaptureImage, CapturePayload, Error, JobRepository, JobType, Result, Snapshot,
    SnapshotConfig, SnapshotStatus, SnapshotWriteOutcome,
};

use crate::bookmarks::PgBookmarkRepository;
use crate::image_blobs::PgImageBlobRepository;
use crate::jobs::PgSnapshotJobRepository;
use crate::object_store::{
    compute_content_hash, digest_hex, image_key_variants, image_storage_key,
    snapshot_storage_key, StorageBackend,
};
use crate::quota::QuotaEnforcer;
use crate::snapshots::PgSnapshotRepository;

/// Placeholder scheme the capture script embeds for extracted images.
pub const CAPTURE_PLACEHOLDER_SCHEME: &str = "markvault-img://";

/// Path prefix of rewritten V2 image references.
pub const IMAGE_PROXY_PREFIX: &str = "/api/snapshots/image";

/// Wire encoding of a stored snapshot, derived from its HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEncoding {
    /// Images inlined by the capturing client; page is self-contained.
    Inline,
    /// Images stored separately; HTML carries proxy-path references.
    Extracted,
}

/// A parsed V2 image reference: the triple needed to re-derive ownership
/// plus the content digest of the blob itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub owner_id: Uuid,
    pub bookmark_id: Uuid,
    pub version: i32,
    /// Raw 64-char hex digest (no algorithm prefix).
    pub digest: String,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"markvault-img://([^\s"'<>]+)"#).expect("static regex"))
}

fn proxy_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"/api/snapshots/image/([0-9a-fA-F-]{36})/([0-9a-fA-F-]{36})/(\d+)/([0-9a-f]{64})",
        )
        .expect("static regex")
    })
}

/// Build the proxy path for one stored image.
///
/// The path carries owner/bookmark/version — never the storage key — so
/// the proxy can re-derive ownership before serving.
pub fn proxy_image_path(owner_id: Uuid, bookmark_id: Uuid, version: i32, digest: &str) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        IMAGE_PROXY_PREFIX, owner_id, bookmark_id, version, digest
    )
}

/// Replace capture placeholders using `resolve`, which maps a
/// client-claimed hash to a replacement reference. Unresolved placeholders
/// (images skipped under quota) are left untouched.
pub fn rewrite_capture_placeholders<F>(html: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            let claimed = &caps[1];
            resolve(claimed).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Detect the wire encoding of stored HTML.
pub fn detect_encoding(html: &str) -> SnapshotEncoding {
    if proxy_ref_regex().is_match(html) {
        SnapshotEncoding::Extracted
    } else {
        SnapshotEncoding::Inline
    }
}

/// Parse every V2 image reference out of stored HTML.
pub fn image_refs(html: &str) -> Vec<ImageRef> {
    proxy_ref_regex()
        .captures_iter(html)
        .filter_map(|caps| {
            Some(ImageRef {
                owner_id: caps[1].parse().ok()?,
                bookmark_id: caps[2].parse().ok()?,
                version: caps[3].parse().ok()?,
                digest: caps[4].to_string(),
            })
        })
        .collect()
}

/// Rewrite every V2 image reference through `rewrite` — the reader uses
/// this to attach capability query strings for self-contained viewing.
pub fn rewrite_image_refs<F>(html: &str, rewrite: F) -> String
where
    F: Fn(&ImageRef) -> String,
{
    proxy_ref_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            match (
                caps[1].parse::<Uuid>(),
                caps[2].parse::<Uuid>(),
                caps[3].parse::<i32>(),
            ) {
                (Ok(owner_id), Ok(bookmark_id), Ok(version)) => rewrite(&ImageRef {
                    owner_id,
                    bookmark_id,
                    version,
                    digest: caps[4].to_string(),
                }),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Outcome of the per-image ingest loop.
struct ImageIngest {
    /// claimed hash → stored digest (hex) for placeholder rewriting.
    resolved: HashMap<String, String>,
    /// Prefixed hashes to link from the new snapshot row.
    linked_hashes: Vec<String>,
    /// Bytes newly written to the object store this call.
    uploaded_bytes: i64,
}

/// The snapshot ingest pipeline and blob-level read path.
pub struct SnapshotStore {
    pool: PgPool,
    backend: Arc<dyn StorageBackend>,
    config: SnapshotConfig,
    snapshots: PgSnapshotRepository,
    images: PgImageBlobRepository,
    bookmarks: PgBookmarkRepository,
    quota: QuotaEnforcer,
    jobs: PgSnapshotJobRepository,
}

impl SnapshotStore {
    /// Create a snapshot store over a pool and storage backend.
    pub fn new(pool: PgPool, backend: Arc<dyn StorageBackend>, config: SnapshotConfig) -> Self {
        let quota = QuotaEnforcer::new(pool.clone(), config.quota_bytes);
        Self {
            snapshots: PgSnapshotRepository::new(pool.clone()),
            images: PgImageBlobRepository::new(pool.clone()),
            bookmarks: PgBookmarkRepository::new(pool.clone()),
            jobs: PgSnapshotJobRepository::new(pool.clone()),
            quota,
            backend,
            config,
            pool,
        }
    }

    /// The quota enforcer this store admits writes through.
    pub fn quota(&self) -> &QuotaEnforcer {
        &self.quota
    }

    /// The injected configuration.
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Ingest one capture for a bookmark.
    ///
    /// Returns [`SnapshotWriteOutcome::Unchanged`] when the capture is
    /// byte-identical to the current latest version and `force` is unset.
    #[instrument(skip(self, payload), fields(owner_id = %owner_id, bookmark_id = %bookmark_id))]
    pub async fn create_snapshot(
        &self,
        owner_id: Uuid,
        bookmark_id: Uuid,
        payload: &CapturePayload,
    ) -> Result<SnapshotWriteOutcome> {
        let start = Instant::now();
        self.bookmarks.ensure_owned(bookmark_id, owner_id).await?;

        let html_bytes = payload.html.as_bytes();
        if html_bytes.is_empty() {
            return Err(Error::InvalidInput("html must not be empty".into()));
        }
        // Hard per-snapshot ceiling, independent of the global quota.
        if html_bytes.len() as i64 > self.config.max_snapshot_bytes {
            return Err(Error::InvalidInput(format!(
                "snapshot exceeds size limit of {} bytes",
                self.config.max_snapshot_bytes
            )));
        }

        let content_hash = compute_content_hash(html_bytes);

        if !payload.force {
            if let Some(latest) = self.snapshots.latest_for_bookmark(bookmark_id).await? {
                if latest.content_hash == content_hash {
                    debug!(
                        subsystem = "db",
                        component = "snapshot_store",
                        op = "create_snapshot",
                        snapshot_id = %latest.id,
                        "Capture identical to latest version, skipping write"
                    );
                    return Ok(SnapshotWriteOutcome::Unchanged {
                        id: latest.id,
                        version: latest.version,
                        content_hash: latest.content_hash,
                    });
                }
            }
        }

        let version = self.snapshots.max_version(bookmark_id).await? + 1;

        let ingest = self
            .ingest_images(owner_id, bookmark_id, payload.images.as_deref().unwrap_or(&[]))
            .await?;

        // Placeholders whose image was deduplicated or uploaded now point
        // at the proxy path; skipped images keep their placeholder.
        let html = rewrite_capture_placeholders(&payload.html, |claimed| {
            ingest
                .resolved
                .get(claimed)
                .map(|digest| proxy_image_path(owner_id, bookmark_id, version, digest))
        });

        let decision = self
            .quota
            .check(html.len() as i64 + ingest.uploaded_bytes)
            .await?;
        if !decision.allowed {
            // Images uploaded above are leaked as orphans here; the repair
            // pass reclaims them once they pass the minimum age.
            return Err(Error::QuotaExceeded {
                used_bytes: decision.used_bytes,
                limit_bytes: decision.limit_bytes.unwrap_or(0),
            });
        }

        let created_at = Utc::now();
        let storage_key = snapshot_storage_key(&owner_id, &bookmark_id, created_at, version);
        self.backend.write(&storage_key, html.as_bytes()).await?;

        let snapshot = Snapshot {
            id: Uuid::now_v7(),
            bookmark_id,
            owner_id,
            version,
            is_latest: true,
            content_hash,
            storage_key,
            storage_size: html.len() as i64,
            mime_type: defaults::SNAPSHOT_MIME_TYPE.to_string(),
            title: payload.title.clone(),
            source_url: payload.source_url.clone(),
            status: SnapshotStatus::Completed,
            created_at,
        };

        // The one atomic unit: demote old latest, insert the new row, link
        // images, bump the counter. A failure here strands the object
        // written above for the repair pass.
        let mut tx = self.pool.begin().await?;
        self.snapshots.insert_version_tx(&mut tx, &snapshot).await?;
        self.snapshots
            .link_images_tx(&mut tx, snapshot.id, &ingest.linked_hashes)
            .await?;
        self.bookmarks
            .adjust_snapshot_count_tx(&mut tx, bookmark_id, 1)
            .await?;
        tx.commit().await?;

        // Async retention follow-up. Queue failure is not a write failure.
        if let Err(e) = self
            .jobs
            .queue_deduplicated(
                Some(bookmark_id),
                JobType::RetentionPrune,
                JobType::RetentionPrune.default_priority(),
                None,
            )
            .await
        {
            warn!(
                subsystem = "db",
                component = "snapshot_store",
                bookmark_id = %bookmark_id,
                error = %e,
                "Failed to queue retention job"
            );
        }

        info!(
            subsystem = "db",
            component = "snapshot_store",
            op = "create_snapshot",
            snapshot_id = %snapshot.id,
            version = snapshot.version,
            bytes = snapshot.storage_size,
            result_count = ingest.linked_hashes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Snapshot stored"
        );

        Ok(SnapshotWriteOutcome::Created(snapshot))
    }

    /// Deduplicate, quota-check, and upload a capture's images.
    ///
    /// Each image is independent: a quota denial or bad payload skips that
    /// image with a warning and the capture proceeds without it.
    async fn ingest_images(
        &self,
        owner_id: Uuid,
        bookmark_id: Uuid,
        images: &[CaptureImage],
    ) -> Result<ImageIngest> {
        let mut ingest = ImageIngest {
            resolved: HashMap::new(),
            linked_hashes: Vec::new(),
            uploaded_bytes: 0,
        };

        for image in images {
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&image.data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        subsystem = "db",
                        component = "snapshot_store",
                        image_hash = %image.hash,
                        error = %e,
                        "Skipping image with undecodable payload"
                    );
                    continue;
                }
            };

            // The claimed hash only binds the payload entry to its
            // placeholder; the digest used for dedup is recomputed from
            // the bytes so a forged hash cannot poison the ledger.
            let hash = compute_content_hash(&bytes);

            if let Some(detected) = infer::get(&bytes) {
                if detected.mime_type() != image.mime_type {
                    debug!(
                        subsystem = "db",
                        component = "snapshot_store",
                        image_hash = %hash,
                        declared = %image.mime_type,
                        detected = %detected.mime_type(),
                        "Declared image MIME type disagrees with magic bytes"
                    );
                }
            }

            if let Some(existing) = self.images.find_by_hash(&hash).await? {
                ingest
                    .resolved
                    .insert(image.hash.clone(), digest_hex(&existing.hash).to_string());
                ingest.linked_hashes.push(existing.hash);
                continue;
            }

            let decision = self.quota.check(bytes.len() as i64).await?;
            if !decision.allowed {
                warn!(
                    subsystem = "db",
                    component = "snapshot_store",
                    image_hash = %hash,
                    bytes = bytes.len(),
                    quota_used = decision.used_bytes,
                    "Skipping image: quota denied"
                );
                continue;
            }

            let storage_key = image_storage_key(&hash);
            self.backend.write(&storage_key, &bytes).await?;
            self.images
                .insert(
                    &hash,
                    &storage_key,
                    bytes.len() as i64,
                    &image.mime_type,
                    Some(owner_id),
                    Some(bookmark_id),
                )
                .await?;

            ingest.uploaded_bytes += bytes.len() as i64;
            ingest
                .resolved
                .insert(image.hash.clone(), digest_hex(&hash).to_string());
            ingest.linked_hashes.push(hash);
        }

        Ok(ingest)
    }

    /// Load the stored HTML body of a snapshot.
    pub async fn load_html(&self, snapshot: &Snapshot) -> Result<String> {
        let bytes = self.backend.read(&snapshot.storage_key).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Serve one stored image by its proxy triple and digest.
    ///
    /// Re-validates that the triple corresponds to an existing snapshot
    /// row before touching the ledger, then resolves the blob through the
    /// ordered key-variant list for backward compatibility with earlier
    /// key layouts.
    pub async fn fetch_image(
        &self,
        owner_id: Uuid,
        bookmark_id: Uuid,
        version: i32,
        digest: &str,
    ) -> Result<(Vec<u8>, String)> {
        let snapshot = self
            .snapshots
            .get_by_triple(owner_id, bookmark_id, version)
            .await?
            .ok_or_else(|| Error::NotFound("snapshot not found".into()))?;

        let hash = format!("blake3:{}", digest);
        let blob = self
            .images
            .find_by_hash(&hash)
            .await?
            .ok_or_else(|| Error::NotFound("image not found".into()))?;

        for key in image_key_variants(&hash, &blob.mime_type) {
            if self.backend.exists(&key).await? {
                let bytes = self.backend.read(&key).await?;
                debug!(
                    subsystem = "db",
                    component = "snapshot_store",
                    op = "fetch_image",
                    snapshot_id = %snapshot.id,
                    image_hash = %hash,
                    storage_key = %key,
                    "Image blob resolved"
                );
                return Ok((bytes, blob.mime_type));
            }
        }

        Err(Error::NotFound("image blob missing from storage".into()))
    }

    /// The metadata repository backing this store.
    pub fn snapshots(&self) -> &PgSnapshotRepository {
        &self.snapshots
    }
}
