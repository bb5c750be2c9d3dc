//! Report lifecycle engine: validates drafts, authorizes and applies status
//! transitions, and coordinates image uploads with the object storage port.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use shared::{
    domain::{
        Coordinates, DraftReport, ImageAttachment, Report, ReportId, ReportStatus, UserProfile,
        COUNCIL_ROLE, MAX_REPORT_IMAGES,
    },
    error::{AppError, Result},
};
use storage::{ReportStore, StatusPatch};

const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSIENT_RETRY_ATTEMPTS: u32 = 3;
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Binary upload contract for the external object storage service. The core
/// only ever records the metadata the service hands back.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ImageAttachment>;
}

pub struct MissingObjectStore;

#[async_trait]
impl ObjectStore for MissingObjectStore {
    async fn upload(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<ImageAttachment> {
        Err(AppError::unavailable(format!(
            "object storage is not configured; cannot upload '{key}'"
        )))
    }
}

/// One image a citizen picked in the report form, prior to upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Object-storage key for a report image.
pub fn storage_key(report_id: &ReportId, filename: &str) -> String {
    format!("reports/{report_id}/images/{filename}")
}

/// Checks everything `create` requires before any I/O happens: non-empty
/// title and description, coordinates present and in range. Category and
/// severity are well-formed by construction.
pub fn validate_draft(draft: &DraftReport) -> Result<Coordinates> {
    if draft.title.trim().is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    if draft.description.trim().is_empty() {
        return Err(AppError::validation("description must not be empty"));
    }
    let coords = draft
        .coords
        .ok_or_else(|| AppError::validation("a location is required to submit a report"))?;
    Coordinates::new(coords.latitude, coords.longitude)
}

pub struct LifecycleEngine {
    store: Arc<dyn ReportStore>,
    objects: Arc<dyn ObjectStore>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self {
            store,
            objects: Arc::new(MissingObjectStore),
        }
    }

    pub fn with_object_store(store: Arc<dyn ReportStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    pub fn store(&self) -> Arc<dyn ReportStore> {
        self.store.clone()
    }

    /// Validates and persists a citizen draft. The store assigns the id and
    /// server timestamps; the returned report is in status `Submitted`.
    pub async fn submit(&self, draft: &DraftReport, submitter: &UserProfile) -> Result<Report> {
        validate_draft(draft)?;
        let report = self.store.create(draft, &submitter.uid).await?;
        info!(report_id = %report.id, user_id = %submitter.uid, "report submitted");
        Ok(report)
    }

    /// Uploads each image independently and attaches whatever succeeded.
    /// A failed upload is logged and skipped so one bad file never blocks
    /// the rest; the report legitimately keeps fewer images than intended.
    pub async fn attach_images(
        &self,
        id: &ReportId,
        uploads: Vec<ImageUpload>,
    ) -> Result<Vec<ImageAttachment>> {
        if uploads.len() > MAX_REPORT_IMAGES {
            return Err(AppError::validation(format!(
                "at most {MAX_REPORT_IMAGES} images per report"
            )));
        }

        let mut attached = Vec::new();
        for upload in uploads {
            let key = storage_key(id, &upload.filename);
            let result = timeout(
                STORE_CALL_TIMEOUT,
                self.objects
                    .upload(&key, upload.bytes, &upload.content_type),
            )
            .await;
            match result {
                Ok(Ok(metadata)) => attached.push(metadata),
                Ok(Err(err)) => {
                    warn!(error = %err, key, "image upload failed; continuing with remaining images");
                }
                Err(_) => {
                    warn!(key, "image upload timed out; continuing with remaining images");
                }
            }
        }

        if !attached.is_empty() {
            self.store.attach_images(id, &attached).await?;
        }
        Ok(attached)
    }

    /// Applies a status transition on behalf of a council user and returns
    /// the post-transition report.
    ///
    /// Requesting the state the report already occupies is a safe retry: it
    /// refreshes `updated_at` and changes nothing else.
    pub async fn transition(
        &self,
        id: &ReportId,
        target: ReportStatus,
        actor: &UserProfile,
    ) -> Result<Report> {
        if !actor.has_role(COUNCIL_ROLE) {
            return Err(AppError::permission_denied(format!(
                "user {} lacks the '{COUNCIL_ROLE}' role",
                actor.uid
            )));
        }

        let current = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("report", id))?;

        let now = Utc::now();
        let patch = if current.status == target {
            StatusPatch {
                status: target,
                updated_at: now,
                reviewed_at: current.reviewed_at,
                resolved_at: current.resolved_at,
            }
        } else if current.status.can_transition_to(target) {
            match target {
                ReportStatus::InReview => StatusPatch {
                    status: target,
                    updated_at: now,
                    // Set once when the report first enters review, never
                    // cleared afterwards.
                    reviewed_at: current.reviewed_at.or(Some(now)),
                    resolved_at: current.resolved_at,
                },
                ReportStatus::Resolved => StatusPatch {
                    status: target,
                    updated_at: now,
                    reviewed_at: current.reviewed_at,
                    resolved_at: Some(now),
                },
                // resolved_at is cleared on archive so it holds exactly when
                // the report is in status Resolved.
                ReportStatus::Archived => StatusPatch {
                    status: target,
                    updated_at: now,
                    reviewed_at: current.reviewed_at,
                    resolved_at: None,
                },
                // No transition re-enters Submitted; can_transition_to
                // already refused it.
                ReportStatus::Submitted => unreachable!("no transition re-enters Submitted"),
            }
        } else {
            return Err(AppError::validation(format!(
                "invalid status transition {} -> {}",
                current.status, target
            )));
        };

        self.apply_patch(id, &patch).await?;
        info!(report_id = %id, status = %patch.status, actor = %actor.uid, "status transition applied");

        Ok(Report {
            status: patch.status,
            updated_at: patch.updated_at,
            reviewed_at: patch.reviewed_at,
            resolved_at: patch.resolved_at,
            ..current
        })
    }

    /// Persists a patch with a bounded timeout, retrying transient store
    /// failures with backoff. Validation, permission, and not-found errors
    /// surface immediately.
    async fn apply_patch(&self, id: &ReportId, patch: &StatusPatch) -> Result<()> {
        let mut attempt = 1;
        loop {
            match timeout(STORE_CALL_TIMEOUT, self.store.update_status(id, patch)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) if err.is_transient() && attempt < TRANSIENT_RETRY_ATTEMPTS => {
                    warn!(error = %err, attempt, "status update failed; retrying");
                }
                Ok(Err(err)) => return Err(err),
                Err(_) if attempt < TRANSIENT_RETRY_ATTEMPTS => {
                    warn!(attempt, "status update timed out; retrying");
                }
                Err(_) => {
                    return Err(AppError::unavailable(format!(
                        "status update for report {id} timed out"
                    )))
                }
            }
            sleep(TRANSIENT_RETRY_DELAY * attempt).await;
            attempt += 1;
        }
    }
}
