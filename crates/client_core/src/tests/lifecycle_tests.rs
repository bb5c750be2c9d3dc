use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::lifecycle::{storage_key, LifecycleEngine, MissingObjectStore, ObjectStore};
use crate::ImageUpload;
use shared::{
    domain::{
        Category, Coordinates, DraftReport, ImageAttachment, Report, ReportId, ReportStatus,
        Severity, UserId, UserProfile, COUNCIL_ROLE,
    },
    error::{AppError, Result},
};
use storage::{ReportFilter, ReportStore, ReportSubscription, SqliteReportStore, StatusPatch};

fn citizen() -> UserProfile {
    UserProfile {
        uid: UserId::from("citizen-1"),
        email: "jane@example.com".into(),
        roles: Vec::new(),
    }
}

fn council() -> UserProfile {
    UserProfile {
        uid: UserId::from("clerk-1"),
        email: "clerk@council.example".into(),
        roles: vec![COUNCIL_ROLE.to_string()],
    }
}

fn draft() -> DraftReport {
    DraftReport {
        title: "Illegal dumping near river".into(),
        description: "Construction waste piling up on the east bank".into(),
        category: Category::WasteDumping,
        severity: Severity::High,
        coords: Some(Coordinates::new(-1.29, 36.82).expect("coords")),
    }
}

async fn engine() -> (Arc<dyn ReportStore>, LifecycleEngine) {
    let store: Arc<dyn ReportStore> =
        Arc::new(SqliteReportStore::new("sqlite::memory:").await.expect("db"));
    (store.clone(), LifecycleEngine::new(store))
}

fn upload(name: &str) -> ImageUpload {
    ImageUpload {
        filename: name.to_string(),
        content_type: "image/jpeg".into(),
        bytes: vec![0u8; 64],
    }
}

/// Upload double that fails for selected filenames and fabricates metadata
/// for the rest.
struct TestObjectStore {
    fail_filenames: Vec<String>,
}

#[async_trait]
impl ObjectStore for TestObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ImageAttachment> {
        if self.fail_filenames.iter().any(|name| key.ends_with(name)) {
            return Err(AppError::unavailable(format!("upload of '{key}' failed")));
        }
        Ok(ImageAttachment {
            path: key.to_string(),
            url: format!("https://storage.example/{key}"),
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
        })
    }
}

/// Store wrapper whose `update_status` fails a configured number of times
/// before delegating to the real store. Every call is counted.
struct FlakyStore {
    inner: SqliteReportStore,
    failures_left: AtomicU32,
    attempts: AtomicU32,
    transient: bool,
}

impl FlakyStore {
    async fn failing(failures: u32, transient: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteReportStore::new("sqlite::memory:").await.expect("db"),
            failures_left: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            transient,
        })
    }
}

#[async_trait]
impl ReportStore for FlakyStore {
    async fn create(&self, draft: &DraftReport, owner: &UserId) -> Result<Report> {
        self.inner.create(draft, owner).await
    }

    async fn get(&self, id: &ReportId) -> Result<Option<Report>> {
        self.inner.get(id).await
    }

    async fn update_status(&self, id: &ReportId, patch: &StatusPatch) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(if self.transient {
                AppError::unavailable("store briefly offline")
            } else {
                AppError::validation("malformed patch")
            });
        }
        self.inner.update_status(id, patch).await
    }

    async fn attach_images(&self, id: &ReportId, images: &[ImageAttachment]) -> Result<()> {
        self.inner.attach_images(id, images).await
    }

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        self.inner.list(filter).await
    }

    async fn subscribe(&self, filter: ReportFilter) -> Result<ReportSubscription> {
        self.inner.subscribe(filter).await
    }
}

#[tokio::test]
async fn submit_creates_a_submitted_report() {
    let (_store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    assert_eq!(report.status, ReportStatus::Submitted);
    assert!(report.created_at <= report.updated_at);
    assert!(report.reviewed_at.is_none());
    assert!(report.resolved_at.is_none());
}

#[tokio::test]
async fn submit_rejects_draft_without_location_before_any_persistence() {
    let (store, engine) = engine().await;
    let mut no_coords = draft();
    no_coords.coords = None;
    assert!(matches!(
        engine.submit(&no_coords, &citizen()).await,
        Err(AppError::Validation(_))
    ));
    assert!(store.list(&ReportFilter::All).await.expect("list").is_empty());
}

#[tokio::test]
async fn non_council_caller_is_denied_and_report_is_unmodified() {
    let (store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");

    let denied = engine
        .transition(&report.id, ReportStatus::InReview, &citizen())
        .await;
    assert!(matches!(denied, Err(AppError::PermissionDenied(_))));

    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert_eq!(stored.status, ReportStatus::Submitted);
    assert!(stored.reviewed_at.is_none());
}

#[tokio::test]
async fn direct_resolution_skips_review_timestamps() {
    let (_store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");

    let resolved = engine
        .transition(&report.id, ReportStatus::Resolved, &council())
        .await
        .expect("resolve");
    assert_eq!(resolved.status, ReportStatus::Resolved);
    assert!(resolved.reviewed_at.is_none());
    assert!(resolved.resolved_at.is_some());
}

#[tokio::test]
async fn entering_review_sets_reviewed_at_exactly_once() {
    let (store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");

    engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await
        .expect("review");
    let first = store.get(&report.id).await.expect("get").expect("present");
    assert!(first.reviewed_at.is_some());

    engine
        .transition(&report.id, ReportStatus::Resolved, &council())
        .await
        .expect("resolve");
    let second = store.get(&report.id).await.expect("get").expect("present");
    // reviewed_at survives the move to Resolved untouched.
    assert_eq!(second.reviewed_at, first.reviewed_at);
    assert!(second.resolved_at.is_some());
}

#[tokio::test]
async fn repeating_a_transition_only_refreshes_updated_at() {
    let (store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");

    engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await
        .expect("review");
    let first = store.get(&report.id).await.expect("get").expect("present");

    tokio::time::sleep(Duration::from_millis(5)).await;
    engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await
        .expect("repeat review");
    let second = store.get(&report.id).await.expect("get").expect("present");

    assert_eq!(second.status, ReportStatus::InReview);
    assert_eq!(second.reviewed_at, first.reviewed_at);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn downward_transitions_are_refused() {
    let (_store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    engine
        .transition(&report.id, ReportStatus::Resolved, &council())
        .await
        .expect("resolve");

    let refused = engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await;
    assert!(matches!(refused, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn archiving_a_resolved_report_clears_resolved_at() {
    let (store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    engine
        .transition(&report.id, ReportStatus::Resolved, &council())
        .await
        .expect("resolve");

    engine
        .transition(&report.id, ReportStatus::Archived, &council())
        .await
        .expect("archive");
    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert_eq!(stored.status, ReportStatus::Archived);
    assert!(stored.resolved_at.is_none());

    // Archived is terminal.
    let refused = engine
        .transition(&report.id, ReportStatus::Resolved, &council())
        .await;
    assert!(matches!(refused, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn unknown_report_id_is_not_found() {
    let (_store, engine) = engine().await;
    let missing = engine
        .transition(
            &shared::domain::ReportId::from("no-such-report"),
            ReportStatus::InReview,
            &council(),
        )
        .await;
    assert!(matches!(missing, Err(AppError::NotFound { .. })));
}

#[tokio::test]
async fn transient_store_failures_are_retried_until_the_patch_lands() {
    let store = FlakyStore::failing(1, true).await;
    let engine = LifecycleEngine::new(store.clone());

    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    let reviewed = engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await
        .expect("review");

    assert_eq!(reviewed.status, ReportStatus::InReview);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert_eq!(stored.status, ReportStatus::InReview);
}

#[tokio::test]
async fn non_transient_store_failures_are_not_retried() {
    let store = FlakyStore::failing(u32::MAX, false).await;
    let engine = LifecycleEngine::new(store.clone());

    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    let refused = engine
        .transition(&report.id, ReportStatus::InReview, &council())
        .await;

    assert!(matches!(refused, Err(AppError::Validation(_))));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert_eq!(stored.status, ReportStatus::Submitted);
}

#[tokio::test]
async fn image_upload_failures_are_isolated_per_image() {
    let store: Arc<dyn ReportStore> =
        Arc::new(SqliteReportStore::new("sqlite::memory:").await.expect("db"));
    let engine = LifecycleEngine::with_object_store(
        store.clone(),
        Arc::new(TestObjectStore {
            fail_filenames: vec!["b.jpg".to_string()],
        }),
    );

    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    let attached = engine
        .attach_images(
            &report.id,
            vec![upload("a.jpg"), upload("b.jpg"), upload("c.jpg")],
        )
        .await
        .expect("attach");

    assert_eq!(attached.len(), 2);
    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert_eq!(stored.images.len(), 2);
    assert_eq!(stored.images[0].path, storage_key(&report.id, "a.jpg"));
}

#[tokio::test]
async fn report_survives_with_zero_images_when_every_upload_fails() {
    let store: Arc<dyn ReportStore> =
        Arc::new(SqliteReportStore::new("sqlite::memory:").await.expect("db"));
    let engine = LifecycleEngine::with_object_store(store.clone(), Arc::new(MissingObjectStore));

    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    let attached = engine
        .attach_images(&report.id, vec![upload("a.jpg")])
        .await
        .expect("attach");

    assert!(attached.is_empty());
    let stored = store.get(&report.id).await.expect("get").expect("present");
    assert!(stored.images.is_empty());
}

#[tokio::test]
async fn attach_refuses_more_uploads_than_the_image_cap() {
    let (_store, engine) = engine().await;
    let report = engine.submit(&draft(), &citizen()).await.expect("submit");
    let uploads = (0..6).map(|i| upload(&format!("{i}.jpg"))).collect();
    assert!(matches!(
        engine.attach_images(&report.id, uploads).await,
        Err(AppError::Validation(_))
    ));
}
