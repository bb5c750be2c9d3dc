//! Report store adapter: persistence plus live snapshot subscriptions.
//!
//! The backing document store is an external collaborator; `SqliteReportStore`
//! is the bundled reference backend used by the harness and the test suite.
//! Every persisted change re-delivers the full, ordered result set to each
//! matching subscription. Consumers treat a snapshot as authoritative state,
//! never as a diff, so at-least-once delivery is safe by construction.

use std::{
    fs,
    path::Path,
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::warn;
use uuid::Uuid;

use shared::{
    domain::{
        Category, Coordinates, DraftReport, ImageAttachment, Report, ReportId, ReportStatus,
        Severity, UserId, MAX_REPORT_IMAGES,
    },
    error::{AppError, Result},
};


const CHANGE_CHANNEL_CAPACITY: usize = 64;
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

/// Which reports a query or subscription covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFilter {
    All,
    ForUser(UserId),
    WithStatuses(Vec<ReportStatus>),
}

/// Final values for the four mutable columns of a report. Computed by the
/// lifecycle engine and applied verbatim; concurrent writers race and the
/// last write wins, which is the accepted baseline behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub status: ReportStatus,
    pub updated_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Persistence contract for reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Assigns an id and server timestamps, persists the draft with status
    /// `Submitted`, and returns the stored report.
    async fn create(&self, draft: &DraftReport, owner: &UserId) -> Result<Report>;

    async fn get(&self, id: &ReportId) -> Result<Option<Report>>;

    /// Applies a status patch. The caller is responsible for authorization
    /// and for computing the timestamp effects of the transition.
    async fn update_status(&self, id: &ReportId, patch: &StatusPatch) -> Result<()>;

    /// Appends image metadata after the binary upload has completed.
    /// Independent of `create`: a report legitimately exists with zero
    /// images when uploads fail.
    async fn attach_images(&self, id: &ReportId, images: &[ImageAttachment]) -> Result<()>;

    /// Current result set for `filter`, ordered by `created_at` descending.
    async fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>>;

    /// Long-lived subscription delivering the full result set on start and
    /// again after every persisted change to any report.
    async fn subscribe(&self, filter: ReportFilter) -> Result<ReportSubscription>;
}

struct SubscriptionGuard(JoinHandle<()>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cancellable handle to a live query. Dropping the handle (or calling
/// [`ReportSubscription::cancel`]) stops the background task, so release is
/// guaranteed on every exit path.
pub struct ReportSubscription {
    receiver: mpsc::Receiver<Vec<Report>>,
    _guard: SubscriptionGuard,
}

impl ReportSubscription {
    /// Awaits the next full snapshot. Returns `None` once the feed is closed.
    pub async fn next_snapshot(&mut self) -> Option<Vec<Report>> {
        self.receiver.recv().await
    }

    pub fn cancel(self) {}
}

impl Stream for ReportSubscription {
    type Item = Vec<Report>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct SqliteReportStore {
    pool: Pool<Sqlite>,
    changes: broadcast::Sender<()>,
}

impl SqliteReportStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .map_err(db_err)?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Self { pool, changes };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                title        TEXT NOT NULL,
                description  TEXT NOT NULL,
                category     TEXT NOT NULL,
                severity     INTEGER NOT NULL,
                latitude     REAL NOT NULL,
                longitude    REAL NOT NULL,
                status       TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                reviewed_at  TEXT,
                resolved_at  TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reports_created_at ON reports (created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS report_images (
                report_id    TEXT NOT NULL REFERENCES reports (id),
                position     INTEGER NOT NULL,
                path         TEXT NOT NULL,
                url          TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                PRIMARY KEY (report_id, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    fn notify_change(&self) {
        // No receivers is fine; nobody is subscribed yet.
        let _ = self.changes.send(());
    }

    async fn load_images(&self, id: &ReportId) -> Result<Vec<ImageAttachment>> {
        let rows = sqlx::query(
            "SELECT path, url, content_type, size_bytes
             FROM report_images WHERE report_id = ? ORDER BY position",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ImageAttachment {
                path: row.get("path"),
                url: row.get("url"),
                content_type: row.get("content_type"),
                size_bytes: row.get::<i64, _>("size_bytes") as u64,
            })
            .collect())
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<Report>> {
        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let mut report = report_from_row(&row)?;
            report.images = self.load_images(&report.id).await?;
            reports.push(report);
        }
        Ok(reports)
    }
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn create(&self, draft: &DraftReport, owner: &UserId) -> Result<Report> {
        let coords = require_draft_fields(draft)?;
        let id = ReportId(Uuid::new_v4().to_string());
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO reports
                 (id, user_id, title, description, category, severity,
                  latitude, longitude, status, created_at, updated_at, submitted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(owner.as_str())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.category.as_str())
        .bind(i64::from(draft.severity.level()))
        .bind(coords.latitude)
        .bind(coords.longitude)
        .bind(ReportStatus::Submitted.as_str())
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.notify_change();

        Ok(Report {
            id,
            user_id: owner.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            category: draft.category,
            severity: draft.severity,
            coords,
            status: ReportStatus::Submitted,
            images: Vec::new(),
            created_at: now,
            updated_at: now,
            submitted_at: now,
            reviewed_at: None,
            resolved_at: None,
        })
    }

    async fn get(&self, id: &ReportId) -> Result<Option<Report>> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => {
                let mut report = report_from_row(&row)?;
                report.images = self.load_images(&report.id).await?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    async fn update_status(&self, id: &ReportId, patch: &StatusPatch) -> Result<()> {
        let result = sqlx::query(
            "UPDATE reports
             SET status = ?, updated_at = ?, reviewed_at = ?, resolved_at = ?
             WHERE id = ?",
        )
        .bind(patch.status.as_str())
        .bind(patch.updated_at)
        .bind(patch.reviewed_at)
        .bind(patch.resolved_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("report", id));
        }

        self.notify_change();
        Ok(())
    }

    async fn attach_images(&self, id: &ReportId, images: &[ImageAttachment]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM reports WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(AppError::not_found("report", id));
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM report_images WHERE report_id = ?")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        if existing as usize + images.len() > MAX_REPORT_IMAGES {
            return Err(AppError::validation(format!(
                "report {id} would exceed the {MAX_REPORT_IMAGES}-image limit"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (offset, image) in images.iter().enumerate() {
            sqlx::query(
                "INSERT INTO report_images
                     (report_id, position, path, url, content_type, size_bytes)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(existing + offset as i64)
            .bind(&image.path)
            .bind(&image.url)
            .bind(&image.content_type)
            .bind(image.size_bytes as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        self.notify_change();
        Ok(())
    }

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let rows = match filter {
            ReportFilter::All => {
                sqlx::query("SELECT * FROM reports ORDER BY created_at DESC, id")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_err)?
            }
            ReportFilter::ForUser(user_id) => sqlx::query(
                "SELECT * FROM reports WHERE user_id = ? ORDER BY created_at DESC, id",
            )
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?,
            ReportFilter::WithStatuses(statuses) => {
                if statuses.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; statuses.len()].join(", ");
                let sql = format!(
                    "SELECT * FROM reports WHERE status IN ({placeholders})
                     ORDER BY created_at DESC, id"
                );
                let mut query = sqlx::query(&sql);
                for status in statuses {
                    query = query.bind(status.as_str());
                }
                query.fetch_all(&self.pool).await.map_err(db_err)?
            }
        };

        self.hydrate(rows).await
    }

    async fn subscribe(&self, filter: ReportFilter) -> Result<ReportSubscription> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let mut changes = self.changes.subscribe();
        let store = self.clone();

        let task = tokio::spawn(async move {
            loop {
                match store.list(&filter).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "snapshot query failed; waiting for next change");
                    }
                }
                match changes.recv().await {
                    Ok(()) => {}
                    // Missed signals are absorbed by re-querying: every
                    // delivery is the full current result set.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ReportSubscription {
            receiver: rx,
            _guard: SubscriptionGuard(task),
        })
    }
}

fn require_draft_fields(draft: &DraftReport) -> Result<Coordinates> {
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

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let severity_raw: i64 = row.get("severity");
    let severity = Severity::try_from(u8::try_from(severity_raw).map_err(|_| {
        AppError::validation(format!("severity column out of range: {severity_raw}"))
    })?)?;

    Ok(Report {
        id: ReportId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        title: row.get("title"),
        description: row.get("description"),
        category: Category::parse(&row.get::<String, _>("category"))?,
        severity,
        coords: Coordinates::new(row.get("latitude"), row.get("longitude"))?,
        status: ReportStatus::parse(&row.get::<String, _>("status"))?,
        images: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        submitted_at: row.get("submitted_at"),
        reviewed_at: row.get("reviewed_at"),
        resolved_at: row.get("resolved_at"),
    })
}

fn db_err(err: sqlx::Error) -> AppError {
    AppError::unavailable(err.to_string())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::unavailable(format!(
                    "failed to create parent directory for '{database_url}': {err}"
                ))
            })?;
        }
    }

    Ok(())
}
