//! Aggregation and dashboard view model.
//!
//! The view model is pure: it replaces its whole state from each delivered
//! snapshot and derives counts and projections from it, so duplicate or
//! repeated snapshots are harmless. `DashboardHandle` owns the pump task
//! that feeds it from a store subscription and guarantees the subscription
//! is released when the handle goes away.

use std::sync::Arc;

use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::debug;

use shared::{
    domain::{Report, ReportId, ReportStatus, StatusFilter, UserProfile},
    error::Result,
};
use storage::ReportFilter;

use crate::lifecycle::LifecycleEngine;

const DASHBOARD_EVENT_CAPACITY: usize = 32;

/// Per-status counters, recomputed in full on every snapshot. The sets are
/// small; correctness beats incremental bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub total: usize,
    pub submitted: usize,
    pub in_review: usize,
    pub resolved: usize,
    pub archived: usize,
}

impl StatusCounts {
    pub fn from_snapshot(reports: &[Report]) -> Self {
        let mut counts = Self {
            total: reports.len(),
            ..Self::default()
        };
        for report in reports {
            match report.status {
                ReportStatus::Submitted => counts.submitted += 1,
                ReportStatus::InReview => counts.in_review += 1,
                ReportStatus::Resolved => counts.resolved += 1,
                ReportStatus::Archived => counts.archived += 1,
            }
        }
        counts
    }

    pub fn for_status(&self, status: ReportStatus) -> usize {
        match status {
            ReportStatus::Submitted => self.submitted,
            ReportStatus::InReview => self.in_review,
            ReportStatus::Resolved => self.resolved,
            ReportStatus::Archived => self.archived,
        }
    }
}

#[derive(Debug, Default)]
pub struct DashboardViewModel {
    reports: Vec<Report>,
    counts: StatusCounts,
    selected: Option<ReportId>,
}

impl DashboardViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire state from the latest snapshot. Selection only
    /// survives if the selected report is still in the result set.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Report>) {
        self.counts = StatusCounts::from_snapshot(&snapshot);
        if let Some(selected) = &self.selected {
            if !snapshot.iter().any(|r| &r.id == selected) {
                self.selected = None;
            }
        }
        self.reports = snapshot;
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    /// Pure projection over the current snapshot, preserving its order.
    pub fn filtered(&self, filter: StatusFilter) -> Vec<&Report> {
        self.reports
            .iter()
            .filter(|r| filter.matches(r.status))
            .collect()
    }

    /// Selects a report for the detail view. Ids not present in the current
    /// snapshot are refused.
    pub fn select(&mut self, id: &ReportId) -> bool {
        if self.reports.iter().any(|r| &r.id == id) {
            self.selected = Some(id.clone());
            true
        } else {
            false
        }
    }

    pub fn selected_report(&self) -> Option<&Report> {
        let selected = self.selected.as_ref()?;
        self.reports.iter().find(|r| &r.id == selected)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    fn clear_selection_for(&mut self, id: &ReportId) {
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
    }
}

#[derive(Debug, Clone)]
pub enum DashboardEvent {
    SnapshotApplied { total: usize },
    TransitionApplied { id: ReportId, status: ReportStatus },
}

struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Live dashboard bound to one store subscription. Dropping the handle (or
/// calling [`DashboardHandle::shutdown`]) aborts the pump task, which in
/// turn cancels the underlying subscription.
pub struct DashboardHandle {
    state: Arc<RwLock<DashboardViewModel>>,
    engine: Arc<LifecycleEngine>,
    events: broadcast::Sender<DashboardEvent>,
    _pump: PumpGuard,
}

impl DashboardHandle {
    /// Subscribes to the engine's store with `filter` and starts applying
    /// snapshots as they arrive: unfiltered for the council dashboard,
    /// `ForUser` for a citizen's own-reports view, `WithStatuses` for the
    /// public map.
    pub async fn attach(engine: Arc<LifecycleEngine>, filter: ReportFilter) -> Result<Self> {
        let mut subscription = engine.store().subscribe(filter).await?;
        let state = Arc::new(RwLock::new(DashboardViewModel::new()));
        let (events, _) = broadcast::channel(DASHBOARD_EVENT_CAPACITY);

        let pump_state = state.clone();
        let pump_events = events.clone();
        let pump = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next_snapshot().await {
                let total = snapshot.len();
                pump_state.write().await.apply_snapshot(snapshot);
                debug!(total, "dashboard snapshot applied");
                let _ = pump_events.send(DashboardEvent::SnapshotApplied { total });
            }
        });

        Ok(Self {
            state,
            engine,
            events,
            _pump: PumpGuard(pump),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DashboardEvent> {
        self.events.subscribe()
    }

    /// Read access to the current view model state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&DashboardViewModel) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn counts(&self) -> StatusCounts {
        self.state.read().await.counts()
    }

    pub async fn filtered(&self, filter: StatusFilter) -> Vec<Report> {
        self.state
            .read()
            .await
            .filtered(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn select(&self, id: &ReportId) -> bool {
        self.state.write().await.select(id)
    }

    pub async fn selected_report(&self) -> Option<Report> {
        self.state.read().await.selected_report().cloned()
    }

    /// Runs a status transition through the engine. On success the detail
    /// selection is cleared when it pointed at the transitioned report.
    pub async fn transition(
        &self,
        id: &ReportId,
        target: ReportStatus,
        actor: &UserProfile,
    ) -> Result<Report> {
        let report = self.engine.transition(id, target, actor).await?;
        self.state.write().await.clear_selection_for(id);
        let _ = self.events.send(DashboardEvent::TransitionApplied {
            id: id.clone(),
            status: report.status,
        });
        Ok(report)
    }

    pub fn shutdown(self) {}
}
