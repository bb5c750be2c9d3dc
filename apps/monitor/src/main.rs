//! Headless walkthrough of the reporting core: submits a demo report,
//! moves it through review as a council user, and prints the live
//! dashboard counts while they update.

mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use client_core::{DashboardHandle, EnvironmentClient, LifecycleEngine};
use config::{load_settings, normalize_database_url};
use shared::domain::{
    Category, Coordinates, DraftReport, ReportStatus, Severity, UserId, UserProfile, COUNCIL_ROLE,
};
use storage::{ReportFilter, ReportStore, SqliteReportStore};

#[derive(Parser, Debug)]
struct Args {
    /// Path to the monitor settings file.
    #[arg(long, default_value = "monitor.toml")]
    config: PathBuf,
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    let database_url = normalize_database_url(&settings.database_url);

    let sqlite = SqliteReportStore::new(&database_url).await?;
    sqlite.health_check().await?;
    info!(%database_url, "report store ready");
    let store: Arc<dyn ReportStore> = Arc::new(sqlite);

    let engine = Arc::new(LifecycleEngine::new(store));
    let dashboard = DashboardHandle::attach(engine.clone(), ReportFilter::All).await?;

    let citizen = UserProfile {
        uid: UserId::from("demo-citizen"),
        email: "citizen@example.com".into(),
        roles: Vec::new(),
    };
    let clerk = UserProfile {
        uid: UserId::from("demo-clerk"),
        email: "clerk@council.example".into(),
        roles: vec![COUNCIL_ROLE.to_string()],
    };

    let coords = Coordinates::new(-1.29, 36.82)?;
    let draft = DraftReport {
        title: "Illegal dumping near river".into(),
        description: "Construction waste piling up on the east bank".into(),
        category: Category::WasteDumping,
        severity: Severity::High,
        coords: Some(coords),
    };

    let report = engine.submit(&draft, &citizen).await?;
    println!("Submitted report {} ({})", report.id, report.status);

    dashboard
        .transition(&report.id, ReportStatus::InReview, &clerk)
        .await?;
    let resolved = dashboard
        .transition(&report.id, ReportStatus::Resolved, &clerk)
        .await?;
    println!("Report {} is now {}", resolved.id, resolved.status);

    wait_for_counts(&dashboard).await;
    let counts = dashboard.counts().await;
    println!(
        "Dashboard: {} total, {} submitted, {} in review, {} resolved, {} archived",
        counts.total, counts.submitted, counts.in_review, counts.resolved, counts.archived
    );

    let environment = match settings.environment_base_url {
        Some(base) => EnvironmentClient::with_base_url(base),
        None => EnvironmentClient::new(),
    };
    match environment.fetch_snapshot(coords).await {
        Ok(snapshot) => {
            println!(
                "Conditions at the report site: temperature {:?} C, pm2.5 {:?}",
                snapshot.temperature_c, snapshot.pm2_5
            );
        }
        Err(err) => warn!(error = %err, "environmental snapshot unavailable"),
    }

    dashboard.shutdown();
    Ok(())
}

/// Lets the subscription pump catch up with the transitions just applied.
async fn wait_for_counts(dashboard: &DashboardHandle) {
    let mut events = dashboard.subscribe_events();
    for _ in 0..20 {
        if dashboard.counts().await.resolved >= 1 {
            return;
        }
        let _ = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
    }
}
