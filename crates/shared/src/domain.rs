use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ReportId);
id_newtype!(UserId);

/// Role string that grants review authority. Absence implies citizen.
pub const COUNCIL_ROLE: &str = "council";

/// Hard cap on attached images per report, enforced at persistence time.
pub const MAX_REPORT_IMAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    WasteDumping,
    AirPollution,
    WaterPollution,
    VehicleEmissions,
    IndustrialEmissions,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::WasteDumping => "waste_dumping",
            Category::AirPollution => "air_pollution",
            Category::WaterPollution => "water_pollution",
            Category::VehicleEmissions => "vehicle_emissions",
            Category::IndustrialEmissions => "industrial_emissions",
            Category::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "waste_dumping" => Ok(Category::WasteDumping),
            "air_pollution" => Ok(Category::AirPollution),
            "water_pollution" => Ok(Category::WaterPollution),
            "vehicle_emissions" => Ok(Category::VehicleEmissions),
            "industrial_emissions" => Ok(Category::IndustrialEmissions),
            "other" => Ok(Category::Other),
            other => Err(AppError::validation(format!(
                "unknown report category '{other}'"
            ))),
        }
    }
}

/// Severity scale 1-4 as submitted from the report form. Serialized as the
/// bare integer the document store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Severity {
    Low = 1,
    Moderate = 2,
    High = 3,
    Critical = 4,
}

impl Severity {
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Severity::Low),
            2 => Ok(Severity::Moderate),
            3 => Ok(Severity::High),
            4 => Ok(Severity::Critical),
            other => Err(AppError::validation(format!(
                "severity must be between 1 and 4, got {other}"
            ))),
        }
    }
}

impl From<Severity> for u8 {
    fn from(value: Severity) -> Self {
        value.level()
    }
}

/// Lifecycle status. Wire strings match the document store exactly,
/// including the space in "In Review".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    Submitted,
    #[serde(rename = "In Review")]
    InReview,
    Resolved,
    Archived,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 4] = [
        ReportStatus::Submitted,
        ReportStatus::InReview,
        ReportStatus::Resolved,
        ReportStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Submitted => "Submitted",
            ReportStatus::InReview => "In Review",
            ReportStatus::Resolved => "Resolved",
            ReportStatus::Archived => "Archived",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "Submitted" => Ok(ReportStatus::Submitted),
            "In Review" => Ok(ReportStatus::InReview),
            "Resolved" => Ok(ReportStatus::Resolved),
            "Archived" => Ok(ReportStatus::Archived),
            other => Err(AppError::validation(format!(
                "unknown report status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Archived)
    }

    /// Permitted moves along the lifecycle graph. Archived is reachable
    /// from every other state, including Resolved: the review UI offers an
    /// archive action on resolved reports, so the looser model is the
    /// observed one (pending product clarification).
    pub fn can_transition_to(&self, target: ReportStatus) -> bool {
        match (self, target) {
            (ReportStatus::Submitted, ReportStatus::InReview) => true,
            (ReportStatus::Submitted, ReportStatus::Resolved) => true,
            (ReportStatus::InReview, ReportStatus::Resolved) => true,
            (ReportStatus::Archived, _) => false,
            (_, ReportStatus::Archived) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(AppError::validation(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::validation(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Metadata for one uploaded image, recorded after the binary upload to
/// object storage completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub path: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Client-side draft: what a citizen has typed into the form before
/// submission. Coordinates are optional only while editing; `create`
/// rejects drafts without them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftReport {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub coords: Option<Coordinates>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    pub user_id: UserId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub coords: Coordinates,
    pub status: ReportStatus,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: UserId,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_council(&self) -> bool {
        self.has_role(COUNCIL_ROLE)
    }
}

/// Point-in-time weather and air-quality reading for a coordinate. Derived,
/// held only in memory; the most recent fetch for the active coordinate wins.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentalSnapshot {
    pub coords: Coordinates,
    pub temperature_c: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

/// Pure projection selector for UI lists. `All` is the identity projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Status(ReportStatus),
    Unresolved,
}

impl StatusFilter {
    pub fn matches(&self, status: ReportStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Status(wanted) => status == *wanted,
            StatusFilter::Unresolved => {
                matches!(status, ReportStatus::Submitted | ReportStatus::InReview)
            }
        }
    }
}
