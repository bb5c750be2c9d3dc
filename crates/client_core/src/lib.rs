//! Client-side core of the environmental reporting system: the report
//! lifecycle engine, the dashboard view model fed by the live store
//! subscription, and the thin clients for the external identity, object
//! storage, and weather/air-quality collaborators.

pub mod auth;
pub mod dashboard;
pub mod environment;
pub mod lifecycle;

pub use auth::{AuthEvent, IdentityProvider, MissingIdentityProvider, StaticIdentity};
pub use dashboard::{DashboardEvent, DashboardHandle, DashboardViewModel, StatusCounts};
pub use environment::EnvironmentClient;
pub use lifecycle::{ImageUpload, LifecycleEngine, MissingObjectStore, ObjectStore};

#[cfg(test)]
mod tests;
