//! Identity port. Authentication itself is owned by the external provider;
//! the core only consumes `{uid, email, roles}` and the sign-in/out feed to
//! resolve authorization for lifecycle transitions.

use async_trait::async_trait;
use tokio::sync::broadcast;

use shared::{
    domain::UserProfile,
    error::{AppError, Result},
};

const AUTH_EVENT_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(UserProfile),
    SignedOut,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Result<Option<UserProfile>>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

pub struct MissingIdentityProvider;

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    async fn current_user(&self) -> Result<Option<UserProfile>> {
        Err(AppError::unavailable("identity provider is not configured"))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        // A channel nobody sends on: subscribers simply never see an event.
        let (_sender, receiver) = broadcast::channel(1);
        receiver
    }
}

/// Fixed signed-in identity, used by the harness and tests where the real
/// provider is out of reach.
pub struct StaticIdentity {
    user: UserProfile,
    events: broadcast::Sender<AuthEvent>,
}

impl StaticIdentity {
    pub fn new(user: UserProfile) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { user, events }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<Option<UserProfile>> {
        Ok(Some(self.user.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{UserId, COUNCIL_ROLE};

    fn council_user() -> UserProfile {
        UserProfile {
            uid: UserId::from("council-1"),
            email: "clerk@council.example".into(),
            roles: vec![COUNCIL_ROLE.to_string()],
        }
    }

    #[tokio::test]
    async fn static_identity_reports_its_user() {
        let identity = StaticIdentity::new(council_user());
        let user = identity
            .current_user()
            .await
            .expect("current user")
            .expect("signed in");
        assert!(user.is_council());
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() {
        let identity = MissingIdentityProvider;
        assert!(matches!(
            identity.current_user().await,
            Err(AppError::Unavailable(_))
        ));
    }
}
