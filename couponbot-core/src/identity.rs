//! Pseudo-anonymous requester identity.
//!
//! Locally the token is generated once and kept in the key-value store. Over
//! HTTP the client holds it and presents it on each request; a missing or
//! garbled token is silently replaced instead of being reported back.

use std::sync::Arc;

use tracing::{info, warn};

use couponbot_common::models::IdentityToken;

use crate::eventbus::{CouponEvent, EventBus};
use crate::repositories::KeyValueStore;
use crate::Error;

pub const TOKEN_KEY: &str = "coupon-cookie-token";

pub struct IdentityProvider {
    store: Arc<dyn KeyValueStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl IdentityProvider {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// The persisted token, if one exists and is well formed.
    pub async fn current(&self) -> Result<Option<IdentityToken>, Error> {
        Ok(self
            .store
            .get_value(TOKEN_KEY)
            .await?
            .and_then(|raw| IdentityToken::parse(&raw).ok()))
    }

    /// Returns the persisted token, creating (or replacing a malformed) one
    /// on first use. Repeated calls return the same token.
    pub async fn get_or_create_identity(&self) -> Result<IdentityToken, Error> {
        if let Some(raw) = self.store.get_value(TOKEN_KEY).await? {
            match IdentityToken::parse(&raw) {
                Ok(token) => return Ok(token),
                Err(e) => warn!("Stored identity token is unusable ({}); issuing a new one", e),
            }
        }

        let token = IdentityToken::generate();
        self.store.set_value(TOKEN_KEY, token.as_str()).await?;
        info!("Provisioned new identity token");
        Ok(token)
    }

    /// Forget the persisted token. Debug/administrative use only.
    pub async fn reset_identity(&self) -> Result<(), Error> {
        self.store.delete_value(TOKEN_KEY).await?;
        info!("Identity token cleared");
        if let Some(bus) = &self.event_bus {
            bus.publish(CouponEvent::IdentityReset).await;
        }
        Ok(())
    }
}

/// A token as presented by a remote client, after self-healing.
#[derive(Debug, Clone)]
pub struct PresentedIdentity {
    pub token: IdentityToken,

    /// `true` when the client sent nothing usable and got a fresh token.
    pub reissued: bool,
}

pub fn resolve_presented(raw: Option<&str>) -> PresentedIdentity {
    match raw.map(IdentityToken::parse) {
        Some(Ok(token)) => PresentedIdentity { token, reissued: false },
        Some(Err(e)) => {
            warn!("Client presented a bad identity token ({}); reissuing", e);
            PresentedIdentity { token: IdentityToken::generate(), reissued: true }
        }
        None => PresentedIdentity { token: IdentityToken::generate(), reissued: true },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::MemoryStore;

    #[tokio::test]
    async fn test_identity_is_stable() -> Result<(), Error> {
        let provider = IdentityProvider::new(Arc::new(MemoryStore::new()));
        assert!(provider.current().await?.is_none());

        let first = provider.get_or_create_identity().await?;
        let second = provider.get_or_create_identity().await?;
        assert_eq!(first, second);
        assert_eq!(provider.current().await?, Some(first));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_issues_a_new_identity() -> Result<(), Error> {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(None).await;
        let provider = IdentityProvider::new(Arc::new(MemoryStore::new())).with_event_bus(bus);

        let before = provider.get_or_create_identity().await?;
        provider.reset_identity().await?;
        assert!(provider.current().await?.is_none());
        assert!(matches!(rx.recv().await, Some(CouponEvent::IdentityReset)));

        let after = provider.get_or_create_identity().await?;
        assert_ne!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_stored_token_heals() -> Result<(), Error> {
        let store = Arc::new(MemoryStore::new());
        store.set_value(TOKEN_KEY, "not a token!").await?;
        let provider = IdentityProvider::new(store.clone());

        let token = provider.get_or_create_identity().await?;
        assert_eq!(store.get_value(TOKEN_KEY).await?.as_deref(), Some(token.as_str()));
        Ok(())
    }

    #[test]
    fn test_resolve_presented() {
        let kept = resolve_presented(Some("abc123"));
        assert!(!kept.reissued);
        assert_eq!(kept.token.as_str(), "abc123");

        assert!(resolve_presented(None).reissued);
        assert!(resolve_presented(Some("")).reissued);
        assert!(resolve_presented(Some("a b")).reissued);
    }
}
