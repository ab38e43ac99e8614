//! Who claimed what, and when.
//!
//! A claim is *active* while its cooldown has time left. Expired records are
//! never deleted; they simply stop counting once `remaining_cooldown` hits
//! zero.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use couponbot_common::models::{ClaimRecord, IdentityToken, NewClaim};

use crate::eventbus::{CouponEvent, EventBus};
use crate::repositories::{ClaimRepository, KeyValueStore};
use crate::utils::time::remaining_cooldown;
use crate::Error;

pub const CLAIM_SLOT_KEY: &str = "coupon-claim";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveClaim {
    pub claim: ClaimRecord,
    pub remaining: Duration,
}

#[async_trait]
pub trait ClaimLedger: Send + Sync {
    /// Most recent claim for `identity`, active or not.
    async fn latest_claim(&self, identity: &IdentityToken) -> Result<Option<ClaimRecord>, Error>;

    /// Persist a claim; it supersedes whatever was most recent for that identity.
    async fn record_claim(&self, new_claim: NewClaim) -> Result<ClaimRecord, Error>;

    /// Undo `record_claim` for a request nobody is waiting on any more.
    async fn retract_claim(&self, claim: &ClaimRecord) -> Result<bool, Error>;

    /// The latest claim, if its cooldown has not run out at `now`.
    async fn get_active_claim(
        &self,
        identity: &IdentityToken,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<Option<ActiveClaim>, Error> {
        let Some(claim) = self.latest_claim(identity).await? else {
            return Ok(None);
        };
        let remaining = remaining_cooldown(claim.claimed_at, now, cooldown);
        if remaining.is_zero() {
            debug!("Latest claim for identity has expired");
            return Ok(None);
        }
        Ok(Some(ActiveClaim { claim, remaining }))
    }
}

/// Single-slot ledger for the local variant. Recording overwrites the slot.
pub struct LocalClaimLedger {
    store: Arc<dyn KeyValueStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl LocalClaimLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }
}

#[async_trait]
impl ClaimLedger for LocalClaimLedger {
    async fn latest_claim(&self, identity: &IdentityToken) -> Result<Option<ClaimRecord>, Error> {
        let Some(raw) = self.store.get_value(CLAIM_SLOT_KEY).await? else {
            return Ok(None);
        };
        let claim: ClaimRecord = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring unreadable claim slot: {}", e);
                return Ok(None);
            }
        };
        // The slot is per store, but a reset identity must not inherit it.
        Ok(claim.belongs_to(identity).then_some(claim))
    }

    async fn record_claim(&self, new_claim: NewClaim) -> Result<ClaimRecord, Error> {
        let claim = ClaimRecord::from_new(new_claim);
        self.store
            .set_value(CLAIM_SLOT_KEY, &serde_json::to_string(&claim)?)
            .await?;
        if let Some(bus) = &self.event_bus {
            bus.publish(CouponEvent::ClaimRecorded(claim.clone())).await;
        }
        Ok(claim)
    }

    /// Clears the slot, but only while it still holds `claim`.
    async fn retract_claim(&self, claim: &ClaimRecord) -> Result<bool, Error> {
        let Some(raw) = self.store.get_value(CLAIM_SLOT_KEY).await? else {
            return Ok(false);
        };
        let held = serde_json::from_str::<ClaimRecord>(&raw)
            .map(|c| c.claim_id == claim.claim_id)
            .unwrap_or(false);
        if held {
            self.store.delete_value(CLAIM_SLOT_KEY).await?;
        }
        Ok(held)
    }
}

/// Append-only ledger over a `ClaimRepository`.
pub struct SharedClaimLedger {
    repo: Arc<dyn ClaimRepository>,
    event_bus: Option<Arc<EventBus>>,
}

impl SharedClaimLedger {
    pub fn new(repo: Arc<dyn ClaimRepository>) -> Self {
        Self { repo, event_bus: None }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn history(&self, identity: &IdentityToken, limit: i64) -> Result<Vec<ClaimRecord>, Error> {
        self.repo.list_for_identity(identity.as_str(), limit).await
    }
}

#[async_trait]
impl ClaimLedger for SharedClaimLedger {
    async fn latest_claim(&self, identity: &IdentityToken) -> Result<Option<ClaimRecord>, Error> {
        self.repo.latest_for_identity(identity.as_str()).await
    }

    async fn record_claim(&self, new_claim: NewClaim) -> Result<ClaimRecord, Error> {
        let claim = ClaimRecord::from_new(new_claim);
        self.repo.insert_claim(&claim).await?;
        if let Some(bus) = &self.event_bus {
            bus.publish(CouponEvent::ClaimRecorded(claim.clone())).await;
        }
        Ok(claim)
    }

    async fn retract_claim(&self, claim: &ClaimRecord) -> Result<bool, Error> {
        self.repo.delete_claim(claim.claim_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryClaimRepository, MemoryStore};

    const HOUR: Duration = Duration::from_secs(3600);

    fn new_claim(identity: &IdentityToken, code: &str, at: DateTime<Utc>) -> NewClaim {
        NewClaim {
            identity: identity.clone(),
            coupon_code: code.to_string(),
            coupon_id: None,
            ip_address: None,
            claimed_at: at,
        }
    }

    #[tokio::test]
    async fn test_local_slot_overwrites_and_expires() -> Result<(), Error> {
        let ledger = LocalClaimLedger::new(Arc::new(MemoryStore::new()));
        let me = IdentityToken::generate();
        let t0 = Utc::now();

        ledger.record_claim(new_claim(&me, "SAVE10", t0 - chrono::Duration::hours(2))).await?;
        assert!(ledger.get_active_claim(&me, t0, HOUR).await?.is_none());
        assert!(ledger.latest_claim(&me).await?.is_some(), "expired record is kept");

        ledger.record_claim(new_claim(&me, "SAVE20", t0)).await?;
        let active = ledger.get_active_claim(&me, t0, HOUR).await?.expect("active claim");
        assert_eq!(active.claim.coupon_code, "SAVE20");
        assert_eq!(active.remaining, HOUR);
        Ok(())
    }

    #[tokio::test]
    async fn test_local_slot_ignores_other_identity() -> Result<(), Error> {
        let ledger = LocalClaimLedger::new(Arc::new(MemoryStore::new()));
        let me = IdentityToken::generate();
        let someone_else = IdentityToken::generate();

        ledger.record_claim(new_claim(&me, "SAVE10", Utc::now())).await?;
        assert!(ledger.latest_claim(&someone_else).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_retract_only_clears_own_claim() -> Result<(), Error> {
        let ledger = LocalClaimLedger::new(Arc::new(MemoryStore::new()));
        let me = IdentityToken::generate();

        let stale = ledger.record_claim(new_claim(&me, "SAVE10", Utc::now())).await?;
        let current = ledger.record_claim(new_claim(&me, "SAVE20", Utc::now())).await?;

        assert!(!ledger.retract_claim(&stale).await?, "slot moved on");
        assert_eq!(ledger.latest_claim(&me).await?, Some(current.clone()));
        assert!(ledger.retract_claim(&current).await?);
        assert!(ledger.latest_claim(&me).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_slot_garbage_reads_as_empty() -> Result<(), Error> {
        let store = Arc::new(MemoryStore::new());
        store.set_value(CLAIM_SLOT_KEY, "{broken").await?;
        let ledger = LocalClaimLedger::new(store);
        assert!(ledger.latest_claim(&IdentityToken::generate()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_ledger_appends_and_notifies() -> Result<(), Error> {
        let repo = Arc::new(InMemoryClaimRepository::new());
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(None).await;
        let ledger = SharedClaimLedger::new(repo.clone()).with_event_bus(bus);
        let me = IdentityToken::generate();
        let t0 = Utc::now();

        ledger.record_claim(new_claim(&me, "SAVE10", t0 - chrono::Duration::hours(3))).await?;
        let recorded = ledger.record_claim(new_claim(&me, "FREESHIP", t0)).await?;

        assert_eq!(repo.len().await, 2);
        let active = ledger.get_active_claim(&me, t0 + chrono::Duration::minutes(10), HOUR).await?;
        assert_eq!(active.map(|a| a.claim), Some(recorded.clone()));
        assert_eq!(ledger.history(&me, 10).await?.len(), 2);

        let first = rx.recv().await.expect("event");
        assert!(first.concerns(&me));

        assert!(ledger.retract_claim(&recorded).await?);
        assert_eq!(repo.len().await, 1);
        Ok(())
    }
}
