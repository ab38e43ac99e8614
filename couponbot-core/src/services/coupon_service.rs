// File: src/services/coupon_service.rs
//! Request flow tying the ledger and the allocation engine together.
//!
//! 1. Ask the ledger for an active claim. If there is one, hand it back as is.
//! 2. Otherwise allocate a coupon and record the claim.
//!
//! Every request is bounded by `request_timeout`. If recording fails after
//! the allocation went through, the allocation is released again before the
//! error is returned. A request that times out is rolled back by its
//! detached issue task once the store calls actually finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use couponbot_common::models::{ClaimRecord, CouponDefinition, IdentityToken, NewClaim, PoolStatus};

use crate::allocation::{Allocation, AllocationEngine};
use crate::config::CouponConfig;
use crate::ledger::{ActiveClaim, ClaimLedger};
use crate::utils::time::{format_remaining, Clock, SystemClock};
use crate::{ClaimFailure, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// A new coupon was allocated for this request.
    Issued,
    /// The requester already held an unexpired coupon; nothing changed.
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponGrant {
    pub coupon: CouponDefinition,
    pub claim: ClaimRecord,
    pub cooldown_remaining: Duration,
    pub status: GrantStatus,
}

impl CouponGrant {
    pub fn formatted_remaining(&self) -> String {
        format_remaining(self.cooldown_remaining)
    }

    pub fn is_new(&self) -> bool {
        self.status == GrantStatus::Issued
    }

    pub fn available_again_at(&self, cooldown: Duration) -> DateTime<Utc> {
        self.claim.claimed_at + chrono::Duration::from_std(cooldown).unwrap_or(chrono::Duration::zero())
    }
}

pub struct CouponService {
    engine: Arc<AllocationEngine>,
    ledger: Arc<dyn ClaimLedger>,
    clock: Arc<dyn Clock>,
    config: CouponConfig,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl CouponService {
    pub fn new(engine: Arc<AllocationEngine>, ledger: Arc<dyn ClaimLedger>, config: CouponConfig) -> Self {
        Self::with_clock(engine, ledger, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        engine: Arc<AllocationEngine>,
        ledger: Arc<dyn ClaimLedger>,
        config: CouponConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            ledger,
            clock,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CouponConfig {
        &self.config
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.engine
    }

    /// Hand `identity` a coupon, or the one it already holds.
    ///
    /// Requests for the same identity are handled one at a time within this
    /// process, so a double click cannot slip two allocations past the
    /// active-claim check.
    pub async fn request_coupon(
        &self,
        identity: &IdentityToken,
        ip_address: Option<String>,
    ) -> Result<CouponGrant, ClaimFailure> {
        let lock = self
            .in_flight
            .entry(identity.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        // An abandoned issue task may still hold the lock while it undoes itself.
        let result = match tokio::time::timeout(self.config.request_timeout, lock.clone().lock_owned()).await {
            Ok(guard) => self.request_locked(identity, ip_address, guard).await,
            Err(elapsed) => {
                warn!("Timed out waiting for an earlier request of the same identity");
                Err(ClaimFailure::from(Error::Timeout(elapsed)))
            }
        };

        drop(lock);
        self.in_flight
            .remove_if(identity.as_str(), |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn request_locked(
        &self,
        identity: &IdentityToken,
        ip_address: Option<String>,
        guard: OwnedMutexGuard<()>,
    ) -> Result<CouponGrant, ClaimFailure> {
        if let Some(active) = self.active_claim(identity).await? {
            info!(
                "Identity already holds {} ({} left)",
                active.claim.coupon_code,
                format_remaining(active.remaining)
            );
            return Ok(self.grant_from_active(active));
        }

        // Allocation and recording run detached from this caller. If we stop
        // waiting, the task still sees the writes through and then undoes them.
        let (tx, mut rx) = oneshot::channel();
        let job = IssueJob {
            engine: self.engine.clone(),
            ledger: self.ledger.clone(),
            identity: identity.clone(),
            ip_address,
            claimed_at: self.clock.now(),
        };
        tokio::spawn(async move {
            let _guard = guard;
            job.run(tx).await;
        });

        match tokio::time::timeout(self.config.request_timeout, &mut rx).await {
            Ok(Ok(outcome)) => self.finish_issue(outcome),
            Ok(Err(_)) => Err(ClaimFailure::TransientFailure("claim task ended without a result".into())),
            Err(elapsed) => {
                rx.close();
                match rx.try_recv() {
                    // Landed right at the deadline; still ours.
                    Ok(outcome) => self.finish_issue(outcome),
                    Err(_) => {
                        warn!("Claim request timed out; its writes will be rolled back");
                        Err(ClaimFailure::from(Error::Timeout(elapsed)))
                    }
                }
            }
        }
    }

    fn finish_issue(&self, outcome: IssueOutcome) -> Result<CouponGrant, ClaimFailure> {
        let (allocation, claim) = outcome.map_err(ClaimFailure::from)?;
        info!("Issued coupon {} via {}", allocation.coupon.code, self.engine.policy());
        Ok(CouponGrant {
            coupon: allocation.coupon,
            claim,
            cooldown_remaining: self.config.cooldown,
            status: GrantStatus::Issued,
        })
    }

    /// The active claim for `identity`, if any. Never allocates.
    pub async fn current_claim(&self, identity: &IdentityToken) -> Result<Option<CouponGrant>, ClaimFailure> {
        Ok(self
            .active_claim(identity)
            .await?
            .map(|active| self.grant_from_active(active)))
    }

    pub async fn formatted_remaining(&self, identity: &IdentityToken) -> Result<Option<String>, ClaimFailure> {
        Ok(self
            .current_claim(identity)
            .await?
            .map(|grant| grant.formatted_remaining()))
    }

    pub async fn pool_status(&self) -> Result<Option<PoolStatus>, ClaimFailure> {
        Ok(self.bounded(self.engine.pool_status()).await?)
    }

    async fn active_claim(&self, identity: &IdentityToken) -> Result<Option<ActiveClaim>, ClaimFailure> {
        let now = self.clock.now();
        Ok(self
            .bounded(self.ledger.get_active_claim(identity, now, self.config.cooldown))
            .await?)
    }

    fn grant_from_active(&self, active: ActiveClaim) -> CouponGrant {
        CouponGrant {
            coupon: self.engine.catalog().lookup(&active.claim.coupon_code),
            claim: active.claim,
            cooldown_remaining: active.remaining,
            status: GrantStatus::AlreadyActive,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(Error::Timeout(elapsed)),
        }
    }
}

type IssueOutcome = Result<(Allocation, ClaimRecord), Error>;

/// Everything the detached allocate-then-record step needs.
struct IssueJob {
    engine: Arc<AllocationEngine>,
    ledger: Arc<dyn ClaimLedger>,
    identity: IdentityToken,
    ip_address: Option<String>,
    claimed_at: DateTime<Utc>,
}

impl IssueJob {
    async fn run(self, tx: oneshot::Sender<IssueOutcome>) {
        let allocation = match self.engine.allocate().await {
            Ok(allocation) => allocation,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        if tx.is_closed() {
            warn!("Caller gave up during allocation; releasing {}", allocation.coupon.code);
            self.release(&allocation).await;
            return;
        }

        let new_claim = NewClaim {
            identity: self.identity.clone(),
            coupon_code: allocation.coupon.code.clone(),
            coupon_id: allocation.coupon_id(),
            ip_address: self.ip_address.clone(),
            claimed_at: self.claimed_at,
        };

        let claim = match self.ledger.record_claim(new_claim).await {
            Ok(claim) => claim,
            Err(e) => {
                warn!("Recording claim for {} failed: {}", allocation.coupon.code, e);
                self.release(&allocation).await;
                let _ = tx.send(Err(e));
                return;
            }
        };

        if let Err(Ok((allocation, claim))) = tx.send(Ok((allocation, claim))) {
            warn!("Caller gave up while recording; retracting claim for {}", allocation.coupon.code);
            if let Err(e) = self.ledger.retract_claim(&claim).await {
                error!("Could not retract claim {}: {}", claim.claim_id, e);
            }
            self.release(&allocation).await;
        }
    }

    async fn release(&self, allocation: &Allocation) {
        match self.engine.release(allocation).await {
            Ok(true) => info!("Released {} after failed claim", allocation.coupon.code),
            Ok(false) => warn!("Nothing to release for {}; state moved on", allocation.coupon.code),
            Err(e) => error!("Could not release {} after failed claim: {}", allocation.coupon.code, e),
        }
    }
}
