//! src/eventbus/mod.rs
//!
//! In-process fan-out of coupon events to any number of subscribers over
//! bounded MPSC queues.
//!
//! Nothing in the claim path depends on an event arriving: subscribers use it
//! to refresh sooner than their next poll would. For that reason `publish`
//! never waits on a slow subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use couponbot_common::models::{ClaimRecord, IdentityToken};

#[derive(Debug, Clone)]
pub enum CouponEvent {
    /// A claim row was written for `claim.identity_token`.
    ClaimRecorded(ClaimRecord),

    /// The shared pool ran dry and every record was flipped back to unclaimed.
    PoolRecycled { released: u64, at: DateTime<Utc> },

    /// An identity token was dropped (debug reset).
    IdentityReset,
}

impl CouponEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::ClaimRecorded(_) => "claim.recorded",
            CouponEvent::PoolRecycled { .. } => "pool.recycled",
            CouponEvent::IdentityReset => "identity.reset",
        }
    }

    /// Whether a subscriber watching `identity` should care about this event.
    pub fn concerns(&self, identity: &IdentityToken) -> bool {
        match self {
            CouponEvent::ClaimRecorded(claim) => claim.belongs_to(identity),
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<CouponEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Default size for each subscriber's buffer.
const DEFAULT_BUFFER_SIZE: usize = 64;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Resolves once `shutdown` has been called.
    pub async fn closed(&self) {
        let mut rx = self.shutdown_rx.clone();
        let _ = rx.wait_for(|down| *down).await;
    }

    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<CouponEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Deliver to every live subscriber. A full queue drops the event for
    /// that subscriber only; a closed one is removed.
    pub async fn publish(&self, event: CouponEvent) {
        let mut subs = self.subscribers.lock().await;
        subs.retain(|s| match s.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Subscriber queue full, dropping {} event", event.event_type());
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
