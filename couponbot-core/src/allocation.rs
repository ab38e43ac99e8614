//! Picking the next coupon to hand out.
//!
//! Two policies live behind `AllocationEngine`:
//!
//! - **round-robin**: a persisted cursor walks the catalog in order, one step
//!   per distribution, wrapping forever.
//! - **any-unclaimed**: the shared pool is scanned for a record that is still
//!   free; when none is left the whole pool is flipped back to free first.
//!
//! Both expose `release`, which undoes an allocation whose claim could not be
//! written so no coupon is left marked as taken by nobody.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use couponbot_common::models::{CouponDefinition, CouponRecord, PoolStatus};

use crate::catalog::CouponCatalog;
use crate::config::AllocationPolicy;
use crate::eventbus::{CouponEvent, EventBus};
use crate::repositories::{CouponPoolRepository, RotationCursorStore};
use crate::Error;

/// How many free records to fetch per round. Losing the conditional update
/// on one just moves on to the next.
const CANDIDATE_BATCH: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    Rotation { index: usize },
    Pool { coupon_id: Uuid },
}

/// A coupon that has been taken out of circulation but not yet recorded
/// against anyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub coupon: CouponDefinition,
    pub source: AllocationSource,
}

impl Allocation {
    pub fn coupon_id(&self) -> Option<Uuid> {
        match self.source {
            AllocationSource::Pool { coupon_id } => Some(coupon_id),
            AllocationSource::Rotation { .. } => None,
        }
    }
}

pub struct RoundRobinAllocator {
    catalog: Arc<CouponCatalog>,
    cursor: Arc<dyn RotationCursorStore>,
}

impl RoundRobinAllocator {
    pub fn new(catalog: Arc<CouponCatalog>, cursor: Arc<dyn RotationCursorStore>) -> Self {
        Self { catalog, cursor }
    }

    /// Advance the cursor and return the coupon it now points at.
    pub async fn next_coupon(&self) -> Result<(usize, CouponDefinition), Error> {
        if self.catalog.is_empty() {
            return Err(Error::NoCouponsAvailable);
        }
        let index = self.cursor.advance(self.catalog.len()).await?;
        let coupon = self
            .catalog
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Parse(format!("cursor index {index} outside catalog")))?;
        debug!("Round-robin picked {} at index {}", coupon.code, index);
        Ok((index, coupon))
    }

    pub async fn rewind(&self, index: usize) -> Result<bool, Error> {
        self.cursor.rewind(index).await
    }

    pub async fn position(&self) -> Result<Option<usize>, Error> {
        self.cursor.position().await
    }
}

pub struct PoolAllocator {
    catalog: Arc<CouponCatalog>,
    pool: Arc<dyn CouponPoolRepository>,
    max_attempts: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl PoolAllocator {
    pub fn new(
        catalog: Arc<CouponCatalog>,
        pool: Arc<dyn CouponPoolRepository>,
        max_attempts: u32,
    ) -> Self {
        Self {
            catalog,
            pool,
            max_attempts: max_attempts.max(1),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Take any unclaimed record and mark it claimed.
    ///
    /// Which free record wins is up to the store. If the pool is fully
    /// claimed it is recycled first; the recycle is a no-op once any record
    /// is free again, so a late recycler cannot undo a concurrent claim. Marking is a conditional update, so a
    /// record grabbed by a concurrent caller in between is skipped rather
    /// than handed out twice.
    pub async fn claim_any(&self) -> Result<CouponRecord, Error> {
        for attempt in 1..=self.max_attempts {
            let mut candidates = self.pool.list_unclaimed(CANDIDATE_BATCH).await?;

            if candidates.is_empty() {
                let status = self.pool.status().await?;
                if status.total == 0 {
                    return Err(Error::NoCouponsAvailable);
                }
                let released = self.pool.recycle_if_exhausted().await?;
                if released > 0 {
                    info!("Coupon pool exhausted; recycled {} coupons", released);
                    if let Some(bus) = &self.event_bus {
                        bus.publish(CouponEvent::PoolRecycled { released, at: Utc::now() }).await;
                    }
                } else {
                    debug!("Pool already recycled by a concurrent caller");
                }
                candidates = self.pool.list_unclaimed(CANDIDATE_BATCH).await?;
            }

            for candidate in candidates {
                if self.pool.mark_claimed(candidate.id).await? {
                    debug!("Claimed pool coupon {} ({})", candidate.code, candidate.id);
                    return Ok(CouponRecord { claimed: true, ..candidate });
                }
                debug!("Coupon {} was taken concurrently (attempt {})", candidate.id, attempt);
            }
        }

        warn!("Gave up claiming a pool coupon after {} attempts", self.max_attempts);
        Err(Error::Contention(self.max_attempts))
    }

    pub async fn release(&self, coupon_id: Uuid) -> Result<bool, Error> {
        self.pool.release(coupon_id).await
    }

    /// Insert an unclaimed record for every catalog code the pool lacks.
    /// Existing rows, including extra copies seeded by hand, are left alone.
    pub async fn seed_pool(&self) -> Result<u64, Error> {
        let existing: HashSet<String> = self
            .pool
            .list_all()
            .await?
            .into_iter()
            .map(|r| r.code)
            .collect();

        let mut inserted = 0;
        for coupon in self.catalog.iter() {
            if existing.contains(&coupon.code) {
                continue;
            }
            self.pool.insert_coupon(&CouponRecord::unclaimed(&coupon.code)).await?;
            inserted += 1;
        }
        if inserted > 0 {
            info!("Seeded {} new coupons into the pool", inserted);
        }
        Ok(inserted)
    }

    pub async fn status(&self) -> Result<PoolStatus, Error> {
        self.pool.status().await
    }
}

pub enum AllocationEngine {
    RoundRobin(RoundRobinAllocator),
    AnyUnclaimed(PoolAllocator),
}

impl AllocationEngine {
    pub fn round_robin(catalog: Arc<CouponCatalog>, cursor: Arc<dyn RotationCursorStore>) -> Self {
        AllocationEngine::RoundRobin(RoundRobinAllocator::new(catalog, cursor))
    }

    pub fn any_unclaimed(
        catalog: Arc<CouponCatalog>,
        pool: Arc<dyn CouponPoolRepository>,
        max_attempts: u32,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        let mut allocator = PoolAllocator::new(catalog, pool, max_attempts);
        if let Some(bus) = event_bus {
            allocator = allocator.with_event_bus(bus);
        }
        AllocationEngine::AnyUnclaimed(allocator)
    }

    pub fn policy(&self) -> AllocationPolicy {
        match self {
            AllocationEngine::RoundRobin(_) => AllocationPolicy::RoundRobin,
            AllocationEngine::AnyUnclaimed(_) => AllocationPolicy::AnyUnclaimed,
        }
    }

    pub fn catalog(&self) -> &CouponCatalog {
        match self {
            AllocationEngine::RoundRobin(a) => a.catalog.as_ref(),
            AllocationEngine::AnyUnclaimed(a) => a.catalog.as_ref(),
        }
    }

    pub async fn allocate(&self) -> Result<Allocation, Error> {
        match self {
            AllocationEngine::RoundRobin(allocator) => {
                let (index, coupon) = allocator.next_coupon().await?;
                Ok(Allocation {
                    coupon,
                    source: AllocationSource::Rotation { index },
                })
            }
            AllocationEngine::AnyUnclaimed(allocator) => {
                let record = allocator.claim_any().await?;
                Ok(Allocation {
                    coupon: allocator.catalog.lookup(&record.code),
                    source: AllocationSource::Pool { coupon_id: record.id },
                })
            }
        }
    }

    /// Undo `allocation`. Conditional in both policies: a cursor that has
    /// moved on, or a record already freed by a recycle, is left as is.
    pub async fn release(&self, allocation: &Allocation) -> Result<bool, Error> {
        match (self, allocation.source) {
            (AllocationEngine::RoundRobin(a), AllocationSource::Rotation { index }) => a.rewind(index).await,
            (AllocationEngine::AnyUnclaimed(a), AllocationSource::Pool { coupon_id }) => a.release(coupon_id).await,
            _ => Err(Error::Config("allocation does not belong to this engine".into())),
        }
    }

    /// No-op for round-robin, which has no pool.
    pub async fn seed_pool(&self) -> Result<u64, Error> {
        match self {
            AllocationEngine::RoundRobin(_) => Ok(0),
            AllocationEngine::AnyUnclaimed(a) => a.seed_pool().await,
        }
    }

    pub async fn pool_status(&self) -> Result<Option<PoolStatus>, Error> {
        match self {
            AllocationEngine::RoundRobin(_) => Ok(None),
            AllocationEngine::AnyUnclaimed(a) => Ok(Some(a.status().await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{InMemoryCouponPool, KeyValueCursor, MemoryStore};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Pool whose recycle step parks until the test lets it through.
    struct GatedRecycle {
        inner: Arc<InMemoryCouponPool>,
        entered: Arc<Notify>,
        proceed: Arc<Notify>,
    }

    #[async_trait]
    impl CouponPoolRepository for GatedRecycle {
        async fn insert_coupon(&self, record: &CouponRecord) -> Result<(), Error> {
            self.inner.insert_coupon(record).await
        }

        async fn list_all(&self) -> Result<Vec<CouponRecord>, Error> {
            self.inner.list_all().await
        }

        async fn list_unclaimed(&self, limit: i64) -> Result<Vec<CouponRecord>, Error> {
            self.inner.list_unclaimed(limit).await
        }

        async fn mark_claimed(&self, coupon_id: Uuid) -> Result<bool, Error> {
            self.inner.mark_claimed(coupon_id).await
        }

        async fn release(&self, coupon_id: Uuid) -> Result<bool, Error> {
            self.inner.release(coupon_id).await
        }

        async fn recycle_if_exhausted(&self) -> Result<u64, Error> {
            self.entered.notify_one();
            self.proceed.notified().await;
            self.inner.recycle_if_exhausted().await
        }

        async fn status(&self) -> Result<PoolStatus, Error> {
            self.inner.status().await
        }
    }

    fn rr_engine() -> (AllocationEngine, Arc<KeyValueCursor>) {
        let cursor = Arc::new(KeyValueCursor::new(Arc::new(MemoryStore::new())));
        let engine = AllocationEngine::round_robin(Arc::new(CouponCatalog::default()), cursor.clone());
        (engine, cursor)
    }

    #[tokio::test]
    async fn test_round_robin_visits_catalog_in_order_then_wraps() -> Result<(), Error> {
        let (engine, _) = rr_engine();
        let catalog = CouponCatalog::default();

        let mut seen = Vec::new();
        for _ in 0..catalog.len() {
            seen.push(engine.allocate().await?.coupon.code);
        }
        assert_eq!(seen, catalog.codes());

        let wrapped = engine.allocate().await?;
        assert_eq!(wrapped.coupon.code, "SAVE10");
        assert_eq!(wrapped.source, AllocationSource::Rotation { index: 0 });
        Ok(())
    }

    #[tokio::test]
    async fn test_round_robin_release_rewinds_cursor() -> Result<(), Error> {
        let (engine, cursor) = rr_engine();
        engine.allocate().await?;
        let second = engine.allocate().await?;
        assert!(engine.release(&second).await?);
        assert_eq!(cursor.position().await?, Some(0));

        // the rewound slot is handed out again
        assert_eq!(engine.allocate().await?.coupon, second.coupon);
        Ok(())
    }

    #[tokio::test]
    async fn test_round_robin_empty_catalog() {
        let cursor = Arc::new(KeyValueCursor::new(Arc::new(MemoryStore::new())));
        let empty = Arc::new(CouponCatalog::new(vec![]).unwrap());
        let engine = AllocationEngine::round_robin(empty, cursor);
        assert!(matches!(engine.allocate().await, Err(Error::NoCouponsAvailable)));
    }

    #[tokio::test]
    async fn test_pool_recycles_when_exhausted() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["SAVE10", "SAVE20", "FREESHIP"]));
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(None).await;
        let engine = AllocationEngine::any_unclaimed(
            Arc::new(CouponCatalog::default()),
            pool.clone(),
            3,
            Some(bus),
        );

        for _ in 0..3 {
            engine.allocate().await?;
        }
        assert_eq!(pool.status().await?.claimed, 3);

        let after_recycle = engine.allocate().await?;
        assert!(after_recycle.coupon_id().is_some());
        let status = pool.status().await?;
        assert_eq!(status.claimed, 1, "exactly one record claimed after a recycle");
        assert_eq!(status.total, 3);
        assert!(matches!(rx.recv().await, Some(CouponEvent::PoolRecycled { released: 3, .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_late_recycle_does_not_reclaim_fresh_allocation() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["SAVE10", "SAVE20"]));
        for record in pool.snapshot().await {
            pool.mark_claimed(record.id).await?;
        }

        let entered = Arc::new(Notify::new());
        let proceed = Arc::new(Notify::new());
        let catalog = Arc::new(CouponCatalog::default());
        let slow = AllocationEngine::any_unclaimed(
            catalog.clone(),
            Arc::new(GatedRecycle {
                inner: pool.clone(),
                entered: entered.clone(),
                proceed: proceed.clone(),
            }),
            3,
            None,
        );
        let fast = AllocationEngine::any_unclaimed(catalog, pool.clone(), 3, None);

        // The slow caller sees the exhausted pool and parks before recycling.
        let slow_task = tokio::spawn(async move { slow.allocate().await });
        entered.notified().await;

        // Meanwhile another caller recycles and takes a record.
        let first = fast.allocate().await?;
        proceed.notify_one();
        let second = slow_task.await.expect("allocation task panicked")?;

        assert_ne!(first.coupon_id(), second.coupon_id(), "one record handed out twice");
        assert_eq!(pool.status().await?.claimed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_hands_out_each_record_once_per_cycle() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["SAVE10", "SAVE20", "FREESHIP", "BOGO50"]));
        let engine = AllocationEngine::any_unclaimed(Arc::new(CouponCatalog::default()), pool, 3, None);

        let mut ids = HashSet::new();
        for _ in 0..4 {
            let allocation = engine.allocate().await?;
            assert!(ids.insert(allocation.coupon_id()));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_pool_has_no_coupons() {
        let engine = AllocationEngine::any_unclaimed(
            Arc::new(CouponCatalog::default()),
            Arc::new(InMemoryCouponPool::new()),
            3,
            None,
        );
        assert!(matches!(engine.allocate().await, Err(Error::NoCouponsAvailable)));
    }

    #[tokio::test]
    async fn test_pool_record_with_unknown_code_uses_fallback() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["LEGACY5"]));
        let engine = AllocationEngine::any_unclaimed(Arc::new(CouponCatalog::default()), pool, 3, None);
        let allocation = engine.allocate().await?;
        assert_eq!(allocation.coupon.code, "LEGACY5");
        assert_eq!(allocation.coupon.description, "Special offer");
        Ok(())
    }

    #[tokio::test]
    async fn test_seed_pool_only_adds_missing_codes() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["SAVE10", "SAVE10"]));
        let engine = AllocationEngine::any_unclaimed(Arc::new(CouponCatalog::default()), pool.clone(), 3, None);

        assert_eq!(engine.seed_pool().await?, 4);
        assert_eq!(engine.seed_pool().await?, 0);
        assert_eq!(pool.status().await?.total, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_pool_release_frees_record() -> Result<(), Error> {
        let pool = Arc::new(InMemoryCouponPool::with_codes(&["SAVE10"]));
        let engine = AllocationEngine::any_unclaimed(Arc::new(CouponCatalog::default()), pool.clone(), 3, None);

        let allocation = engine.allocate().await?;
        assert!(engine.release(&allocation).await?);
        assert_eq!(pool.status().await?.claimed, 0);
        assert!(!engine.release(&allocation).await?);
        Ok(())
    }
}
