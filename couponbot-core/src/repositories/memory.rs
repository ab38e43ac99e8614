// File: src/repositories/memory.rs
//! In-process stores. Used for ephemeral runs and as the backing store in tests.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use couponbot_common::models::{ClaimRecord, CouponRecord, PoolStatus};

use crate::repositories::{ClaimRepository, CouponPoolRepository, KeyValueStore};
use crate::Error;

#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), Error> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<(), Error> {
        self.values.remove(key);
        Ok(())
    }
}

/// Coupon pool held in a vector. Insertion order is kept, so "first unclaimed"
/// is deterministic here even though callers must not rely on it.
#[derive(Default)]
pub struct InMemoryCouponPool {
    records: Mutex<Vec<CouponRecord>>,
}

impl InMemoryCouponPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codes(codes: &[&str]) -> Self {
        let records = codes.iter().map(|code| CouponRecord::unclaimed(code)).collect();
        Self { records: Mutex::new(records) }
    }

    pub async fn snapshot(&self) -> Vec<CouponRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl CouponPoolRepository for InMemoryCouponPool {
    async fn insert_coupon(&self, record: &CouponRecord) -> Result<(), Error> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CouponRecord>, Error> {
        Ok(self.records.lock().await.clone())
    }

    async fn list_unclaimed(&self, limit: i64) -> Result<Vec<CouponRecord>, Error> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| !r.claimed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_claimed(&self, coupon_id: Uuid) -> Result<bool, Error> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id == coupon_id && !r.claimed) {
            Some(record) => {
                record.claimed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self, coupon_id: Uuid) -> Result<bool, Error> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.id == coupon_id && r.claimed) {
            Some(record) => {
                record.claimed = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recycle_if_exhausted(&self) -> Result<u64, Error> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| !r.claimed) {
            return Ok(0);
        }
        let mut flipped = 0;
        for record in records.iter_mut().filter(|r| r.claimed) {
            record.claimed = false;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn status(&self) -> Result<PoolStatus, Error> {
        let records = self.records.lock().await;
        Ok(PoolStatus {
            total: records.len() as u64,
            claimed: records.iter().filter(|r| r.claimed).count() as u64,
        })
    }
}

#[derive(Default)]
pub struct InMemoryClaimRepository {
    claims: Mutex<Vec<ClaimRecord>>,
}

impl InMemoryClaimRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.claims.lock().await.len()
    }
}

#[async_trait]
impl ClaimRepository for InMemoryClaimRepository {
    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<(), Error> {
        self.claims.lock().await.push(claim.clone());
        Ok(())
    }

    async fn delete_claim(&self, claim_id: Uuid) -> Result<bool, Error> {
        let mut claims = self.claims.lock().await;
        let before = claims.len();
        claims.retain(|c| c.claim_id != claim_id);
        Ok(claims.len() != before)
    }

    async fn latest_for_identity(&self, identity_token: &str) -> Result<Option<ClaimRecord>, Error> {
        let claims = self.claims.lock().await;
        // max_by_key keeps the last maximum, so equal timestamps resolve to the newest insert
        Ok(claims
            .iter()
            .filter(|c| c.identity_token == identity_token)
            .max_by_key(|c| c.claimed_at)
            .cloned())
    }

    async fn list_for_identity(
        &self,
        identity_token: &str,
        limit: i64,
    ) -> Result<Vec<ClaimRecord>, Error> {
        let claims = self.claims.lock().await;
        let mut matching: Vec<ClaimRecord> = claims
            .iter()
            .filter(|c| c.identity_token == identity_token)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_mark_claimed_is_conditional() -> Result<(), Error> {
        let pool = InMemoryCouponPool::with_codes(&["A"]);
        let id = pool.list_all().await?[0].id;

        assert!(pool.mark_claimed(id).await?);
        assert!(!pool.mark_claimed(id).await?, "second mark must lose");
        assert!(pool.release(id).await?);
        assert!(!pool.release(id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_recycle_only_when_exhausted() -> Result<(), Error> {
        let pool = InMemoryCouponPool::with_codes(&["A", "B"]);
        let ids: Vec<Uuid> = pool.list_all().await?.iter().map(|r| r.id).collect();

        pool.mark_claimed(ids[0]).await?;
        assert_eq!(pool.recycle_if_exhausted().await?, 0, "B is still free");
        assert_eq!(pool.status().await?.claimed, 1);

        pool.mark_claimed(ids[1]).await?;
        assert_eq!(pool.recycle_if_exhausted().await?, 2);
        assert_eq!(pool.status().await?.claimed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_claim_by_timestamp() -> Result<(), Error> {
        let repo = InMemoryClaimRepository::new();
        let now = Utc::now();
        let mk = |code: &str, at| ClaimRecord {
            claim_id: Uuid::new_v4(),
            identity_token: "tok".into(),
            coupon_code: code.into(),
            coupon_id: None,
            ip_address: None,
            claimed_at: at,
        };

        repo.insert_claim(&mk("NEW", now)).await?;
        repo.insert_claim(&mk("OLD", now - Duration::hours(2))).await?;

        let latest = repo.latest_for_identity("tok").await?.expect("claim");
        assert_eq!(latest.coupon_code, "NEW");
        assert!(repo.latest_for_identity("other").await?.is_none());

        let history = repo.list_for_identity("tok", 10).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].coupon_code, "OLD");
        Ok(())
    }
}
