use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::models::{ClaimRecord, CouponRecord, PoolStatus};

/// Flat string store for the local variant: identity token, rotation cursor
/// and the single claim slot all live under their own key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>, Error>;
    async fn set_value(&self, key: &str, value: &str) -> Result<(), Error>;
    async fn delete_value(&self, key: &str) -> Result<(), Error>;
}

/// Persisted round-robin position. The stored value is the index handed out
/// last; "before the first element" reads back as `None`.
#[async_trait]
pub trait RotationCursorStore: Send + Sync {
    async fn position(&self) -> Result<Option<usize>, Error>;

    /// Moves the cursor to `(position + 1) % len` in one step and returns the
    /// new index. `len` must be non-zero.
    async fn advance(&self, len: usize) -> Result<usize, Error>;

    /// Steps the cursor back by one, but only if it still reads `expected`.
    /// Returns whether anything changed.
    async fn rewind(&self, expected: usize) -> Result<bool, Error>;
}

#[async_trait]
pub trait CouponPoolRepository: Send + Sync {
    async fn insert_coupon(&self, record: &CouponRecord) -> Result<(), Error>;
    async fn list_all(&self) -> Result<Vec<CouponRecord>, Error>;

    /// Up to `limit` records with `claimed = false`, in no particular order.
    async fn list_unclaimed(&self, limit: i64) -> Result<Vec<CouponRecord>, Error>;

    /// `claimed = true WHERE id = $1 AND claimed = false`. `false` means the
    /// record was already taken.
    async fn mark_claimed(&self, coupon_id: Uuid) -> Result<bool, Error>;

    /// `claimed = false WHERE id = $1 AND claimed = true`.
    async fn release(&self, coupon_id: Uuid) -> Result<bool, Error>;

    /// Sets every record back to unclaimed, but only while none is free.
    /// Returns how many flipped; `0` means someone else already recycled.
    async fn recycle_if_exhausted(&self) -> Result<u64, Error>;

    async fn status(&self) -> Result<PoolStatus, Error>;
}

#[async_trait]
pub trait ClaimRepository: Send + Sync {
    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<(), Error>;

    /// Removes a claim whose request was abandoned. `false` if it was not there.
    async fn delete_claim(&self, claim_id: Uuid) -> Result<bool, Error>;

    /// Most recent claim for the token by `claimed_at`.
    async fn latest_for_identity(&self, identity_token: &str) -> Result<Option<ClaimRecord>, Error>;

    /// Newest first.
    async fn list_for_identity(
        &self,
        identity_token: &str,
        limit: i64,
    ) -> Result<Vec<ClaimRecord>, Error>;
}
