// File: couponbot-common/src/models/coupon.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One offer in the catalog. Defined at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDefinition {
    pub code: String,
    pub description: String,
    #[serde(alias = "discount")]
    pub discount_label: String,
}

impl CouponDefinition {
    pub fn new(code: &str, description: &str, discount_label: &str) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            discount_label: discount_label.to_string(),
        }
    }
}

/// A row in the shared coupon pool. `claimed` flips between distribution cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CouponRecord {
    pub id: Uuid,
    pub code: String,
    pub claimed: bool,
}

impl CouponRecord {
    pub fn unclaimed(code: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.to_string(),
            claimed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total: u64,
    pub claimed: u64,
}

impl PoolStatus {
    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.claimed)
    }
}
