// File: couponbot-common/src/models/claim.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::identity::IdentityToken;

/// One distribution event to one identity. Never updated in place; an old
/// record just stops being active once its cooldown runs out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: Uuid,
    pub identity_token: String,
    pub coupon_code: String,

    /// Pool row this claim consumed. `None` when the coupon came from the
    /// round-robin cursor instead of the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    pub claimed_at: DateTime<Utc>,
}

/// Input for `ClaimLedger::record_claim`.
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub identity: IdentityToken,
    pub coupon_code: String,
    pub coupon_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn from_new(new_claim: NewClaim) -> Self {
        Self {
            claim_id: Uuid::new_v4(),
            identity_token: new_claim.identity.as_str().to_string(),
            coupon_code: new_claim.coupon_code,
            coupon_id: new_claim.coupon_id,
            ip_address: new_claim.ip_address,
            claimed_at: new_claim.claimed_at,
        }
    }

    pub fn belongs_to(&self, identity: &IdentityToken) -> bool {
        self.identity_token == identity.as_str()
    }
}
