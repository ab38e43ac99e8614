// couponbot-common/src/models/mod.rs

pub mod claim;
pub mod coupon;
pub mod identity;

pub use claim::{ClaimRecord, NewClaim};
pub use coupon::{CouponDefinition, CouponRecord, PoolStatus};
pub use identity::IdentityToken;
