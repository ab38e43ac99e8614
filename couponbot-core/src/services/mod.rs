// File: src/services/mod.rs

pub mod coupon_service;
pub mod ip_resolver;

pub use coupon_service::{CouponGrant, CouponService, GrantStatus};
pub use ip_resolver::IpResolver;
