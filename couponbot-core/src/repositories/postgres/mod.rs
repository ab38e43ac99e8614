// src/repositories/postgres/mod.rs

pub mod claims;
pub mod coupons;
pub mod rotation_cursor;

pub use claims::PostgresClaimRepository;
pub use coupons::PostgresCouponRepository;
pub use rotation_cursor::PostgresRotationCursor;
