// src/repositories/mod.rs

pub mod cursor;
pub mod file;
pub mod memory;
pub mod postgres;

pub use couponbot_common::traits::repository_traits::{
    ClaimRepository,
    CouponPoolRepository,
    KeyValueStore,
    RotationCursorStore,
};

pub use cursor::KeyValueCursor;
pub use file::FileStore;
pub use memory::{InMemoryClaimRepository, InMemoryCouponPool, MemoryStore};
pub use postgres::{PostgresClaimRepository, PostgresCouponRepository, PostgresRotationCursor};
