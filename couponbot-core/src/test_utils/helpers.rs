// File: couponbot-core/src/test_utils/helpers.rs

use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::allocation::AllocationEngine;
use crate::catalog::CouponCatalog;
use crate::config::CouponConfig;
use crate::db::Database;
use crate::ledger::{LocalClaimLedger, SharedClaimLedger};
use crate::repositories::{InMemoryClaimRepository, InMemoryCouponPool, KeyValueCursor, MemoryStore};
use crate::services::CouponService;
use crate::utils::time::ManualClock;
use crate::Error;

/// Connection string for the Postgres test database, if one is configured.
/// Tests that need a real database return early when this is `None`.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok().filter(|s| !s.trim().is_empty())
}

pub async fn create_test_db_pool(url: &str) -> Result<Pool<Postgres>, Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Wipes out test data so each test can start fresh.
pub async fn clean_database(pool: &Pool<Postgres>) -> Result<(), Error> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            claims,
            coupons,
            rotation_cursor
        RESTART IDENTITY CASCADE;
    "#,
    )
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns a migrated, empty test DB handle, or `None` without a test database.
pub async fn setup_test_database() -> Result<Option<Database>, Error> {
    let Some(url) = test_database_url() else {
        info!("TEST_DATABASE_URL not set; skipping database test");
        return Ok(None);
    };

    let pool = create_test_db_pool(&url).await?;
    let db = Database::from_pool(pool);
    db.migrate().await?;
    clean_database(db.pool()).await?;

    Ok(Some(db))
}

/// Everything a local-mode test needs, wired over in-memory stores.
pub struct LocalHarness {
    pub store: Arc<MemoryStore>,
    pub cursor: Arc<KeyValueCursor>,
    pub clock: Arc<ManualClock>,
    pub service: CouponService,
}

pub fn local_harness(config: CouponConfig) -> LocalHarness {
    let store = Arc::new(MemoryStore::new());
    let cursor = Arc::new(KeyValueCursor::new(store.clone()));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Arc::new(AllocationEngine::round_robin(
        Arc::new(CouponCatalog::default()),
        cursor.clone(),
    ));
    let ledger = Arc::new(LocalClaimLedger::new(store.clone()));
    let service = CouponService::with_clock(engine, ledger, config, clock.clone());

    LocalHarness { store, cursor, clock, service }
}

/// Shared-mode wiring over in-memory pool and claim repositories.
pub struct SharedHarness {
    pub pool: Arc<InMemoryCouponPool>,
    pub claims: Arc<InMemoryClaimRepository>,
    pub clock: Arc<ManualClock>,
    pub service: CouponService,
}

pub async fn shared_harness(config: CouponConfig) -> Result<SharedHarness, Error> {
    let pool = Arc::new(InMemoryCouponPool::new());
    let claims = Arc::new(InMemoryClaimRepository::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = Arc::new(AllocationEngine::any_unclaimed(
        Arc::new(CouponCatalog::default()),
        pool.clone(),
        config.max_claim_attempts,
        None,
    ));
    engine.seed_pool().await?;
    let ledger = Arc::new(SharedClaimLedger::new(claims.clone()));
    let service = CouponService::with_clock(engine, ledger, config, clock.clone());

    Ok(SharedHarness { pool, claims, clock, service })
}
