// tests/postgres_repository_tests.rs
//
// These run against a real Postgres when TEST_DATABASE_URL is set and are
// no-ops otherwise.

use std::sync::Arc;

use chrono::{Duration, Utc};

use couponbot_common::models::{ClaimRecord, CouponRecord, IdentityToken, NewClaim};
use couponbot_core::allocation::AllocationEngine;
use couponbot_core::catalog::CouponCatalog;
use couponbot_core::repositories::{
    ClaimRepository, CouponPoolRepository, PostgresClaimRepository, PostgresCouponRepository,
    PostgresRotationCursor, RotationCursorStore,
};
use couponbot_core::test_utils::helpers::setup_test_database;
use couponbot_core::Error;

#[tokio::test]
async fn test_coupon_conditional_update() -> Result<(), Error> {
    let Some(db) = setup_test_database().await? else {
        return Ok(());
    };
    let repo = PostgresCouponRepository::new(db.pool().clone());

    let record = CouponRecord::unclaimed("SAVE10");
    repo.insert_coupon(&record).await?;

    assert!(repo.mark_claimed(record.id).await?);
    assert!(!repo.mark_claimed(record.id).await?, "second mark must lose");
    assert!(repo.list_unclaimed(10).await?.is_empty());

    let status = repo.status().await?;
    assert_eq!((status.total, status.claimed), (1, 1));

    assert!(repo.release(record.id).await?);
    assert!(!repo.release(record.id).await?);
    assert_eq!(repo.list_unclaimed(10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pool_seed_and_recycle() -> Result<(), Error> {
    let Some(db) = setup_test_database().await? else {
        return Ok(());
    };
    let repo = Arc::new(PostgresCouponRepository::new(db.pool().clone()));
    let catalog = Arc::new(CouponCatalog::default());
    let engine = AllocationEngine::any_unclaimed(catalog.clone(), repo.clone(), 5, None);

    assert_eq!(engine.seed_pool().await? as usize, catalog.len());
    assert_eq!(engine.seed_pool().await?, 0, "seeding is idempotent");

    for _ in 0..catalog.len() {
        engine.allocate().await?;
    }
    assert_eq!(repo.status().await?.available(), 0);

    engine.allocate().await?;
    let status = repo.status().await?;
    assert_eq!(status.claimed, 1);
    Ok(())
}

#[tokio::test]
async fn test_recycle_waits_for_exhaustion() -> Result<(), Error> {
    let Some(db) = setup_test_database().await? else {
        return Ok(());
    };
    let repo = PostgresCouponRepository::new(db.pool().clone());
    let a = CouponRecord::unclaimed("SAVE10");
    let b = CouponRecord::unclaimed("SAVE20");
    repo.insert_coupon(&a).await?;
    repo.insert_coupon(&b).await?;

    assert!(repo.mark_claimed(a.id).await?);
    assert_eq!(repo.recycle_if_exhausted().await?, 0, "SAVE20 is still free");
    assert_eq!(repo.status().await?.claimed, 1);

    assert!(repo.mark_claimed(b.id).await?);
    assert_eq!(repo.recycle_if_exhausted().await?, 2);
    assert_eq!(repo.recycle_if_exhausted().await?, 0, "second recycle finds free records");
    Ok(())
}

#[tokio::test]
async fn test_claims_latest_and_history() -> Result<(), Error> {
    let Some(db) = setup_test_database().await? else {
        return Ok(());
    };
    let repo = PostgresClaimRepository::new(db.pool().clone());
    let me = IdentityToken::generate();
    let now = Utc::now();

    let older = ClaimRecord::from_new(NewClaim {
        identity: me.clone(),
        coupon_code: "SAVE10".into(),
        coupon_id: None,
        ip_address: Some("203.0.113.9".into()),
        claimed_at: now - Duration::hours(2),
    });
    let newer = ClaimRecord::from_new(NewClaim {
        identity: me.clone(),
        coupon_code: "BOGO50".into(),
        coupon_id: None,
        ip_address: None,
        claimed_at: now,
    });
    repo.insert_claim(&older).await?;
    repo.insert_claim(&newer).await?;

    let latest = repo.latest_for_identity(me.as_str()).await?.expect("latest claim");
    assert_eq!(latest.claim_id, newer.claim_id);
    assert_eq!(latest.coupon_code, "BOGO50");

    let history = repo.list_for_identity(me.as_str(), 10).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].ip_address.as_deref(), Some("203.0.113.9"));

    assert!(repo.latest_for_identity("nobody").await?.is_none());

    assert!(repo.delete_claim(newer.claim_id).await?);
    assert!(!repo.delete_claim(newer.claim_id).await?);
    let latest = repo.latest_for_identity(me.as_str()).await?.expect("older claim remains");
    assert_eq!(latest.claim_id, older.claim_id);
    Ok(())
}

#[tokio::test]
async fn test_rotation_cursor_advance_and_rewind() -> Result<(), Error> {
    let Some(db) = setup_test_database().await? else {
        return Ok(());
    };
    let cursor = PostgresRotationCursor::new(db.pool().clone());

    assert_eq!(cursor.position().await?, None);
    assert_eq!(cursor.advance(3).await?, 0);
    assert_eq!(cursor.advance(3).await?, 1);
    assert_eq!(cursor.advance(3).await?, 2);
    assert_eq!(cursor.advance(3).await?, 0, "wraps at catalog length");

    assert!(!cursor.rewind(2).await?, "stale rewind is ignored");
    assert!(cursor.rewind(0).await?);
    assert_eq!(cursor.advance(3).await?, 0);
    Ok(())
}
