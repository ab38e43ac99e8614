// File: couponbot-core/src/repositories/postgres/coupons.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use couponbot_common::models::{CouponRecord, PoolStatus};
use couponbot_common::traits::repository_traits::CouponPoolRepository;

use crate::Error;

/// Advisory lock id taken while recycling the pool.
const RECYCLE_LOCK_KEY: i64 = 0x636f_7570_6f6e;

#[derive(Clone)]
pub struct PostgresCouponRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresCouponRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CouponPoolRepository for PostgresCouponRepository {
    async fn insert_coupon(&self, record: &CouponRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO coupons (id, code, claimed)
            VALUES ($1, $2, $3)
            "#,
        )
            .bind(record.id)
            .bind(&record.code)
            .bind(record.claimed)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<CouponRecord>, Error> {
        let rows = sqlx::query_as::<_, CouponRecord>(
            r#"
            SELECT id, code, claimed
            FROM coupons
            ORDER BY code ASC
            "#,
        )
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_unclaimed(&self, limit: i64) -> Result<Vec<CouponRecord>, Error> {
        // No ORDER BY: which free coupon comes back first is up to the planner.
        let rows = sqlx::query_as::<_, CouponRecord>(
            r#"
            SELECT id, code, claimed
            FROM coupons
            WHERE claimed = false
            LIMIT $1
            "#,
        )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn mark_claimed(&self, coupon_id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET claimed = true
            WHERE id = $1
              AND claimed = false
            "#,
        )
            .bind(coupon_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, coupon_id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET claimed = false
            WHERE id = $1
              AND claimed = true
            "#,
        )
            .bind(coupon_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recycle_if_exhausted(&self) -> Result<u64, Error> {
        let mut tx = self.pool.begin().await?;

        // Serializes recyclers; the update below then runs on a fresh
        // snapshot and sees any recycle that committed while we waited.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(RECYCLE_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE coupons
            SET claimed = false
            WHERE claimed = true
              AND NOT EXISTS (SELECT 1 FROM coupons WHERE claimed = false)
            "#,
        )
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn status(&self) -> Result<PoolStatus, Error> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE claimed) AS claimed
            FROM coupons
            "#,
        )
            .fetch_one(&self.pool)
            .await?;

        let total: i64 = row.try_get("total")?;
        let claimed: i64 = row.try_get("claimed")?;
        Ok(PoolStatus {
            total: total as u64,
            claimed: claimed as u64,
        })
    }
}
