// File: couponbot-core/src/repositories/postgres/claims.rs

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use couponbot_common::models::ClaimRecord;
use couponbot_common::traits::repository_traits::ClaimRepository;

use crate::Error;

#[derive(Clone)]
pub struct PostgresClaimRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresClaimRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_claim(r: &PgRow) -> Result<ClaimRecord, Error> {
    Ok(ClaimRecord {
        claim_id: r.try_get("id")?,
        identity_token: r.try_get("cookie_token")?,
        coupon_code: r.try_get("coupon_code")?,
        coupon_id: r.try_get("coupon_id")?,
        ip_address: r.try_get("ip_address")?,
        claimed_at: r.try_get("claimed_at")?,
    })
}

#[async_trait]
impl ClaimRepository for PostgresClaimRepository {
    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO claims (
                id,
                coupon_id,
                coupon_code,
                cookie_token,
                ip_address,
                claimed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
            .bind(claim.claim_id)
            .bind(claim.coupon_id)
            .bind(&claim.coupon_code)
            .bind(&claim.identity_token)
            .bind(&claim.ip_address)
            .bind(claim.claimed_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_claim(&self, claim_id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM claims WHERE id = $1")
            .bind(claim_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_for_identity(&self, identity_token: &str) -> Result<Option<ClaimRecord>, Error> {
        let row_opt = sqlx::query(
            r#"
            SELECT id, coupon_id, coupon_code, cookie_token, ip_address, claimed_at
            FROM claims
            WHERE cookie_token = $1
            ORDER BY claimed_at DESC
            LIMIT 1
            "#,
        )
            .bind(identity_token)
            .fetch_optional(&self.pool)
            .await?;

        match row_opt {
            Some(r) => Ok(Some(row_to_claim(&r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_identity(
        &self,
        identity_token: &str,
        limit: i64,
    ) -> Result<Vec<ClaimRecord>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, coupon_id, coupon_code, cookie_token, ip_address, claimed_at
            FROM claims
            WHERE cookie_token = $1
            ORDER BY claimed_at DESC
            LIMIT $2
            "#,
        )
            .bind(identity_token)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut list = Vec::with_capacity(rows.len());
        for r in rows {
            list.push(row_to_claim(&r)?);
        }
        Ok(list)
    }
}
