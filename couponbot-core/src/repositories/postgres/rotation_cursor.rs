// File: couponbot-core/src/repositories/postgres/rotation_cursor.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use couponbot_common::traits::repository_traits::RotationCursorStore;

use crate::Error;

pub const DEFAULT_CURSOR_NAME: &str = "default";

/// Round-robin cursor stored as one row of `rotation_cursor`, so every server
/// instance shares the same position.
#[derive(Clone)]
pub struct PostgresRotationCursor {
    pool: Pool<Postgres>,
    name: String,
}

impl PostgresRotationCursor {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::named(pool, DEFAULT_CURSOR_NAME)
    }

    pub fn named(pool: Pool<Postgres>, name: &str) -> Self {
        Self {
            pool,
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl RotationCursorStore for PostgresRotationCursor {
    async fn position(&self) -> Result<Option<usize>, Error> {
        let row = sqlx::query("SELECT position FROM rotation_cursor WHERE name = $1")
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(r) = row {
            let pos: i64 = r.try_get("position")?;
            Ok(usize::try_from(pos).ok())
        } else {
            Ok(None)
        }
    }

    async fn advance(&self, len: usize) -> Result<usize, Error> {
        if len == 0 {
            return Err(Error::NoCouponsAvailable);
        }
        // Single statement: the row lock taken by the upsert makes concurrent
        // advances queue up instead of reading the same position.
        let row = sqlx::query(
            r#"
            INSERT INTO rotation_cursor (name, position)
            VALUES ($1, 0)
            ON CONFLICT (name)
            DO UPDATE SET position = MOD(rotation_cursor.position + 1, $2)
            RETURNING position
            "#,
        )
            .bind(&self.name)
            .bind(len as i64)
            .fetch_one(&self.pool)
            .await?;

        let pos: i64 = row.try_get("position")?;
        Ok(pos as usize)
    }

    async fn rewind(&self, expected: usize) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE rotation_cursor
            SET position = position - 1
            WHERE name = $1
              AND position = $2
            "#,
        )
            .bind(&self.name)
            .bind(expected as i64)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
