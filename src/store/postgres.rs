use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::TokenStore;
use crate::error::StoreError;
use crate::token::TokenRecord;

/// Token store backed by the single row `hubspot_tokens.id = 1`.
///
/// The table is created by [`Database::migrate`](super::Database::migrate).
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, obtained_at, expires_in
            FROM hubspot_tokens
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        Ok(Some(TokenRecord {
            access_token: row.try_get(0)?,
            refresh_token: row.try_get(1)?,
            obtained_at: row.try_get(2)?,
            expires_in: row.try_get(3)?,
        }))
    }

    async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO hubspot_tokens (id, access_token, refresh_token, obtained_at, expires_in)
            VALUES (1, $1, $2, $3, $4)
            ON CONFLICT (id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                obtained_at = EXCLUDED.obtained_at,
                expires_in = EXCLUDED.expires_in,
                updated_at = NOW()
            "#,
        )
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.obtained_at)
        .bind(record.expires_in)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
