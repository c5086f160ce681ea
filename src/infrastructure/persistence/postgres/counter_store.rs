use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::billing::{BillingError, CounterKey, ports::CounterStore};

/// Document counters kept in `billing_counters`, one row per kind (and year when
/// numbering resets yearly).
pub struct PostgresCounterStore {
  pool: PgPool,
}

impl PostgresCounterStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

fn to_stored(value: u64) -> Result<i64, BillingError> {
  i64::try_from(value).map_err(|_| BillingError::Storage(format!("Counter value {} out of range", value)))
}

fn from_stored(value: i64) -> Result<u64, BillingError> {
  u64::try_from(value).map_err(|_| BillingError::Storage(format!("Negative counter value {}", value)))
}

#[async_trait]
impl CounterStore for PostgresCounterStore {
  async fn increment_and_get(&self, key: CounterKey, floor: u64) -> Result<u64, BillingError> {
    // The upsert takes a row lock, so concurrent callers never share a value
    let value = sqlx::query_scalar::<_, i64>(
      r#"
            INSERT INTO billing_counters (key, value)
            VALUES ($1, $2 + 1)
            ON CONFLICT (key)
            DO UPDATE SET value = GREATEST(billing_counters.value, EXCLUDED.value - 1) + 1
            RETURNING value
            "#,
    )
    .bind(key.to_string())
    .bind(to_stored(floor)?)
    .fetch_one(&self.pool)
    .await
    .map_err(|e| {
      tracing::error!("Failed to increment counter {}: {}", key, e);
      BillingError::Database(e)
    })?;

    from_stored(value)
  }

  async fn current(&self, key: CounterKey) -> Result<u64, BillingError> {
    let value = sqlx::query_scalar::<_, i64>("SELECT value FROM billing_counters WHERE key = $1")
      .bind(key.to_string())
      .fetch_optional(&self.pool)
      .await?;

    from_stored(value.unwrap_or(0))
  }

  async fn reset(&self, key: CounterKey) -> Result<(), BillingError> {
    sqlx::query("DELETE FROM billing_counters WHERE key = $1")
      .bind(key.to_string())
      .execute(&self.pool)
      .await?;

    tracing::warn!("Reset document counter {}", key);
    Ok(())
  }
}
