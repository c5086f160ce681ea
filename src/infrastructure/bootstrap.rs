use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::config::{Config, DatabaseConfig, StorageBackend};
use super::persistence::memory::{InMemoryBillingStore, InMemoryCounterStore};
use super::persistence::postgres::{
  PostgresCounterStore, PostgresInvoiceRepository, PostgresPaymentRepository,
  PostgresQuoteRepository,
};
use crate::domain::billing::{BillingError, BillingService, BillingServiceDependencies};

#[derive(Debug, Error)]
pub enum BootstrapError {
  #[error("Storage backend is postgres but no [database] section is configured")]
  MissingDatabaseConfig,

  #[error("Database connection timed out after {0} seconds")]
  ConnectTimeout(u64),

  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration failed: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error(transparent)]
  Billing(#[from] BillingError),
}

/// Wires the billing service onto the configured storage backend.
pub async fn build_billing_service(config: &Config) -> Result<Arc<BillingService>, BootstrapError> {
  let deps = match config.storage.backend {
    StorageBackend::Memory => {
      tracing::info!("Using in-memory billing storage");
      memory_dependencies()
    }
    StorageBackend::Postgres => {
      let database = config
        .database
        .as_ref()
        .ok_or(BootstrapError::MissingDatabaseConfig)?;
      let pool = connect(database).await?;
      postgres_dependencies(pool)
    }
  };

  let service = BillingService::new(deps, config.billing.clone())?;
  tracing::info!(
    "Billing service ready (currency {}, default tax rate {}%)",
    config.billing.currency,
    config.billing.default_tax_rate
  );
  Ok(Arc::new(service))
}

pub fn memory_dependencies() -> BillingServiceDependencies {
  let store = Arc::new(InMemoryBillingStore::new());
  BillingServiceDependencies {
    quote_repo: store.clone(),
    invoice_repo: store.clone(),
    payment_repo: store,
    counter_store: Arc::new(InMemoryCounterStore::new()),
  }
}

pub fn postgres_dependencies(pool: PgPool) -> BillingServiceDependencies {
  BillingServiceDependencies {
    quote_repo: Arc::new(PostgresQuoteRepository::new(pool.clone())),
    invoice_repo: Arc::new(PostgresInvoiceRepository::new(pool.clone())),
    payment_repo: Arc::new(PostgresPaymentRepository::new(pool.clone())),
    counter_store: Arc::new(PostgresCounterStore::new(pool)),
  }
}

/// Opens the pool with the configured timeouts and applies pending migrations.
pub async fn connect(database: &DatabaseConfig) -> Result<PgPool, BootstrapError> {
  tracing::info!("Connecting to database");

  let pool = tokio::time::timeout(
    Duration::from_secs(database.connect_timeout_seconds),
    PgPoolOptions::new()
      .max_connections(database.max_connections)
      .acquire_timeout(Duration::from_secs(database.acquire_timeout_seconds))
      .connect(&database.url),
  )
  .await
  .map_err(|_| {
    tracing::error!(
      "Database connection timed out after {} seconds. Is PostgreSQL running?",
      database.connect_timeout_seconds
    );
    BootstrapError::ConnectTimeout(database.connect_timeout_seconds)
  })?
  .map_err(|e| {
    tracing::error!("Failed to connect to database: {}", e);
    BootstrapError::Database(e)
  })?;

  tracing::info!("Database connection pool created");

  if database.run_migrations {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations completed");
  }

  Ok(pool)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::billing::{BillingSettings, DocumentKind};
  use crate::infrastructure::config::StorageConfig;

  fn config(backend: StorageBackend) -> Config {
    Config {
      storage: StorageConfig { backend },
      database: None,
      billing: BillingSettings::default(),
    }
  }

  #[tokio::test]
  async fn test_memory_backend_builds_service() {
    let service = build_billing_service(&config(StorageBackend::Memory))
      .await
      .unwrap();

    let next = service
      .preview_next_number(DocumentKind::Invoice)
      .await
      .unwrap();
    assert!(next.starts_with("INV-"));
    assert!(next.ends_with("0001"));
  }

  #[tokio::test]
  async fn test_postgres_backend_requires_database_section() {
    let result = build_billing_service(&config(StorageBackend::Postgres)).await;
    assert!(matches!(result, Err(BootstrapError::MissingDatabaseConfig)));
  }

  #[tokio::test]
  async fn test_invalid_settings_are_rejected() {
    let mut config = config(StorageBackend::Memory);
    config.billing.quote_numbering.digit_count = 0;

    let result = build_billing_service(&config).await;
    assert!(matches!(result, Err(BootstrapError::Billing(_))));
  }
}
