use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_billing::{
  domain::billing::DocumentKind,
  infrastructure::{bootstrap::build_billing_service, config::Config},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialize environment variables from .env file
  dotenvy::dotenv().ok();

  // Initialize tracing subscriber for logging
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shop_billing=debug,sqlx=warn".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  tracing::info!("Starting billing engine");

  let config = Config::load().context("Failed to load configuration")?;
  tracing::info!(
    "Configuration loaded successfully (storage backend {:?})",
    config.storage.backend
  );

  let service = build_billing_service(&config)
    .await
    .context("Failed to build billing service")?;

  let expired = service.expire_quotes(Utc::now()).await?;
  if !expired.is_empty() {
    tracing::info!("Expired {} stale quotes", expired.len());
  }

  let next_quote = service.preview_next_number(DocumentKind::Quote).await?;
  let next_invoice = service.preview_next_number(DocumentKind::Invoice).await?;
  tracing::info!("Next quote number: {}", next_quote);
  tracing::info!("Next invoice number: {}", next_invoice);

  Ok(())
}
