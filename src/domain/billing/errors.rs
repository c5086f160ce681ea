use super::value_objects::{DocumentKind, ValueObjectError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
  #[error("Invalid input: {0}")]
  InvalidInput(#[from] ValueObjectError),

  #[error("Quote not found: {0}")]
  QuoteNotFound(Uuid),

  #[error("Invoice not found: {0}")]
  InvoiceNotFound(Uuid),

  #[error("Could not allocate a unique {kind} number after {attempts} attempts")]
  SequenceExhausted { kind: DocumentKind, attempts: u32 },

  #[error("Invalid status transition from {from} to {to}")]
  InvalidStatusTransition { from: String, to: String },

  #[error("Quote {quote_id} was already converted to invoice {invoice_id}")]
  QuoteAlreadyConverted { quote_id: Uuid, invoice_id: Uuid },

  #[error("Document number '{0}' already exists")]
  DocumentNumberAlreadyExists(String),

  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Storage error: {0}")]
  Storage(String),
}

impl BillingError {
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      BillingError::QuoteNotFound(_) | BillingError::InvoiceNotFound(_)
    )
  }

  pub fn transition(from: impl ToString, to: impl ToString) -> Self {
    BillingError::InvalidStatusTransition {
      from: from.to_string(),
      to: to.to_string(),
    }
  }
}
