use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::balance::Settlement;
use super::entities::{Invoice, Payment, Quote};
use super::errors::BillingError;
use super::inputs::{
  CreateInvoiceInput, CreatePaymentInput, CreateQuoteInput, UpdateInvoiceInput, UpdateQuoteInput,
};
use super::numbering::CounterKey;
use super::queries::{InvoiceFilters, PageRequest, PaginatedResponse, QuoteFilters};
use super::value_objects::{InvoiceStatus, QuoteStatus};

/// Derives balance and status from an invoice and its complete payment list.
pub type SettleFn = fn(&Invoice, &[Payment]) -> Result<Settlement, BillingError>;

/// The billing contract consumed by API and UI layers.
#[async_trait]
pub trait BillingRepository: Send + Sync {
  async fn create_quote(&self, input: CreateQuoteInput, created_by: Uuid)
  -> Result<Quote, BillingError>;
  async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, BillingError>;
  async fn list_quotes(
    &self,
    filters: QuoteFilters,
    page: PageRequest,
  ) -> Result<PaginatedResponse<Quote>, BillingError>;
  async fn update_quote(&self, id: Uuid, patch: UpdateQuoteInput) -> Result<Quote, BillingError>;
  async fn delete_quote(&self, id: Uuid) -> Result<(), BillingError>;

  async fn create_invoice(
    &self,
    input: CreateInvoiceInput,
    created_by: Uuid,
  ) -> Result<Invoice, BillingError>;
  async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, BillingError>;
  async fn list_invoices(
    &self,
    filters: InvoiceFilters,
    page: PageRequest,
  ) -> Result<PaginatedResponse<Invoice>, BillingError>;
  async fn update_invoice(
    &self,
    id: Uuid,
    patch: UpdateInvoiceInput,
  ) -> Result<Invoice, BillingError>;
  async fn delete_invoice(&self, id: Uuid) -> Result<(), BillingError>;

  async fn add_payment(
    &self,
    input: CreatePaymentInput,
    created_by: Uuid,
  ) -> Result<Payment, BillingError>;
  async fn get_payments_by_invoice_id(&self, invoice_id: Uuid)
  -> Result<Vec<Payment>, BillingError>;

  async fn convert_quote_to_invoice(
    &self,
    quote_id: Uuid,
    due_date: DateTime<Utc>,
    created_by: Uuid,
  ) -> Result<Invoice, BillingError>;

  async fn get_all_quote_numbers(&self) -> Result<Vec<String>, BillingError>;
  async fn get_all_invoice_numbers(&self) -> Result<Vec<String>, BillingError>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
  async fn create(&self, quote: Quote) -> Result<Quote, BillingError>;
  /// Replaces the quote's content and items. Status and conversion link are
  /// read from the stored row in the same unit of work; `status_change` is
  /// checked against the stored status before it is applied.
  async fn update(
    &self,
    quote: Quote,
    status_change: Option<QuoteStatus>,
  ) -> Result<Quote, BillingError>;
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Quote>, BillingError>;
  async fn list(
    &self,
    filters: &QuoteFilters,
    page: u32,
    page_size: u32,
  ) -> Result<PaginatedResponse<Quote>, BillingError>;
  async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, BillingError>;
  /// Records the conversion only if the quote has not been converted yet.
  /// Returns `false` when another conversion got there first.
  async fn mark_converted(
    &self,
    quote_id: Uuid,
    invoice_id: Uuid,
    status: QuoteStatus,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, BillingError>;
  /// Expires the quote only if it is still unanswered and past its validity
  /// date at `now`. Returns `false` when it no longer qualifies.
  async fn mark_expired(&self, quote_id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingError>;
  async fn delete(&self, id: Uuid) -> Result<(), BillingError>;
  async fn all_numbers(&self) -> Result<Vec<String>, BillingError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
  async fn create(&self, invoice: Invoice) -> Result<Invoice, BillingError>;
  /// Replaces the invoice's content and items. Balance and status are
  /// re-derived with `settle` from the stored status and payments in the same
  /// unit of work, then `status_change` is applied on top.
  async fn update(
    &self,
    invoice: Invoice,
    status_change: Option<InvoiceStatus>,
    settle: SettleFn,
  ) -> Result<Invoice, BillingError>;
  async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, BillingError>;
  async fn list(
    &self,
    filters: &InvoiceFilters,
    page: u32,
    page_size: u32,
    now: DateTime<Utc>,
  ) -> Result<PaginatedResponse<Invoice>, BillingError>;
  /// Inserts `payment` and settles the invoice against all of its payments
  /// atomically. Nothing is written when `settle` fails.
  async fn record_payment(
    &self,
    payment: Payment,
    settle: SettleFn,
  ) -> Result<(Payment, Invoice), BillingError>;
  /// Deletes payments, then items, then the invoice.
  async fn delete(&self, id: Uuid) -> Result<(), BillingError>;
  async fn all_numbers(&self) -> Result<Vec<String>, BillingError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
  /// Newest `received_at` first.
  async fn find_by_invoice_id(&self, invoice_id: Uuid) -> Result<Vec<Payment>, BillingError>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
  /// Atomically sets the counter to `max(counter, floor) + 1` and returns it.
  async fn increment_and_get(&self, key: CounterKey, floor: u64) -> Result<u64, BillingError>;
  async fn current(&self, key: CounterKey) -> Result<u64, BillingError>;
  async fn reset(&self, key: CounterKey) -> Result<(), BillingError>;
}
