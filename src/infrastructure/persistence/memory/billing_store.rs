use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::billing::{
  BillingError, Invoice, InvoiceFilters, InvoiceStatus, PaginatedResponse, Payment, Quote,
  QuoteFilters, QuoteStatus,
  ports::{InvoiceRepository, PaymentRepository, QuoteRepository, SettleFn},
};

#[derive(Default)]
struct MemoryState {
  quotes: HashMap<Uuid, Quote>,
  // Stored without payments; they are attached on read
  invoices: HashMap<Uuid, Invoice>,
  payments: HashMap<Uuid, Payment>,
}

impl MemoryState {
  fn payments_for(&self, invoice_id: Uuid) -> Vec<Payment> {
    let mut payments: Vec<Payment> = self
      .payments
      .values()
      .filter(|p| p.invoice_id == invoice_id)
      .cloned()
      .collect();
    payments.sort_by_key(|p| Reverse((p.received_at, p.created_at)));
    payments
  }

  fn hydrate(&self, invoice: &Invoice) -> Invoice {
    let mut invoice = invoice.clone();
    invoice.payments = self.payments_for(invoice.id);
    invoice
  }

  fn quote_number_taken(&self, number: &str) -> bool {
    self.quotes.values().any(|q| q.number == number)
  }

  fn invoice_number_taken(&self, number: &str) -> bool {
    self.invoices.values().any(|i| i.number == number)
  }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoreStats {
  quotes: usize,
  invoices: usize,
  payments: usize,
}

/// Quotes, invoices and payments held in process memory behind one lock, so
/// multi-record operations are as atomic as a database transaction.
#[derive(Default)]
pub struct InMemoryBillingStore {
  state: RwLock<MemoryState>,
}

impl InMemoryBillingStore {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  async fn stats(&self) -> StoreStats {
    let state = self.state.read().await;
    StoreStats {
      quotes: state.quotes.len(),
      invoices: state.invoices.len(),
      payments: state.payments.len(),
    }
  }
}

fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (DateTime<Utc>, String)) {
  items.sort_by_key(|item| Reverse(key(item)));
}

#[async_trait]
impl QuoteRepository for InMemoryBillingStore {
  async fn create(&self, quote: Quote) -> Result<Quote, BillingError> {
    let mut state = self.state.write().await;
    if state.quote_number_taken(&quote.number) {
      return Err(BillingError::DocumentNumberAlreadyExists(quote.number));
    }
    state.quotes.insert(quote.id, quote.clone());
    Ok(quote)
  }

  async fn update(
    &self,
    mut quote: Quote,
    status_change: Option<QuoteStatus>,
  ) -> Result<Quote, BillingError> {
    let mut state = self.state.write().await;
    let existing = state
      .quotes
      .get_mut(&quote.id)
      .ok_or(BillingError::QuoteNotFound(quote.id))?;

    quote.status = existing.status;
    quote.converted_to_invoice_id = existing.converted_to_invoice_id;
    if let Some(status) = status_change {
      quote.apply_requested_status(status, quote.updated_at)?;
    }
    *existing = quote.clone();
    Ok(quote)
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<Quote>, BillingError> {
    Ok(self.state.read().await.quotes.get(&id).cloned())
  }

  async fn list(
    &self,
    filters: &QuoteFilters,
    page: u32,
    page_size: u32,
  ) -> Result<PaginatedResponse<Quote>, BillingError> {
    let state = self.state.read().await;
    let mut matching: Vec<Quote> = state
      .quotes
      .values()
      .filter(|q| filters.matches(q))
      .cloned()
      .collect();
    newest_first(&mut matching, |q| (q.created_at, q.number.clone()));

    Ok(PaginatedResponse::from_all(matching, page, page_size))
  }

  async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, BillingError> {
    let state = self.state.read().await;
    Ok(
      state
        .quotes
        .values()
        .filter(|q| q.is_expirable(now))
        .cloned()
        .collect(),
    )
  }

  async fn mark_converted(
    &self,
    quote_id: Uuid,
    invoice_id: Uuid,
    status: QuoteStatus,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, BillingError> {
    let mut state = self.state.write().await;
    let quote = state
      .quotes
      .get_mut(&quote_id)
      .ok_or(BillingError::QuoteNotFound(quote_id))?;

    if quote.converted_to_invoice_id.is_some() {
      return Ok(false);
    }
    quote.converted_to_invoice_id = Some(invoice_id);
    quote.status = status;
    quote.updated_at = updated_at;
    Ok(true)
  }

  async fn mark_expired(&self, quote_id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingError> {
    let mut state = self.state.write().await;
    let quote = state
      .quotes
      .get_mut(&quote_id)
      .ok_or(BillingError::QuoteNotFound(quote_id))?;

    if !quote.is_expirable(now) {
      return Ok(false);
    }
    quote.status = QuoteStatus::Expired;
    quote.updated_at = now;
    Ok(true)
  }

  async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
    let mut state = self.state.write().await;
    state
      .quotes
      .remove(&id)
      .map(|_| ())
      .ok_or(BillingError::QuoteNotFound(id))
  }

  async fn all_numbers(&self) -> Result<Vec<String>, BillingError> {
    let state = self.state.read().await;
    Ok(state.quotes.values().map(|q| q.number.clone()).collect())
  }
}

#[async_trait]
impl InvoiceRepository for InMemoryBillingStore {
  async fn create(&self, mut invoice: Invoice) -> Result<Invoice, BillingError> {
    let mut state = self.state.write().await;
    if state.invoice_number_taken(&invoice.number) {
      return Err(BillingError::DocumentNumberAlreadyExists(invoice.number));
    }

    invoice.payments.clear();
    state.invoices.insert(invoice.id, invoice.clone());
    Ok(invoice)
  }

  async fn update(
    &self,
    mut invoice: Invoice,
    status_change: Option<InvoiceStatus>,
    settle: SettleFn,
  ) -> Result<Invoice, BillingError> {
    let mut state = self.state.write().await;
    let stored_status = state
      .invoices
      .get(&invoice.id)
      .map(|stored| stored.status)
      .ok_or(BillingError::InvoiceNotFound(invoice.id))?;

    invoice.status = stored_status;
    let payments = state.payments_for(invoice.id);
    let settlement = settle(&invoice, &payments)?.with_requested_status(status_change)?;
    invoice.balance_due = settlement.balance_due;
    invoice.status = settlement.status;
    invoice.payments.clear();

    state.invoices.insert(invoice.id, invoice.clone());
    invoice.payments = payments;
    Ok(invoice)
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, BillingError> {
    let state = self.state.read().await;
    Ok(state.invoices.get(&id).map(|invoice| state.hydrate(invoice)))
  }

  async fn list(
    &self,
    filters: &InvoiceFilters,
    page: u32,
    page_size: u32,
    now: DateTime<Utc>,
  ) -> Result<PaginatedResponse<Invoice>, BillingError> {
    let state = self.state.read().await;
    let mut matching: Vec<&Invoice> = state
      .invoices
      .values()
      .filter(|i| filters.matches(i, now))
      .collect();
    newest_first(&mut matching, |i| (i.created_at, i.number.clone()));

    let page = PaginatedResponse::from_all(matching, page, page_size);
    Ok(PaginatedResponse {
      data: page.data.into_iter().map(|i| state.hydrate(i)).collect(),
      total: page.total,
      page: page.page,
      page_size: page.page_size,
      total_pages: page.total_pages,
    })
  }

  async fn record_payment(
    &self,
    payment: Payment,
    settle: SettleFn,
  ) -> Result<(Payment, Invoice), BillingError> {
    let mut state = self.state.write().await;
    let invoice = state
      .invoices
      .get(&payment.invoice_id)
      .ok_or(BillingError::InvoiceNotFound(payment.invoice_id))?;

    let mut payments = state.payments_for(invoice.id);
    payments.push(payment.clone());
    let settlement = settle(invoice, &payments)?;

    state.payments.insert(payment.id, payment.clone());
    let invoice = state
      .invoices
      .get_mut(&payment.invoice_id)
      .ok_or(BillingError::InvoiceNotFound(payment.invoice_id))?;
    invoice.balance_due = settlement.balance_due;
    invoice.status = settlement.status;
    invoice.updated_at = Utc::now();

    let invoice = invoice.clone();
    let invoice = state.hydrate(&invoice);
    Ok((payment, invoice))
  }

  async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
    let mut state = self.state.write().await;
    if !state.invoices.contains_key(&id) {
      return Err(BillingError::InvoiceNotFound(id));
    }

    state.payments.retain(|_, p| p.invoice_id != id);
    state.invoices.remove(&id);
    Ok(())
  }

  async fn all_numbers(&self) -> Result<Vec<String>, BillingError> {
    let state = self.state.read().await;
    Ok(state.invoices.values().map(|i| i.number.clone()).collect())
  }
}

#[async_trait]
impl PaymentRepository for InMemoryBillingStore {
  async fn find_by_invoice_id(&self, invoice_id: Uuid) -> Result<Vec<Payment>, BillingError> {
    Ok(self.state.read().await.payments_for(invoice_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::billing::{
    Currency, CustomerInfo, LineItemInput, PaymentAmount, PaymentMethod,
    balance::{rebalance, settle_payments},
    totals_for,
  };
  use rust_decimal_macros::dec;

  fn invoice(number: &str) -> Invoice {
    let items = vec![
      LineItemInput::new("Clutch plate", dec!(1), dec!(1000))
        .into_line_item(dec!(0))
        .unwrap(),
    ];
    let totals = totals_for(&items, dec!(0), dec!(0));
    Invoice::new(
      number.to_string(),
      CustomerInfo::named("Dev"),
      items,
      totals,
      Currency::INR,
      Utc::now(),
      None,
      None,
      None,
      Uuid::new_v4(),
    )
  }

  fn payment(invoice_id: Uuid, amount: rust_decimal::Decimal) -> Payment {
    Payment::new(
      invoice_id,
      PaymentAmount::new(amount).unwrap(),
      PaymentMethod::Card,
      None,
      None,
      None,
      Uuid::new_v4(),
    )
  }

  #[tokio::test]
  async fn test_duplicate_invoice_number_rejected() {
    let store = InMemoryBillingStore::new();
    InvoiceRepository::create(&store, invoice("INV-2024-0001")).await.unwrap();

    let err = InvoiceRepository::create(&store, invoice("INV-2024-0001"))
      .await
      .unwrap_err();
    assert!(matches!(err, BillingError::DocumentNumberAlreadyExists(n) if n == "INV-2024-0001"));
  }

  #[tokio::test]
  async fn test_record_payment_settles_and_counts() {
    let store = InMemoryBillingStore::new();
    let invoice = InvoiceRepository::create(&store, invoice("INV-2024-0001")).await.unwrap();

    let (_, settled) = store
      .record_payment(payment(invoice.id, dec!(400)), settle_payments)
      .await
      .unwrap();
    assert_eq!(settled.balance_due, dec!(600.00));
    assert_eq!(settled.payments.len(), 1);

    let stats = store.stats().await;
    assert_eq!(stats.invoices, 1);
    assert_eq!(stats.payments, 1);
  }

  #[tokio::test]
  async fn test_failed_settlement_writes_nothing() {
    let store = InMemoryBillingStore::new();
    let mut void = invoice("INV-2024-0001");
    void.status = InvoiceStatus::Void;
    let void = InvoiceRepository::create(&store, void).await.unwrap();

    assert!(
      store
        .record_payment(payment(void.id, dec!(10)), settle_payments)
        .await
        .is_err()
    );
    assert_eq!(store.stats().await.payments, 0);
  }

  fn quote(number: &str) -> Quote {
    let items = vec![
      LineItemInput::new("Wheel alignment", dec!(1), dec!(800))
        .into_line_item(dec!(0))
        .unwrap(),
    ];
    let totals = totals_for(&items, dec!(0), dec!(0));
    Quote::new(
      number.to_string(),
      CustomerInfo::named("Dev"),
      items,
      totals,
      Currency::INR,
      None,
      None,
      None,
      Uuid::new_v4(),
    )
  }

  #[tokio::test]
  async fn test_stale_invoice_edit_keeps_paid_status() {
    let store = InMemoryBillingStore::new();
    let mut sent = invoice("INV-2024-0001");
    sent.status = InvoiceStatus::Sent;
    let created = InvoiceRepository::create(&store, sent).await.unwrap();

    let mut stale = InvoiceRepository::find_by_id(&store, created.id)
      .await
      .unwrap()
      .unwrap();
    store
      .record_payment(payment(created.id, dec!(1000)), settle_payments)
      .await
      .unwrap();

    stale.notes = Some("Collected at counter".to_string());
    let updated = InvoiceRepository::update(&store, stale, None, rebalance)
      .await
      .unwrap();

    assert_eq!(updated.status, InvoiceStatus::Paid);
    assert_eq!(updated.balance_due, dec!(0.00));
    let found = InvoiceRepository::find_by_id(&store, created.id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(found.status, InvoiceStatus::Paid);
    assert_eq!(found.notes.as_deref(), Some("Collected at counter"));
  }

  #[tokio::test]
  async fn test_status_change_checked_against_stored_status() {
    let store = InMemoryBillingStore::new();
    let created = InvoiceRepository::create(&store, invoice("INV-2024-0001")).await.unwrap();

    let mut stale = created.clone();
    stale.status = InvoiceStatus::Sent;
    let err = InvoiceRepository::update(&store, stale, Some(InvoiceStatus::Paid), rebalance)
      .await
      .unwrap_err();
    assert!(matches!(err, BillingError::InvalidStatusTransition { .. }));

    let sent = InvoiceRepository::update(&store, created, Some(InvoiceStatus::Sent), rebalance)
      .await
      .unwrap();
    assert_eq!(sent.status, InvoiceStatus::Sent);
  }

  #[tokio::test]
  async fn test_stale_quote_edit_keeps_conversion() {
    let store = InMemoryBillingStore::new();
    let created = QuoteRepository::create(&store, quote("QT-2024-0001")).await.unwrap();
    let invoice_id = Uuid::new_v4();

    let mut stale = created.clone();
    assert!(
      store
        .mark_converted(created.id, invoice_id, QuoteStatus::Sent, Utc::now())
        .await
        .unwrap()
    );

    stale.notes = Some("Customer called back".to_string());
    let updated = QuoteRepository::update(&store, stale, None).await.unwrap();

    assert_eq!(updated.status, QuoteStatus::Sent);
    assert_eq!(updated.converted_to_invoice_id, Some(invoice_id));
    let found = QuoteRepository::find_by_id(&store, created.id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(found.status, QuoteStatus::Sent);
    assert_eq!(found.notes.as_deref(), Some("Customer called back"));
  }

  #[tokio::test]
  async fn test_mark_expired_only_when_still_expirable() {
    let store = InMemoryBillingStore::new();
    let now = Utc::now();
    let mut lapsed = quote("QT-2024-0001");
    lapsed.valid_until = Some(now - chrono::Duration::days(1));
    let lapsed = QuoteRepository::create(&store, lapsed).await.unwrap();

    store
      .mark_converted(lapsed.id, Uuid::new_v4(), QuoteStatus::Sent, now)
      .await
      .unwrap();
    let mut accepted = QuoteRepository::find_by_id(&store, lapsed.id)
      .await
      .unwrap()
      .unwrap();
    accepted = QuoteRepository::update(&store, accepted, Some(QuoteStatus::Accepted))
      .await
      .unwrap();
    assert_eq!(accepted.status, QuoteStatus::Accepted);
    assert!(!store.mark_expired(lapsed.id, now).await.unwrap());

    let mut open = quote("QT-2024-0002");
    open.valid_until = Some(now - chrono::Duration::days(1));
    let open = QuoteRepository::create(&store, open).await.unwrap();
    assert!(store.mark_expired(open.id, now).await.unwrap());
    let found = QuoteRepository::find_by_id(&store, open.id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(found.status, QuoteStatus::Expired);
  }

  #[tokio::test]
  async fn test_delete_cascades() {
    let store = InMemoryBillingStore::new();
    let invoice = InvoiceRepository::create(&store, invoice("INV-2024-0001")).await.unwrap();
    store
      .record_payment(payment(invoice.id, dec!(10)), settle_payments)
      .await
      .unwrap();

    InvoiceRepository::delete(&store, invoice.id).await.unwrap();
    assert_eq!(
      store.stats().await,
      StoreStats {
        quotes: 0,
        invoices: 0,
        payments: 0
      }
    );
  }
}
