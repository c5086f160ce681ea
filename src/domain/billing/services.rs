use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use super::balance::{rebalance, settle_payments};
use super::entities::{Invoice, LineItem, Payment, Quote, totals_for};
use super::errors::BillingError;
use super::inputs::{
  CreateInvoiceInput, CreatePaymentInput, CreateQuoteInput, LineItemInput, UpdateInvoiceInput,
  UpdateQuoteInput,
};
use super::money::format_currency;
use super::numbering::NumberingSequencer;
use super::ports::{
  BillingRepository, CounterStore, InvoiceRepository, PaymentRepository, QuoteRepository,
};
use super::queries::{InvoiceFilters, PageRequest, PaginatedResponse, QuoteFilters};
use super::settings::BillingSettings;
use super::value_objects::{
  Adjustment, DocumentKind, PaymentAmount, QuoteStatus, ShippingAmount, ValueObjectError,
};

pub struct BillingServiceDependencies {
  pub quote_repo: Arc<dyn QuoteRepository>,
  pub invoice_repo: Arc<dyn InvoiceRepository>,
  pub payment_repo: Arc<dyn PaymentRepository>,
  pub counter_store: Arc<dyn CounterStore>,
}

/// Storage-agnostic billing engine. Validates input, computes every derived
/// amount, allocates document numbers and delegates persistence to the ports.
pub struct BillingService {
  quote_repo: Arc<dyn QuoteRepository>,
  invoice_repo: Arc<dyn InvoiceRepository>,
  payment_repo: Arc<dyn PaymentRepository>,
  sequencer: NumberingSequencer,
  settings: BillingSettings,
}

impl BillingService {
  pub fn new(
    deps: BillingServiceDependencies,
    settings: BillingSettings,
  ) -> Result<Self, BillingError> {
    settings.validate()?;
    let sequencer = NumberingSequencer::new(
      deps.counter_store,
      settings.quote_numbering.clone(),
      settings.invoice_numbering.clone(),
    )?;

    Ok(Self {
      quote_repo: deps.quote_repo,
      invoice_repo: deps.invoice_repo,
      payment_repo: deps.payment_repo,
      sequencer,
      settings,
    })
  }

  pub fn settings(&self) -> &BillingSettings {
    &self.settings
  }

  pub fn format_amount(&self, amount: Decimal) -> String {
    format_currency(amount, self.settings.currency, &self.settings.currency_locale)
  }

  /// The number the next document of `kind` would receive.
  pub async fn preview_next_number(&self, kind: DocumentKind) -> Result<String, BillingError> {
    let existing = self.numbers_in_use(kind).await?;
    self.sequencer.preview_next(kind, &existing, None).await
  }

  /// Moves every draft or sent quote whose validity has lapsed to `Expired`.
  pub async fn expire_quotes(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, BillingError> {
    let candidates = self.quote_repo.find_expired(now).await?;
    let mut expired = Vec::with_capacity(candidates.len());

    for mut quote in candidates {
      // Skipped when a conversion or edit got there first
      if !self.quote_repo.mark_expired(quote.id, now).await? {
        continue;
      }
      quote.status = QuoteStatus::Expired;
      quote.updated_at = now;
      expired.push(quote);
    }

    if !expired.is_empty() {
      tracing::info!(count = expired.len(), "Expired quotes past their validity date");
    }
    Ok(expired)
  }

  async fn numbers_in_use(&self, kind: DocumentKind) -> Result<Vec<String>, BillingError> {
    match kind {
      DocumentKind::Quote => self.quote_repo.all_numbers().await,
      DocumentKind::Invoice => self.invoice_repo.all_numbers().await,
    }
  }

  async fn allocate_number(&self, kind: DocumentKind) -> Result<String, BillingError> {
    let existing = self.numbers_in_use(kind).await?;
    self
      .sequencer
      .generate_unique(kind, &existing, self.settings.max_number_retries, None)
      .await
  }

  fn build_items(&self, inputs: Vec<LineItemInput>) -> Result<Vec<LineItem>, BillingError> {
    if inputs.is_empty() {
      return Err(
        ValueObjectError::InvalidLineItems("At least one line item is required".to_string()).into(),
      );
    }

    let items = inputs
      .into_iter()
      .map(|input| input.into_line_item(self.settings.default_tax_rate))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
  }

  async fn discard_invoice(&self, invoice_id: Uuid) {
    if let Err(e) = self.invoice_repo.delete(invoice_id).await {
      tracing::error!("Failed to discard invoice {} after aborted conversion: {}", invoice_id, e);
    }
  }
}

fn shipping_amount(value: Option<Decimal>) -> Result<Decimal, ValueObjectError> {
  Ok(ShippingAmount::new(value.unwrap_or(Decimal::ZERO))?.value())
}

fn adjustment_amount(value: Option<Decimal>) -> Result<Decimal, ValueObjectError> {
  Ok(Adjustment::new(value.unwrap_or(Decimal::ZERO))?.value())
}

#[async_trait]
impl BillingRepository for BillingService {
  async fn create_quote(
    &self,
    input: CreateQuoteInput,
    created_by: Uuid,
  ) -> Result<Quote, BillingError> {
    let customer = input.customer.normalized()?;
    let items = self.build_items(input.items)?;
    let totals = totals_for(
      &items,
      shipping_amount(input.shipping_amount)?,
      adjustment_amount(input.adjustment_amount)?,
    );
    let valid_until = input
      .valid_until
      .unwrap_or_else(|| Utc::now() + Duration::days(self.settings.quote_validity_days));

    let number = self.allocate_number(DocumentKind::Quote).await?;
    let quote = Quote::new(
      number,
      customer,
      items,
      totals,
      self.settings.currency,
      input.notes,
      input.terms,
      Some(valid_until),
      created_by,
    );

    let quote = self.quote_repo.create(quote).await?;
    tracing::info!(
      quote_id = %quote.id,
      number = %quote.number,
      grand_total = %self.format_amount(quote.totals.grand_total),
      "Quote created"
    );
    Ok(quote)
  }

  async fn get_quote(&self, id: Uuid) -> Result<Option<Quote>, BillingError> {
    self.quote_repo.find_by_id(id).await
  }

  async fn list_quotes(
    &self,
    filters: QuoteFilters,
    page: PageRequest,
  ) -> Result<PaginatedResponse<Quote>, BillingError> {
    let (page, page_size) = page.resolve(self.settings.default_page_size)?;
    self.quote_repo.list(&filters, page, page_size).await
  }

  async fn update_quote(&self, id: Uuid, patch: UpdateQuoteInput) -> Result<Quote, BillingError> {
    let mut quote = self
      .quote_repo
      .find_by_id(id)
      .await?
      .ok_or(BillingError::QuoteNotFound(id))?;

    if patch.changes_totals() {
      let items = match patch.items {
        Some(items) => self.build_items(items)?,
        None => quote.items.clone(),
      };
      let shipping = match patch.shipping_amount {
        Some(shipping) => shipping_amount(Some(shipping))?,
        None => quote.totals.shipping(),
      };
      let adjustment = match patch.adjustment_amount {
        Some(adjustment) => adjustment_amount(Some(adjustment))?,
        None => quote.totals.adjustment(),
      };
      quote.replace_items(items, shipping, adjustment);
    }

    if let Some(customer) = patch.customer {
      quote.customer = customer.normalized()?;
    }
    if let Some(notes) = patch.notes {
      quote.notes = Some(notes);
    }
    if let Some(terms) = patch.terms {
      quote.terms = Some(terms);
    }
    if let Some(valid_until) = patch.valid_until {
      quote.valid_until = Some(valid_until);
    }

    quote.updated_at = Utc::now();
    let quote = self.quote_repo.update(quote, patch.status).await?;
    tracing::debug!(quote_id = %quote.id, status = %quote.status, "Quote updated");
    Ok(quote)
  }

  async fn delete_quote(&self, id: Uuid) -> Result<(), BillingError> {
    self.quote_repo.delete(id).await?;
    tracing::info!(quote_id = %id, "Quote deleted");
    Ok(())
  }

  async fn create_invoice(
    &self,
    input: CreateInvoiceInput,
    created_by: Uuid,
  ) -> Result<Invoice, BillingError> {
    let customer = input.customer.normalized()?;
    let items = self.build_items(input.items)?;
    let totals = totals_for(
      &items,
      shipping_amount(input.shipping_amount)?,
      adjustment_amount(input.adjustment_amount)?,
    );
    let due_date = input
      .due_date
      .unwrap_or_else(|| Utc::now() + Duration::days(self.settings.invoice_due_days));

    let number = self.allocate_number(DocumentKind::Invoice).await?;
    let invoice = Invoice::new(
      number,
      customer,
      items,
      totals,
      self.settings.currency,
      due_date,
      input.notes,
      input.terms,
      input.source_quote_id,
      created_by,
    );

    let invoice = self.invoice_repo.create(invoice).await?;
    tracing::info!(
      invoice_id = %invoice.id,
      number = %invoice.number,
      grand_total = %self.format_amount(invoice.totals.grand_total),
      "Invoice created"
    );
    Ok(invoice)
  }

  async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, BillingError> {
    self.invoice_repo.find_by_id(id).await
  }

  async fn list_invoices(
    &self,
    filters: InvoiceFilters,
    page: PageRequest,
  ) -> Result<PaginatedResponse<Invoice>, BillingError> {
    let (page, page_size) = page.resolve(self.settings.default_page_size)?;
    self
      .invoice_repo
      .list(&filters, page, page_size, Utc::now())
      .await
  }

  async fn update_invoice(
    &self,
    id: Uuid,
    patch: UpdateInvoiceInput,
  ) -> Result<Invoice, BillingError> {
    let mut invoice = self
      .invoice_repo
      .find_by_id(id)
      .await?
      .ok_or(BillingError::InvoiceNotFound(id))?;

    if patch.changes_totals() {
      let items = match patch.items {
        Some(items) => self.build_items(items)?,
        None => invoice.items.clone(),
      };
      let shipping = match patch.shipping_amount {
        Some(shipping) => shipping_amount(Some(shipping))?,
        None => invoice.totals.shipping(),
      };
      let adjustment = match patch.adjustment_amount {
        Some(adjustment) => adjustment_amount(Some(adjustment))?,
        None => invoice.totals.adjustment(),
      };
      invoice.replace_items(items, shipping, adjustment);
    }

    if let Some(customer) = patch.customer {
      invoice.customer = customer.normalized()?;
    }
    if let Some(notes) = patch.notes {
      invoice.notes = Some(notes);
    }
    if let Some(terms) = patch.terms {
      invoice.terms = Some(terms);
    }
    if let Some(due_date) = patch.due_date {
      invoice.due_date = due_date;
    }

    invoice.updated_at = Utc::now();
    let invoice = self
      .invoice_repo
      .update(invoice, patch.status, rebalance)
      .await?;
    tracing::debug!(
      invoice_id = %invoice.id,
      status = %invoice.status,
      balance_due = %invoice.balance_due,
      "Invoice updated"
    );
    Ok(invoice)
  }

  async fn delete_invoice(&self, id: Uuid) -> Result<(), BillingError> {
    self.invoice_repo.delete(id).await?;
    tracing::info!(invoice_id = %id, "Invoice deleted with its payments");
    Ok(())
  }

  async fn add_payment(
    &self,
    input: CreatePaymentInput,
    created_by: Uuid,
  ) -> Result<Payment, BillingError> {
    let amount = PaymentAmount::new(input.amount)?;
    let payment = Payment::new(
      input.invoice_id,
      amount,
      input.method,
      input.reference,
      input.notes,
      input.received_at,
      created_by,
    );

    let (payment, invoice) = self
      .invoice_repo
      .record_payment(payment, settle_payments)
      .await?;

    tracing::info!(
      invoice_id = %invoice.id,
      number = %invoice.number,
      amount = %self.format_amount(payment.amount),
      balance_due = %self.format_amount(invoice.balance_due),
      status = %invoice.status,
      "Payment recorded"
    );

    let overpayment = invoice.overpayment();
    if overpayment > Decimal::ZERO {
      tracing::warn!(
        invoice_id = %invoice.id,
        number = %invoice.number,
        overpayment = %self.format_amount(overpayment),
        "Payments exceed the invoice grand total"
      );
    }

    Ok(payment)
  }

  async fn get_payments_by_invoice_id(
    &self,
    invoice_id: Uuid,
  ) -> Result<Vec<Payment>, BillingError> {
    self.payment_repo.find_by_invoice_id(invoice_id).await
  }

  async fn convert_quote_to_invoice(
    &self,
    quote_id: Uuid,
    due_date: DateTime<Utc>,
    created_by: Uuid,
  ) -> Result<Invoice, BillingError> {
    let quote = self
      .quote_repo
      .find_by_id(quote_id)
      .await?
      .ok_or(BillingError::QuoteNotFound(quote_id))?;
    quote.ensure_convertible()?;

    let input = CreateInvoiceInput {
      customer: quote.customer.clone(),
      items: quote.items.iter().map(LineItemInput::from).collect(),
      shipping_amount: quote.totals.shipping_amount,
      adjustment_amount: quote.totals.adjustment_amount,
      notes: quote.notes.clone(),
      terms: quote.terms.clone(),
      due_date: Some(due_date),
      source_quote_id: Some(quote.id),
    };
    let invoice = self.create_invoice(input, created_by).await?;

    let claimed = match self
      .quote_repo
      .mark_converted(quote.id, invoice.id, QuoteStatus::Sent, Utc::now())
      .await
    {
      Ok(claimed) => claimed,
      Err(e) => {
        self.discard_invoice(invoice.id).await;
        return Err(e);
      }
    };

    if !claimed {
      self.discard_invoice(invoice.id).await;
      let converted_to = self
        .quote_repo
        .find_by_id(quote.id)
        .await?
        .and_then(|q| q.converted_to_invoice_id);
      return Err(match converted_to {
        Some(invoice_id) => BillingError::QuoteAlreadyConverted { quote_id, invoice_id },
        None => BillingError::QuoteNotFound(quote_id),
      });
    }

    tracing::info!(
      quote_id = %quote.id,
      quote_number = %quote.number,
      invoice_id = %invoice.id,
      invoice_number = %invoice.number,
      "Quote converted to invoice"
    );
    Ok(invoice)
  }

  async fn get_all_quote_numbers(&self) -> Result<Vec<String>, BillingError> {
    self.quote_repo.all_numbers().await
  }

  async fn get_all_invoice_numbers(&self) -> Result<Vec<String>, BillingError> {
    self.invoice_repo.all_numbers().await
  }
}
