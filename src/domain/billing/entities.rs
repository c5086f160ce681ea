use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::calculations::{BillingTotals, LineItemAmounts, compute_line_item, compute_totals};
use super::errors::BillingError;
use super::money::round;
use super::value_objects::{
  Currency, CustomerInfo, InvoiceStatus, LineItemDescription, PaymentAmount, PaymentMethod,
  Percentage, Quantity, QuoteStatus, UnitPrice,
};

/// One billable row. The derived amounts are computed when the item is built
/// and cannot be set from outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
  id: Uuid,
  description: LineItemDescription,
  quantity: Quantity,
  unit_price: UnitPrice,
  discount: Percentage,
  tax_rate: Percentage,
  #[serde(flatten)]
  amounts: LineItemAmounts,
}

impl LineItem {
  pub fn new(
    description: LineItemDescription,
    quantity: Quantity,
    unit_price: UnitPrice,
    discount: Percentage,
    tax_rate: Percentage,
  ) -> Self {
    Self::with_id(
      Uuid::new_v4(),
      description,
      quantity,
      unit_price,
      discount,
      tax_rate,
    )
  }

  /// Rebuilds a stored item, recomputing its derived amounts.
  pub fn with_id(
    id: Uuid,
    description: LineItemDescription,
    quantity: Quantity,
    unit_price: UnitPrice,
    discount: Percentage,
    tax_rate: Percentage,
  ) -> Self {
    Self {
      id,
      amounts: compute_line_item(quantity, unit_price, discount, tax_rate),
      description,
      quantity,
      unit_price,
      discount,
      tax_rate,
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn description(&self) -> &str {
    self.description.value()
  }

  pub fn quantity(&self) -> Decimal {
    self.quantity.value()
  }

  pub fn unit_price(&self) -> Decimal {
    self.unit_price.value()
  }

  pub fn discount(&self) -> Decimal {
    self.discount.value()
  }

  pub fn tax_rate(&self) -> Decimal {
    self.tax_rate.value()
  }

  pub fn amounts(&self) -> &LineItemAmounts {
    &self.amounts
  }

  pub fn subtotal(&self) -> Decimal {
    self.amounts.subtotal
  }

  pub fn discount_amount(&self) -> Decimal {
    self.amounts.discount_amount
  }

  pub fn tax_amount(&self) -> Decimal {
    self.amounts.tax_amount
  }

  pub fn total(&self) -> Decimal {
    self.amounts.total
  }
}

pub fn totals_for(items: &[LineItem], shipping: Decimal, adjustment: Decimal) -> BillingTotals {
  compute_totals(items.iter().map(LineItem::amounts), shipping, adjustment)
}

// Quote - priced offer that may later become an invoice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
  pub id: Uuid,
  pub number: String,
  pub status: QuoteStatus,
  pub customer: CustomerInfo,
  pub items: Vec<LineItem>,
  pub totals: BillingTotals,
  pub currency: Currency,
  pub notes: Option<String>,
  pub terms: Option<String>,
  pub valid_until: Option<DateTime<Utc>>,
  pub converted_to_invoice_id: Option<Uuid>,
  pub created_by: Uuid,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Quote {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    number: String,
    customer: CustomerInfo,
    items: Vec<LineItem>,
    totals: BillingTotals,
    currency: Currency,
    notes: Option<String>,
    terms: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    created_by: Uuid,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      number,
      status: QuoteStatus::Draft,
      customer,
      items,
      totals,
      currency,
      notes,
      terms,
      valid_until,
      converted_to_invoice_id: None,
      created_by,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn change_status(&mut self, new_status: QuoteStatus) -> Result<(), BillingError> {
    if !self.status.can_transition_to(new_status) {
      return Err(BillingError::transition(self.status, new_status));
    }

    self.status = new_status;
    self.updated_at = Utc::now();
    Ok(())
  }

  /// Applies a status asked for by an edit. Asking for the current status is
  /// a no-op; expiring by hand needs the validity date to have passed.
  pub fn apply_requested_status(
    &mut self,
    requested: QuoteStatus,
    now: DateTime<Utc>,
  ) -> Result<(), BillingError> {
    if requested == self.status {
      return Ok(());
    }
    if requested == QuoteStatus::Expired && !self.is_past_validity(now) {
      return Err(BillingError::transition(self.status, requested));
    }
    self.change_status(requested)
  }

  pub fn replace_items(&mut self, items: Vec<LineItem>, shipping: Decimal, adjustment: Decimal) {
    self.totals = totals_for(&items, shipping, adjustment);
    self.items = items;
    self.updated_at = Utc::now();
  }

  pub fn is_past_validity(&self, now: DateTime<Utc>) -> bool {
    self.valid_until.is_some_and(|valid_until| valid_until < now)
  }

  /// Whether the quote has passed its validity date while still awaiting an
  /// answer. Converted quotes never expire.
  pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
    self.status.can_expire() && !self.is_converted() && self.is_past_validity(now)
  }

  pub fn ensure_convertible(&self) -> Result<(), BillingError> {
    if let Some(invoice_id) = self.converted_to_invoice_id {
      return Err(BillingError::QuoteAlreadyConverted {
        quote_id: self.id,
        invoice_id,
      });
    }
    if self.status.is_terminal() {
      return Err(BillingError::transition(self.status, "converted"));
    }
    Ok(())
  }

  pub fn is_converted(&self) -> bool {
    self.converted_to_invoice_id.is_some()
  }
}

// Invoice - billed document owning its payments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
  pub id: Uuid,
  pub number: String,
  pub status: InvoiceStatus,
  pub customer: CustomerInfo,
  pub items: Vec<LineItem>,
  pub totals: BillingTotals,
  pub currency: Currency,
  pub balance_due: Decimal,
  pub due_date: DateTime<Utc>,
  pub notes: Option<String>,
  pub terms: Option<String>,
  pub source_quote_id: Option<Uuid>,
  pub payments: Vec<Payment>,
  pub created_by: Uuid,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Invoice {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    number: String,
    customer: CustomerInfo,
    items: Vec<LineItem>,
    totals: BillingTotals,
    currency: Currency,
    due_date: DateTime<Utc>,
    notes: Option<String>,
    terms: Option<String>,
    source_quote_id: Option<Uuid>,
    created_by: Uuid,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      number,
      status: InvoiceStatus::Draft,
      customer,
      items,
      balance_due: super::balance::balance_due(totals.grand_total, Decimal::ZERO),
      totals,
      currency,
      due_date,
      notes,
      terms,
      source_quote_id,
      payments: Vec::new(),
      created_by,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn change_status(&mut self, new_status: InvoiceStatus) -> Result<(), BillingError> {
    if !self.status.can_transition_to(new_status) {
      return Err(BillingError::transition(self.status, new_status));
    }

    self.status = new_status;
    self.updated_at = Utc::now();
    Ok(())
  }

  pub fn replace_items(&mut self, items: Vec<LineItem>, shipping: Decimal, adjustment: Decimal) {
    self.totals = totals_for(&items, shipping, adjustment);
    self.items = items;
    self.updated_at = Utc::now();
  }

  pub fn payments_total(&self) -> Decimal {
    round(self.payments.iter().map(|p| p.amount).sum())
  }

  /// Amount received beyond the grand total. The balance itself never goes
  /// below zero, so this is the only place an overpayment shows up.
  pub fn overpayment(&self) -> Decimal {
    let excess = round(self.payments_total() - self.totals.grand_total);
    excess.max(Decimal::ZERO)
  }

  pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
    super::balance::is_overdue(self.due_date, now)
  }
}

// Payment - immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub id: Uuid,
  pub invoice_id: Uuid,
  pub amount: Decimal,
  pub method: PaymentMethod,
  pub reference: Option<String>,
  pub notes: Option<String>,
  pub received_at: DateTime<Utc>,
  pub created_by: Uuid,
  pub created_at: DateTime<Utc>,
}

impl Payment {
  pub fn new(
    invoice_id: Uuid,
    amount: PaymentAmount,
    method: PaymentMethod,
    reference: Option<String>,
    notes: Option<String>,
    received_at: Option<DateTime<Utc>>,
    created_by: Uuid,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      invoice_id,
      amount: amount.value(),
      method,
      reference,
      notes,
      received_at: received_at.unwrap_or(now),
      created_by,
      created_at: now,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rust_decimal_macros::dec;

  fn item(qty: Decimal, price: Decimal, discount: Decimal, tax: Decimal) -> LineItem {
    LineItem::new(
      LineItemDescription::new("Service".to_string()).unwrap(),
      Quantity::new(qty).unwrap(),
      UnitPrice::new(price).unwrap(),
      Percentage::new(discount).unwrap(),
      Percentage::new(tax).unwrap(),
    )
  }

  fn quote() -> Quote {
    let items = vec![item(dec!(2), dec!(450), dec!(5), dec!(18))];
    let totals = totals_for(&items, Decimal::ZERO, Decimal::ZERO);
    Quote::new(
      "Q-2024-0001".to_string(),
      CustomerInfo::named("Asha"),
      items,
      totals,
      Currency::INR,
      None,
      None,
      None,
      Uuid::new_v4(),
    )
  }

  fn invoice(grand_total_price: Decimal) -> Invoice {
    let items = vec![item(dec!(1), grand_total_price, dec!(0), dec!(0))];
    let totals = totals_for(&items, Decimal::ZERO, Decimal::ZERO);
    Invoice::new(
      "INV-2024-0001".to_string(),
      CustomerInfo::named("Asha"),
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

  fn payment(invoice_id: Uuid, amount: Decimal) -> Payment {
    Payment::new(
      invoice_id,
      PaymentAmount::new(amount).unwrap(),
      PaymentMethod::Upi,
      None,
      None,
      None,
      Uuid::new_v4(),
    )
  }

  #[test]
  fn test_line_item_derives_amounts() {
    let item = item(dec!(2), dec!(450), dec!(5), dec!(18));

    assert_eq!(item.subtotal(), dec!(900.00));
    assert_eq!(item.discount_amount(), dec!(45.00));
    assert_eq!(item.tax_amount(), dec!(153.90));
    assert_eq!(item.total(), dec!(1008.90));
  }

  #[test]
  fn test_line_item_serializes_flat() {
    let json = serde_json::to_value(item(dec!(1), dec!(10), dec!(0), dec!(18))).unwrap();

    assert_eq!(json["description"], "Service");
    assert!(json.get("total").is_some());
    assert!(json.get("amounts").is_none());
  }

  #[test]
  fn test_new_quote_is_draft() {
    let quote = quote();

    assert_eq!(quote.status, QuoteStatus::Draft);
    assert_eq!(quote.totals.grand_total, dec!(1008.90));
    assert!(!quote.is_converted());
  }

  #[test]
  fn test_quote_status_change() {
    let mut quote = quote();

    quote.change_status(QuoteStatus::Sent).unwrap();
    assert_eq!(quote.status, QuoteStatus::Sent);

    let err = quote.change_status(QuoteStatus::Draft).unwrap_err();
    assert!(matches!(err, BillingError::InvalidStatusTransition { .. }));
  }

  #[test]
  fn test_quote_conversion_guard() {
    let mut quote = quote();
    assert!(quote.ensure_convertible().is_ok());

    quote.converted_to_invoice_id = Some(Uuid::new_v4());
    assert!(matches!(
      quote.ensure_convertible(),
      Err(BillingError::QuoteAlreadyConverted { .. })
    ));

    let mut voided = self::quote();
    voided.change_status(QuoteStatus::Void).unwrap();
    assert!(voided.ensure_convertible().is_err());
  }

  #[test]
  fn test_draft_quote_is_convertible() {
    let draft = quote();
    assert_eq!(draft.status, QuoteStatus::Draft);
    assert!(draft.ensure_convertible().is_ok());

    let mut accepted = quote();
    accepted.change_status(QuoteStatus::Sent).unwrap();
    accepted.change_status(QuoteStatus::Accepted).unwrap();
    assert!(accepted.ensure_convertible().is_ok());

    let mut expired = quote();
    expired.change_status(QuoteStatus::Expired).unwrap();
    assert!(expired.ensure_convertible().is_err());
  }

  #[test]
  fn test_requested_quote_status() {
    let now = Utc::now();
    let mut quote = quote();

    quote.apply_requested_status(QuoteStatus::Draft, now).unwrap();
    assert_eq!(quote.status, QuoteStatus::Draft);

    assert!(matches!(
      quote.apply_requested_status(QuoteStatus::Expired, now),
      Err(BillingError::InvalidStatusTransition { .. })
    ));

    quote.valid_until = Some(now - chrono::Duration::hours(1));
    quote.apply_requested_status(QuoteStatus::Expired, now).unwrap();
    assert_eq!(quote.status, QuoteStatus::Expired);

    assert!(quote.apply_requested_status(QuoteStatus::Sent, now).is_err());
  }

  #[test]
  fn test_quote_expiry() {
    let mut quote = quote();
    let now = Utc::now();

    assert!(!quote.is_expirable(now));

    quote.valid_until = Some(now - chrono::Duration::days(1));
    assert!(quote.is_expirable(now));

    quote.converted_to_invoice_id = Some(Uuid::new_v4());
    assert!(!quote.is_expirable(now));
    quote.converted_to_invoice_id = None;

    quote.change_status(QuoteStatus::Sent).unwrap();
    quote.change_status(QuoteStatus::Accepted).unwrap();
    assert!(!quote.is_expirable(now));
  }

  #[test]
  fn test_replace_items_recomputes_totals() {
    let mut quote = quote();

    quote.replace_items(
      vec![item(dec!(1), dec!(100), dec!(0), dec!(18))],
      dec!(50),
      Decimal::ZERO,
    );

    assert_eq!(quote.totals.subtotal, dec!(100.00));
    assert_eq!(quote.totals.shipping_amount, Some(dec!(50.00)));
    assert_eq!(quote.totals.grand_total, dec!(168.00));
  }

  #[test]
  fn test_new_invoice_owes_grand_total() {
    let invoice = invoice(dec!(1699.20));

    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert_eq!(invoice.balance_due, dec!(1699.20));
    assert!(invoice.payments.is_empty());
  }

  #[test]
  fn test_new_invoice_balance_never_negative() {
    let items = vec![item(dec!(1), dec!(1000), dec!(0), dec!(0))];
    let totals = totals_for(&items, Decimal::ZERO, dec!(-1500));
    assert_eq!(totals.grand_total, dec!(-500.00));

    let invoice = Invoice::new(
      "INV-2024-0002".to_string(),
      CustomerInfo::named("Asha"),
      items,
      totals,
      Currency::INR,
      Utc::now(),
      None,
      None,
      None,
      Uuid::new_v4(),
    );

    assert_eq!(invoice.balance_due, Decimal::ZERO);
  }

  #[test]
  fn test_payments_total_and_overpayment() {
    let mut invoice = invoice(dec!(100));
    invoice.payments.push(payment(invoice.id, dec!(60)));
    assert_eq!(invoice.payments_total(), dec!(60.00));
    assert_eq!(invoice.overpayment(), Decimal::ZERO);

    invoice.payments.push(payment(invoice.id, dec!(55.5)));
    assert_eq!(invoice.payments_total(), dec!(115.50));
    assert_eq!(invoice.overpayment(), dec!(15.50));
  }

  #[test]
  fn test_payment_defaults_received_at() {
    let before = Utc::now();
    let payment = payment(Uuid::new_v4(), dec!(10));

    assert!(payment.received_at >= before);
    assert_eq!(payment.amount, dec!(10));
  }
}
