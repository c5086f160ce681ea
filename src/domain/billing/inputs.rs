use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::entities::LineItem;
use super::value_objects::{
  CustomerInfo, InvoiceStatus, LineItemDescription, PaymentMethod, Percentage, Quantity,
  QuoteStatus, UnitPrice, ValueObjectError,
};
use super::calculations::validate_line_item;

/// Raw line item as submitted by a caller. Derived amounts are never accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineItemInput {
  pub description: String,
  pub quantity: Decimal,
  pub unit_price: Decimal,
  #[serde(default)]
  pub discount: Option<Decimal>,
  #[serde(default)]
  pub tax_rate: Option<Decimal>,
}

impl LineItemInput {
  pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
    Self {
      description: description.into(),
      quantity,
      unit_price,
      discount: None,
      tax_rate: None,
    }
  }

  pub fn with_discount(mut self, discount: Decimal) -> Self {
    self.discount = Some(discount);
    self
  }

  pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
    self.tax_rate = Some(tax_rate);
    self
  }

  /// Validates the raw values and builds a computed item. An absent tax rate
  /// falls back to `default_tax_rate`; an explicit zero stays zero.
  pub fn into_line_item(self, default_tax_rate: Decimal) -> Result<LineItem, ValueObjectError> {
    let errors = validate_line_item(
      &self.description,
      self.quantity,
      self.unit_price,
      self.discount,
      self.tax_rate,
    );
    if !errors.is_empty() {
      return Err(ValueObjectError::InvalidLineItems(errors.join("; ")));
    }

    Ok(LineItem::new(
      LineItemDescription::new(self.description)?,
      Quantity::new(self.quantity)?,
      UnitPrice::new(self.unit_price)?,
      Percentage::new(self.discount.unwrap_or(Decimal::ZERO))?,
      Percentage::new(self.tax_rate.unwrap_or(default_tax_rate))?,
    ))
  }
}

impl From<&LineItem> for LineItemInput {
  fn from(item: &LineItem) -> Self {
    Self {
      description: item.description().to_string(),
      quantity: item.quantity(),
      unit_price: item.unit_price(),
      discount: Some(item.discount()),
      tax_rate: Some(item.tax_rate()),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuoteInput {
  pub customer: CustomerInfo,
  pub items: Vec<LineItemInput>,
  #[serde(default)]
  pub shipping_amount: Option<Decimal>,
  #[serde(default)]
  pub adjustment_amount: Option<Decimal>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub terms: Option<String>,
  #[serde(default)]
  pub valid_until: Option<DateTime<Utc>>,
}

/// Shallow patch; `items` replaces the whole list when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateQuoteInput {
  pub customer: Option<CustomerInfo>,
  pub items: Option<Vec<LineItemInput>>,
  pub shipping_amount: Option<Decimal>,
  pub adjustment_amount: Option<Decimal>,
  pub notes: Option<String>,
  pub terms: Option<String>,
  pub valid_until: Option<DateTime<Utc>>,
  pub status: Option<QuoteStatus>,
}

impl UpdateQuoteInput {
  pub fn changes_totals(&self) -> bool {
    self.items.is_some() || self.shipping_amount.is_some() || self.adjustment_amount.is_some()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvoiceInput {
  pub customer: CustomerInfo,
  pub items: Vec<LineItemInput>,
  #[serde(default)]
  pub shipping_amount: Option<Decimal>,
  #[serde(default)]
  pub adjustment_amount: Option<Decimal>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub terms: Option<String>,
  #[serde(default)]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub source_quote_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateInvoiceInput {
  pub customer: Option<CustomerInfo>,
  pub items: Option<Vec<LineItemInput>>,
  pub shipping_amount: Option<Decimal>,
  pub adjustment_amount: Option<Decimal>,
  pub notes: Option<String>,
  pub terms: Option<String>,
  pub due_date: Option<DateTime<Utc>>,
  pub status: Option<InvoiceStatus>,
}

impl UpdateInvoiceInput {
  pub fn changes_totals(&self) -> bool {
    self.items.is_some() || self.shipping_amount.is_some() || self.adjustment_amount.is_some()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentInput {
  pub invoice_id: Uuid,
  pub amount: Decimal,
  pub method: PaymentMethod,
  #[serde(default)]
  pub reference: Option<String>,
  #[serde(default)]
  pub notes: Option<String>,
  #[serde(default)]
  pub received_at: Option<DateTime<Utc>>,
}
