use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

const MAX_DESCRIPTION_LENGTH: usize = 500;
const MAX_QUANTITY: Decimal = dec!(99999);
const MAX_UNIT_PRICE: Decimal = dec!(9999999);
const MAX_PAYMENT_AMOUNT: Decimal = dec!(9999999);
const MAX_DOCUMENT_CHARGE: Decimal = dec!(9999999);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueObjectError {
  #[error("Invalid line item description: {0}")]
  InvalidDescription(String),
  #[error("Invalid quantity: {0}")]
  InvalidQuantity(String),
  #[error("Invalid unit price: {0}")]
  InvalidUnitPrice(String),
  #[error("Invalid percentage: {0}")]
  InvalidPercentage(String),
  #[error("Invalid amount: {0}")]
  InvalidAmount(String),
  #[error("Invalid line items: {0}")]
  InvalidLineItems(String),
  #[error("Invalid customer: {0}")]
  InvalidCustomer(String),
  #[error("Invalid currency code: {0}")]
  InvalidCurrency(String),
  #[error("Invalid status: {0}")]
  InvalidStatus(String),
  #[error("Invalid payment method: {0}")]
  InvalidPaymentMethod(String),
  #[error("Invalid numbering configuration: {0}")]
  InvalidNumberingConfig(String),
  #[error("Invalid pagination: {0}")]
  InvalidPagination(String),
  #[error("Invalid settings: {0}")]
  InvalidSettings(String),
}

// Document kind - the two billing artifacts that carry a sequential number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
  Quote,
  Invoice,
}

impl DocumentKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      DocumentKind::Quote => "quote",
      DocumentKind::Invoice => "invoice",
    }
  }
}

impl fmt::Display for DocumentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// Quote Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
  Draft,
  Sent,
  Accepted,
  Expired,
  Void,
}

impl QuoteStatus {
  pub fn can_transition_to(&self, new_status: QuoteStatus) -> bool {
    match (self, new_status) {
      (QuoteStatus::Draft, QuoteStatus::Sent) => true,
      (QuoteStatus::Sent, QuoteStatus::Accepted) => true,
      // Expiry is only reachable before the customer has answered
      (QuoteStatus::Draft, QuoteStatus::Expired) => true,
      (QuoteStatus::Sent, QuoteStatus::Expired) => true,
      (from, QuoteStatus::Void) => !from.is_terminal(),
      _ => false,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, QuoteStatus::Expired | QuoteStatus::Void)
  }

  pub fn can_expire(&self) -> bool {
    matches!(self, QuoteStatus::Draft | QuoteStatus::Sent)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      QuoteStatus::Draft => "draft",
      QuoteStatus::Sent => "sent",
      QuoteStatus::Accepted => "accepted",
      QuoteStatus::Expired => "expired",
      QuoteStatus::Void => "void",
    }
  }
}

impl FromStr for QuoteStatus {
  type Err = ValueObjectError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "draft" => Ok(QuoteStatus::Draft),
      "sent" => Ok(QuoteStatus::Sent),
      "accepted" => Ok(QuoteStatus::Accepted),
      "expired" => Ok(QuoteStatus::Expired),
      "void" => Ok(QuoteStatus::Void),
      _ => Err(ValueObjectError::InvalidStatus(format!(
        "Unknown quote status: {}",
        s
      ))),
    }
  }
}

impl fmt::Display for QuoteStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// Invoice Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
  Draft,
  Sent,
  Paid,
  Void,
}

impl InvoiceStatus {
  /// Manual transitions. Settlement to `Paid` through payments is handled by
  /// the balance engine and does not go through this check.
  pub fn can_transition_to(&self, new_status: InvoiceStatus) -> bool {
    match (self, new_status) {
      (InvoiceStatus::Draft, InvoiceStatus::Sent) => true,
      (InvoiceStatus::Sent, InvoiceStatus::Paid) => true,
      (InvoiceStatus::Void, InvoiceStatus::Void) => false,
      (_, InvoiceStatus::Void) => true,
      _ => false,
    }
  }

  pub fn accepts_payments(&self) -> bool {
    !matches!(self, InvoiceStatus::Void)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      InvoiceStatus::Draft => "draft",
      InvoiceStatus::Sent => "sent",
      InvoiceStatus::Paid => "paid",
      InvoiceStatus::Void => "void",
    }
  }
}

impl FromStr for InvoiceStatus {
  type Err = ValueObjectError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "draft" => Ok(InvoiceStatus::Draft),
      "sent" => Ok(InvoiceStatus::Sent),
      "paid" => Ok(InvoiceStatus::Paid),
      "void" => Ok(InvoiceStatus::Void),
      _ => Err(ValueObjectError::InvalidStatus(format!(
        "Unknown invoice status: {}",
        s
      ))),
    }
  }
}

impl fmt::Display for InvoiceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// Payment Method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
  Cash,
  Card,
  BankTransfer,
  Upi,
  Cheque,
}

impl PaymentMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      PaymentMethod::Cash => "cash",
      PaymentMethod::Card => "card",
      PaymentMethod::BankTransfer => "bank_transfer",
      PaymentMethod::Upi => "upi",
      PaymentMethod::Cheque => "cheque",
    }
  }
}

impl FromStr for PaymentMethod {
  type Err = ValueObjectError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "cash" => Ok(PaymentMethod::Cash),
      "card" => Ok(PaymentMethod::Card),
      "bank_transfer" => Ok(PaymentMethod::BankTransfer),
      "upi" => Ok(PaymentMethod::Upi),
      "cheque" => Ok(PaymentMethod::Cheque),
      _ => Err(ValueObjectError::InvalidPaymentMethod(format!(
        "Unknown payment method: {}",
        s
      ))),
    }
  }
}

// Currency - ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
  INR,
  USD,
  EUR,
  GBP,
}

impl Currency {
  pub fn as_str(&self) -> &'static str {
    match self {
      Currency::INR => "INR",
      Currency::USD => "USD",
      Currency::EUR => "EUR",
      Currency::GBP => "GBP",
    }
  }

  pub fn symbol(&self) -> &'static str {
    match self {
      Currency::INR => "₹",
      Currency::USD => "$",
      Currency::EUR => "€",
      Currency::GBP => "£",
    }
  }
}

impl FromStr for Currency {
  type Err = ValueObjectError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "INR" => Ok(Currency::INR),
      "USD" => Ok(Currency::USD),
      "EUR" => Ok(Currency::EUR),
      "GBP" => Ok(Currency::GBP),
      _ => Err(ValueObjectError::InvalidCurrency(format!(
        "Unsupported currency: {}",
        s
      ))),
    }
  }
}

impl fmt::Display for Currency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// Line Item Description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDescription(String);

impl LineItemDescription {
  pub fn new(value: String) -> Result<Self, ValueObjectError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
      return Err(ValueObjectError::InvalidDescription(
        "Description is required".to_string(),
      ));
    }
    if trimmed.chars().count() > MAX_DESCRIPTION_LENGTH {
      return Err(ValueObjectError::InvalidDescription(format!(
        "Description cannot exceed {} characters",
        MAX_DESCRIPTION_LENGTH
      )));
    }
    Ok(Self(trimmed.to_string()))
  }

  pub fn value(&self) -> &str {
    &self.0
  }

  pub fn into_inner(self) -> String {
    self.0
  }
}

// Quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value <= Decimal::ZERO {
      return Err(ValueObjectError::InvalidQuantity(
        "Quantity must be greater than 0".to_string(),
      ));
    }
    if value > MAX_QUANTITY {
      return Err(ValueObjectError::InvalidQuantity(format!(
        "Quantity cannot exceed {}",
        MAX_QUANTITY
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }
}

// Unit Price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice(Decimal);

impl UnitPrice {
  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value.is_sign_negative() && !value.is_zero() {
      return Err(ValueObjectError::InvalidUnitPrice(
        "Unit price cannot be negative".to_string(),
      ));
    }
    if value > MAX_UNIT_PRICE {
      return Err(ValueObjectError::InvalidUnitPrice(format!(
        "Unit price cannot exceed {}",
        MAX_UNIT_PRICE
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }
}

// Percentage - discount and tax rates, 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentage(Decimal);

impl Percentage {
  pub const ZERO: Percentage = Percentage(Decimal::ZERO);

  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
      return Err(ValueObjectError::InvalidPercentage(format!(
        "{} is not between 0 and 100 percent",
        value
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }

  pub fn as_multiplier(&self) -> Decimal {
    self.0 / Decimal::ONE_HUNDRED
  }
}

// Payment Amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAmount(Decimal);

impl PaymentAmount {
  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value <= Decimal::ZERO {
      return Err(ValueObjectError::InvalidAmount(
        "Payment amount must be greater than 0".to_string(),
      ));
    }
    if value > MAX_PAYMENT_AMOUNT {
      return Err(ValueObjectError::InvalidAmount(format!(
        "Payment amount cannot exceed {}",
        MAX_PAYMENT_AMOUNT
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }
}

// Shipping charge - document level, never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAmount(Decimal);

impl ShippingAmount {
  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value < Decimal::ZERO {
      return Err(ValueObjectError::InvalidAmount(
        "Shipping amount cannot be negative".to_string(),
      ));
    }
    if value > MAX_DOCUMENT_CHARGE {
      return Err(ValueObjectError::InvalidAmount(format!(
        "Shipping amount cannot exceed {}",
        MAX_DOCUMENT_CHARGE
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }
}

// Adjustment - signed, e.g. round-off or a goodwill credit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment(Decimal);

impl Adjustment {
  pub fn new(value: Decimal) -> Result<Self, ValueObjectError> {
    if value.abs() > MAX_DOCUMENT_CHARGE {
      return Err(ValueObjectError::InvalidAmount(format!(
        "Adjustment must be between -{max} and {max}",
        max = MAX_DOCUMENT_CHARGE
      )));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> Decimal {
    self.0
  }
}

/// Customer snapshot copied onto every billing document.
///
/// It is a copy rather than a reference so documents survive later edits to the
/// customer record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CustomerInfo {
  #[validate(length(
    min = 1,
    max = 255,
    message = "Customer name must be between 1 and 255 characters"
  ))]
  pub name: String,
  #[validate(email(message = "Invalid email address"))]
  pub email: Option<String>,
  pub phone: Option<String>,
  pub address: Option<String>,
  pub gst_number: Option<String>,
}

impl CustomerInfo {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  /// Trims every field, drops blank optional fields and validates the result.
  pub fn normalized(self) -> Result<Self, ValueObjectError> {
    let customer = Self {
      name: self.name.trim().to_string(),
      email: non_blank(self.email),
      phone: non_blank(self.phone),
      address: non_blank(self.address),
      gst_number: non_blank(self.gst_number),
    };

    customer
      .validate()
      .map_err(|e| ValueObjectError::InvalidCustomer(e.to_string()))?;

    Ok(customer)
  }
}

fn non_blank(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_quote_status_transitions() {
    assert!(QuoteStatus::Draft.can_transition_to(QuoteStatus::Sent));
    assert!(QuoteStatus::Sent.can_transition_to(QuoteStatus::Accepted));
    assert!(QuoteStatus::Draft.can_transition_to(QuoteStatus::Expired));
    assert!(QuoteStatus::Accepted.can_transition_to(QuoteStatus::Void));

    assert!(!QuoteStatus::Draft.can_transition_to(QuoteStatus::Accepted));
    assert!(!QuoteStatus::Accepted.can_transition_to(QuoteStatus::Expired));
    assert!(!QuoteStatus::Expired.can_transition_to(QuoteStatus::Void));
    assert!(!QuoteStatus::Void.can_transition_to(QuoteStatus::Draft));
  }

  #[test]
  fn test_invoice_status_transitions() {
    assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Sent));
    assert!(InvoiceStatus::Sent.can_transition_to(InvoiceStatus::Paid));
    assert!(InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Void));
    assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Void));

    assert!(!InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Paid));
    assert!(!InvoiceStatus::Paid.can_transition_to(InvoiceStatus::Sent));
    assert!(!InvoiceStatus::Void.can_transition_to(InvoiceStatus::Void));
    assert!(!InvoiceStatus::Void.accepts_payments());
  }

  #[test]
  fn test_status_parsing() {
    assert_eq!(QuoteStatus::from_str("SENT").unwrap(), QuoteStatus::Sent);
    assert_eq!(InvoiceStatus::from_str("paid").unwrap(), InvoiceStatus::Paid);
    assert!(InvoiceStatus::from_str("partial").is_err());
    assert_eq!(
      PaymentMethod::from_str("bank_transfer").unwrap(),
      PaymentMethod::BankTransfer
    );
    assert!(PaymentMethod::from_str("bitcoin").is_err());
  }

  #[test]
  fn test_document_charges_are_bounded() {
    assert_eq!(ShippingAmount::new(dec!(150)).unwrap().value(), dec!(150));
    assert!(ShippingAmount::new(dec!(-1)).is_err());
    assert!(ShippingAmount::new(dec!(10000000)).is_err());
    assert!(ShippingAmount::new(Decimal::MAX).is_err());

    assert_eq!(Adjustment::new(dec!(-250.50)).unwrap().value(), dec!(-250.50));
    assert!(Adjustment::new(dec!(9999999)).is_ok());
    assert!(Adjustment::new(dec!(-10000000)).is_err());
    assert!(Adjustment::new(Decimal::MIN).is_err());
  }

  #[test]
  fn test_currency() {
    assert_eq!(Currency::INR.symbol(), "₹");
    assert_eq!(Currency::from_str("usd").unwrap(), Currency::USD);
    assert!(Currency::from_str("JPY").is_err());
  }

  #[test]
  fn test_description() {
    assert_eq!(
      LineItemDescription::new("  Battery check ".to_string())
        .unwrap()
        .value(),
      "Battery check"
    );
    assert!(LineItemDescription::new("   ".to_string()).is_err());
    assert!(LineItemDescription::new("x".repeat(501)).is_err());
  }

  #[test]
  fn test_quantity_and_price() {
    assert!(Quantity::new(dec!(0.5)).is_ok());
    assert!(Quantity::new(dec!(0)).is_err());
    assert!(Quantity::new(dec!(100000)).is_err());
    assert!(UnitPrice::new(dec!(0)).is_ok());
    assert!(UnitPrice::new(dec!(-0.01)).is_err());
  }

  #[test]
  fn test_percentage() {
    assert!(Percentage::new(dec!(0)).is_ok());
    assert!(Percentage::new(dec!(100)).is_ok());
    assert!(Percentage::new(dec!(-1)).is_err());
    assert!(Percentage::new(dec!(100.01)).is_err());
    assert_eq!(Percentage::new(dec!(18)).unwrap().as_multiplier(), dec!(0.18));
  }

  #[test]
  fn test_payment_amount() {
    assert!(PaymentAmount::new(dec!(0.01)).is_ok());
    assert!(PaymentAmount::new(dec!(0)).is_err());
    assert!(PaymentAmount::new(dec!(-5)).is_err());
  }

  #[test]
  fn test_customer_normalization() {
    let customer = CustomerInfo {
      name: "  Ravi Kumar ".to_string(),
      email: Some("".to_string()),
      phone: Some(" 98450 00000 ".to_string()),
      address: None,
      gst_number: Some("   ".to_string()),
    }
    .normalized()
    .unwrap();

    assert_eq!(customer.name, "Ravi Kumar");
    assert_eq!(customer.email, None);
    assert_eq!(customer.phone.as_deref(), Some("98450 00000"));
    assert_eq!(customer.gst_number, None);
  }

  #[test]
  fn test_customer_validation() {
    assert!(CustomerInfo::named("  ").normalized().is_err());

    let bad_email = CustomerInfo {
      email: Some("not-an-email".to_string()),
      ..CustomerInfo::named("Ravi")
    };
    assert!(bad_email.normalized().is_err());

    let good_email = CustomerInfo {
      email: Some("ravi@example.com".to_string()),
      ..CustomerInfo::named("Ravi")
    };
    assert!(good_email.normalized().is_ok());
  }
}
