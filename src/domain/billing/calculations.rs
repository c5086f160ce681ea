use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::money::round;
use super::value_objects::{Percentage, Quantity, UnitPrice, ValueObjectError};

/// Derived amounts of a single line item, all rounded to currency precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemAmounts {
  pub subtotal: Decimal,
  pub discount_amount: Decimal,
  pub tax_amount: Decimal,
  pub total: Decimal,
}

/// Computes line amounts in a fixed order: subtotal, discount, tax on the
/// discounted amount, total. Each step rounds, so the sum of the parts always
/// equals the rounded whole.
pub fn compute_line_item(
  quantity: Quantity,
  unit_price: UnitPrice,
  discount: Percentage,
  tax_rate: Percentage,
) -> LineItemAmounts {
  let subtotal = round(quantity.value() * unit_price.value());
  let discount_amount = round(subtotal * discount.as_multiplier());
  let taxable = subtotal - discount_amount;
  let tax_amount = round(taxable * tax_rate.as_multiplier());
  let total = round(taxable + tax_amount);

  LineItemAmounts {
    subtotal,
    discount_amount,
    tax_amount,
    total,
  }
}

const MAX_DESCRIPTION_LENGTH: usize = 500;
const MAX_QUANTITY: Decimal = dec!(99999);
const MAX_UNIT_PRICE: Decimal = dec!(9999999);

/// Collects every problem with raw line item input instead of stopping at the
/// first. An empty result means the item is valid.
pub fn validate_line_item(
  description: &str,
  quantity: Decimal,
  unit_price: Decimal,
  discount: Option<Decimal>,
  tax_rate: Option<Decimal>,
) -> Vec<String> {
  let mut errors = Vec::new();

  let description = description.trim();
  if description.is_empty() {
    errors.push("Description is required".to_string());
  } else if description.chars().count() > MAX_DESCRIPTION_LENGTH {
    errors.push(format!(
      "Description cannot exceed {} characters",
      MAX_DESCRIPTION_LENGTH
    ));
  }

  if quantity <= Decimal::ZERO {
    errors.push("Quantity must be greater than 0".to_string());
  } else if quantity > MAX_QUANTITY {
    errors.push(format!("Quantity cannot exceed {}", MAX_QUANTITY));
  }

  if unit_price < Decimal::ZERO {
    errors.push("Unit price cannot be negative".to_string());
  } else if unit_price > MAX_UNIT_PRICE {
    errors.push(format!("Unit price cannot exceed {}", MAX_UNIT_PRICE));
  }

  if let Some(discount) = discount {
    if discount < Decimal::ZERO || discount > Decimal::ONE_HUNDRED {
      errors.push("Discount must be between 0 and 100".to_string());
    }
  }

  if let Some(tax_rate) = tax_rate {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
      errors.push("Tax rate must be between 0 and 100".to_string());
    }
  }

  errors
}

/// Document-level totals.
///
/// Shipping is only present when positive and the adjustment only when
/// non-zero; absent values are omitted from serialized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingTotals {
  pub subtotal: Decimal,
  pub discount_total: Decimal,
  pub tax_total: Decimal,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shipping_amount: Option<Decimal>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub adjustment_amount: Option<Decimal>,
  pub grand_total: Decimal,
}

impl BillingTotals {
  pub fn shipping(&self) -> Decimal {
    self.shipping_amount.unwrap_or(Decimal::ZERO)
  }

  pub fn adjustment(&self) -> Decimal {
    self.adjustment_amount.unwrap_or(Decimal::ZERO)
  }
}

/// Aggregates line amounts into document totals.
///
/// Each component is summed and rounded independently; the grand total is
/// derived from the already-rounded components. Sums saturate at the
/// `Decimal` range instead of overflowing.
pub fn compute_totals<'a, I>(items: I, shipping: Decimal, adjustment: Decimal) -> BillingTotals
where
  I: IntoIterator<Item = &'a LineItemAmounts>,
{
  let (subtotal, discount_total, tax_total) = items.into_iter().fold(
    (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
    |(sub, disc, tax), item| {
      (
        sub.saturating_add(item.subtotal),
        disc.saturating_add(item.discount_amount),
        tax.saturating_add(item.tax_amount),
      )
    },
  );

  let subtotal = round(subtotal);
  let discount_total = round(discount_total);
  let tax_total = round(tax_total);
  let shipping = round(shipping);
  let adjustment = round(adjustment);

  let grand_total = round(
    subtotal
      .saturating_sub(discount_total)
      .saturating_add(tax_total)
      .saturating_add(shipping)
      .saturating_add(adjustment),
  );

  BillingTotals {
    subtotal,
    discount_total,
    tax_total,
    shipping_amount: (shipping > Decimal::ZERO).then_some(shipping),
    adjustment_amount: (!adjustment.is_zero()).then_some(adjustment),
    grand_total,
  }
}
