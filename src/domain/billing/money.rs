//! Monetary rounding and formatting.
//!
//! Every persisted or displayed amount passes through [`round`], which rounds
//! half-up at two decimal places the same way for positive and negative
//! values: `-1.005` becomes `-1.00`, `1.005` becomes `1.01`.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::value_objects::{Currency, Percentage, ValueObjectError};

pub const CURRENCY_PRECISION: u32 = 2;

const MAX_PLACES: u32 = 18;

lazy_static! {
  static ref NON_NUMERIC: Regex = Regex::new(r"[^0-9.\-]").expect("static regex");
}

/// Rounds to `places` decimal places by scaling to an integer, adding one
/// half and taking the floor.
pub fn round_to(value: Decimal, places: u32) -> Decimal {
  let places = places.min(MAX_PLACES);
  let factor = Decimal::from(10i64.pow(places));

  let mut rounded = match value.checked_mul(factor) {
    Some(scaled) => (scaled + dec!(0.5)).floor() / factor,
    None if value.is_sign_negative() => {
      value.round_dp_with_strategy(places, RoundingStrategy::MidpointTowardZero)
    }
    None => value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero),
  };
  rounded.rescale(places);
  rounded
}

pub fn round(value: Decimal) -> Decimal {
  round_to(value, CURRENCY_PRECISION)
}

/// Equality after rounding both sides to `precision` places.
pub fn currency_equals(a: Decimal, b: Decimal, precision: u32) -> bool {
  round_to(a, precision) == round_to(b, precision)
}

/// Formats an amount with the currency symbol and locale digit grouping.
///
/// `en-IN` groups the last three digits and then pairs (`₹1,23,456.78`); every
/// other locale groups in threes. Two decimals are always shown.
pub fn format_currency(amount: Decimal, currency: Currency, locale: &str) -> String {
  let rounded = round(amount);
  let negative = rounded < Decimal::ZERO;
  let text = format!("{:.2}", rounded.abs());
  let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

  let grouped = group_digits(integer, locale.eq_ignore_ascii_case("en-IN"));
  let sign = if negative { "-" } else { "" };

  format!("{}{}{}.{}", sign, currency.symbol(), grouped, fraction)
}

fn group_digits(digits: &str, indian: bool) -> String {
  if digits.len() <= 3 {
    return digits.to_string();
  }

  let (head, tail) = digits.split_at(digits.len() - 3);
  let group = if indian { 2 } else { 3 };

  let mut groups = Vec::new();
  let mut end = head.len();
  while end > 0 {
    let start = end.saturating_sub(group);
    groups.push(&head[start..end]);
    end = start;
  }
  groups.reverse();

  format!("{},{}", groups.join(","), tail)
}

/// Parses a user-typed amount such as `"₹1,23,456.78"`.
///
/// Everything except digits, `.` and `-` is stripped; unparseable input yields
/// zero.
pub fn parse_currency(text: &str) -> Decimal {
  let cleaned = NON_NUMERIC.replace_all(text, "");
  cleaned.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

/// `value` as a percentage of `total`, rounded; zero when `total` is zero.
pub fn calculate_percentage(value: Decimal, total: Decimal) -> Decimal {
  if total.is_zero() {
    return Decimal::ZERO;
  }
  round(value / total * Decimal::ONE_HUNDRED)
}

pub fn apply_discount(amount: Decimal, discount: Decimal) -> Result<Decimal, ValueObjectError> {
  let discount = Percentage::new(discount)?;
  Ok(round(amount - amount * discount.as_multiplier()))
}

pub fn calculate_tax(amount: Decimal, rate: Decimal) -> Result<Decimal, ValueObjectError> {
  let rate = Percentage::new(rate)?;
  Ok(round(amount * rate.as_multiplier()))
}
