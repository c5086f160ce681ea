use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::numbering::NumberingConfig;
use super::value_objects::{Currency, DocumentKind, Percentage, ValueObjectError};

/// Upper bound for validity and payment terms, in days.
pub const MAX_TERM_DAYS: i64 = 3650;

/// Business defaults for document creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingSettings {
  pub currency: Currency,
  pub currency_locale: String,
  pub default_tax_rate: Decimal,
  pub quote_validity_days: i64,
  pub invoice_due_days: i64,
  pub max_number_retries: u32,
  pub default_page_size: u32,
  pub quote_numbering: NumberingConfig,
  pub invoice_numbering: NumberingConfig,
}

impl Default for BillingSettings {
  fn default() -> Self {
    Self {
      currency: Currency::INR,
      currency_locale: "en-IN".to_string(),
      default_tax_rate: dec!(18),
      quote_validity_days: 30,
      invoice_due_days: 30,
      max_number_retries: 100,
      default_page_size: 10,
      quote_numbering: NumberingConfig::for_kind(DocumentKind::Quote),
      invoice_numbering: NumberingConfig::for_kind(DocumentKind::Invoice),
    }
  }
}

impl BillingSettings {
  pub fn validate(&self) -> Result<(), ValueObjectError> {
    Percentage::new(self.default_tax_rate)?;
    self.quote_numbering.validate()?;
    self.invoice_numbering.validate()?;
    for (name, days) in [
      ("Quote validity", self.quote_validity_days),
      ("Invoice due", self.invoice_due_days),
    ] {
      if !(0..=MAX_TERM_DAYS).contains(&days) {
        return Err(ValueObjectError::InvalidSettings(format!(
          "{} days must be between 0 and {}, got {}",
          name, MAX_TERM_DAYS, days
        )));
      }
    }
    if self.default_page_size == 0 {
      return Err(ValueObjectError::InvalidPagination(
        "Default page size must be greater than 0".to_string(),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let settings = BillingSettings::default();

    assert!(settings.validate().is_ok());
    assert_eq!(settings.quote_numbering.prefix, "Q");
    assert_eq!(settings.invoice_numbering.prefix, "INV");
  }

  #[test]
  fn test_rejects_out_of_range_tax_rate() {
    let settings = BillingSettings {
      default_tax_rate: dec!(120),
      ..BillingSettings::default()
    };

    assert!(matches!(
      settings.validate(),
      Err(ValueObjectError::InvalidPercentage(_))
    ));
  }

  #[test]
  fn test_rejects_unbounded_terms() {
    for settings in [
      BillingSettings {
        quote_validity_days: i64::MAX,
        ..BillingSettings::default()
      },
      BillingSettings {
        invoice_due_days: -1,
        ..BillingSettings::default()
      },
      BillingSettings {
        invoice_due_days: MAX_TERM_DAYS + 1,
        ..BillingSettings::default()
      },
    ] {
      assert!(matches!(
        settings.validate(),
        Err(ValueObjectError::InvalidSettings(_))
      ));
    }

    let longest = BillingSettings {
      quote_validity_days: MAX_TERM_DAYS,
      invoice_due_days: 0,
      ..BillingSettings::default()
    };
    assert!(longest.validate().is_ok());
  }

  #[test]
  fn test_partial_settings_keep_defaults() {
    let settings: BillingSettings = toml::from_str(
      r#"
        default_tax_rate = 5
        currency = "USD"

        [invoice_numbering]
        prefix = "BILL"
        include_year = false
        digit_count = 6
        separator = "/"
        reset_yearly = false
      "#,
    )
    .unwrap();

    assert_eq!(settings.default_tax_rate, dec!(5));
    assert_eq!(settings.currency, Currency::USD);
    assert_eq!(settings.quote_numbering.prefix, "Q");
    assert_eq!(settings.invoice_numbering.separator, "/");
    assert!(settings.validate().is_ok());
  }
}
