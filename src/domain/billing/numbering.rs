//! Sequential document numbers such as `Q-2024-0001` or `INV-0042`.
//!
//! The counter store is the single serialization point for allocation. Every
//! call also reconciles against the numbers already in use, so a counter that
//! lost its state (a fresh in-memory store after a restart) never reissues an
//! existing number.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::errors::BillingError;
use super::ports::CounterStore;
use super::value_objects::{DocumentKind, ValueObjectError};

const MAX_DIGIT_COUNT: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberingConfig {
  pub prefix: String,
  pub include_year: bool,
  pub digit_count: usize,
  pub separator: String,
  pub reset_yearly: bool,
}

impl NumberingConfig {
  pub fn for_kind(kind: DocumentKind) -> Self {
    let prefix = match kind {
      DocumentKind::Quote => "Q",
      DocumentKind::Invoice => "INV",
    };
    Self {
      prefix: prefix.to_string(),
      include_year: true,
      digit_count: 4,
      separator: "-".to_string(),
      reset_yearly: true,
    }
  }

  pub fn validate(&self) -> Result<(), ValueObjectError> {
    if self.prefix.trim().is_empty() {
      return Err(ValueObjectError::InvalidNumberingConfig(
        "Prefix cannot be empty".to_string(),
      ));
    }
    if self.separator.is_empty() {
      return Err(ValueObjectError::InvalidNumberingConfig(
        "Separator cannot be empty".to_string(),
      ));
    }
    if self.prefix.contains(&self.separator) {
      return Err(ValueObjectError::InvalidNumberingConfig(format!(
        "Prefix '{}' cannot contain the separator '{}'",
        self.prefix, self.separator
      )));
    }
    if self.digit_count == 0 || self.digit_count > MAX_DIGIT_COUNT {
      return Err(ValueObjectError::InvalidNumberingConfig(format!(
        "Digit count must be between 1 and {}",
        MAX_DIGIT_COUNT
      )));
    }
    Ok(())
  }

  /// Whether counters and reconciliation are scoped to a calendar year.
  pub fn is_year_scoped(&self) -> bool {
    self.include_year && self.reset_yearly
  }
}

/// Identity of one monotonic counter: per kind, and per year when the
/// numbering resets yearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
  pub kind: DocumentKind,
  pub year: Option<i32>,
}

impl CounterKey {
  pub fn new(kind: DocumentKind, config: &NumberingConfig, year: i32) -> Self {
    Self {
      kind,
      year: config.is_year_scoped().then_some(year),
    }
  }
}

impl fmt::Display for CounterKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.year {
      Some(year) => write!(f, "{}_{}", self.kind, year),
      None => write!(f, "{}", self.kind),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedNumber {
  pub year: Option<i32>,
  pub sequence: u64,
}

pub fn format_number(config: &NumberingConfig, sequence: u64, year: i32) -> String {
  let padded = format!("{:0width$}", sequence, width = config.digit_count);
  if config.include_year {
    format!(
      "{}{sep}{}{sep}{}",
      config.prefix,
      year,
      padded,
      sep = config.separator
    )
  } else {
    format!("{}{}{}", config.prefix, config.separator, padded)
  }
}

/// Inverse of [`format_number`]. Anything that does not match the configured
/// shape yields `None`.
pub fn parse_existing_number(number: &str, config: &NumberingConfig) -> Option<ParsedNumber> {
  let parts: Vec<&str> = number.split(config.separator.as_str()).collect();

  match (config.include_year, parts.as_slice()) {
    (true, [prefix, year, sequence]) if *prefix == config.prefix => {
      if year.len() != 4 || !is_digits(year) || !is_digits(sequence) {
        return None;
      }
      Some(ParsedNumber {
        year: Some(year.parse().ok()?),
        sequence: sequence.parse().ok()?,
      })
    }
    (false, [prefix, sequence]) if *prefix == config.prefix => {
      if !is_digits(sequence) {
        return None;
      }
      Some(ParsedNumber {
        year: None,
        sequence: sequence.parse().ok()?,
      })
    }
    _ => None,
  }
}

fn is_digits(part: &str) -> bool {
  !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_number_format(number: &str, config: &NumberingConfig) -> bool {
  parse_existing_number(number, config).is_some()
}

pub fn extract_year(number: &str, config: &NumberingConfig) -> Option<i32> {
  parse_existing_number(number, config).and_then(|parsed| parsed.year)
}

pub fn filter_numbers_by_year<'a>(
  numbers: &'a [String],
  year: i32,
  config: &NumberingConfig,
) -> Vec<&'a str> {
  numbers
    .iter()
    .filter(|number| extract_year(number, config) == Some(year))
    .map(String::as_str)
    .collect()
}

/// Highest sequence among `existing` that belongs to the counter for `year`.
pub fn highest_sequence<S: AsRef<str>>(existing: &[S], config: &NumberingConfig, year: i32) -> u64 {
  existing
    .iter()
    .filter_map(|number| parse_existing_number(number.as_ref(), config))
    .filter(|parsed| !config.is_year_scoped() || parsed.year == Some(year))
    .map(|parsed| parsed.sequence)
    .max()
    .unwrap_or(0)
}

pub fn current_year() -> i32 {
  Utc::now().year()
}

const MIN_YEAR: i32 = 1000;
const MAX_YEAR: i32 = 9999;

/// Falls back to the current year. Only four-digit years are accepted, since
/// no other year survives a format-then-parse cycle.
fn resolve_year(year: Option<i32>) -> Result<i32, ValueObjectError> {
  let year = year.unwrap_or_else(current_year);
  if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
    return Err(ValueObjectError::InvalidNumberingConfig(format!(
      "Year must be between {} and {}, got {}",
      MIN_YEAR, MAX_YEAR, year
    )));
  }
  Ok(year)
}

pub struct NumberingSequencer {
  counters: Arc<dyn CounterStore>,
  quote_config: NumberingConfig,
  invoice_config: NumberingConfig,
}

impl NumberingSequencer {
  pub fn new(
    counters: Arc<dyn CounterStore>,
    quote_config: NumberingConfig,
    invoice_config: NumberingConfig,
  ) -> Result<Self, ValueObjectError> {
    quote_config.validate()?;
    invoice_config.validate()?;
    Ok(Self {
      counters,
      quote_config,
      invoice_config,
    })
  }

  pub fn config(&self, kind: DocumentKind) -> &NumberingConfig {
    match kind {
      DocumentKind::Quote => &self.quote_config,
      DocumentKind::Invoice => &self.invoice_config,
    }
  }

  /// Allocates the next number, first raising the counter to the highest
  /// sequence found in `existing`.
  pub async fn next<S: AsRef<str> + Sync>(
    &self,
    kind: DocumentKind,
    existing: &[S],
    year: Option<i32>,
  ) -> Result<String, BillingError> {
    let config = self.config(kind);
    let year = resolve_year(year)?;
    let key = CounterKey::new(kind, config, year);
    let floor = highest_sequence(existing, config, year);

    let sequence = self.counters.increment_and_get(key, floor).await?;
    tracing::debug!(counter = %key, floor, sequence, "Allocated document sequence");

    Ok(format_number(config, sequence, year))
  }

  /// The number `next` would return now, without consuming it.
  pub async fn preview_next<S: AsRef<str> + Sync>(
    &self,
    kind: DocumentKind,
    existing: &[S],
    year: Option<i32>,
  ) -> Result<String, BillingError> {
    let config = self.config(kind);
    let year = resolve_year(year)?;
    let key = CounterKey::new(kind, config, year);

    let current = self.counters.current(key).await?;
    let floor = highest_sequence(existing, config, year);
    let sequence = current
      .max(floor)
      .checked_add(1)
      .ok_or_else(|| BillingError::Storage(format!("Counter {} is exhausted", key)))?;

    Ok(format_number(config, sequence, year))
  }

  /// Allocates numbers until one is not in `existing`, adding each rejected
  /// candidate to the exclusion set.
  pub async fn generate_unique(
    &self,
    kind: DocumentKind,
    existing: &[String],
    max_retries: u32,
    year: Option<i32>,
  ) -> Result<String, BillingError> {
    let mut taken: HashSet<String> = existing.iter().cloned().collect();

    for _ in 0..max_retries {
      let candidate = {
        let pool: Vec<&str> = taken.iter().map(String::as_str).collect();
        self.next(kind, &pool, year).await?
      };
      if !taken.contains(&candidate) {
        return Ok(candidate);
      }
      tracing::debug!(number = %candidate, "Generated number already in use, retrying");
      taken.insert(candidate);
    }

    Err(BillingError::SequenceExhausted {
      kind,
      attempts: max_retries,
    })
  }

  pub async fn generate_bulk(
    &self,
    kind: DocumentKind,
    count: usize,
    existing: &[String],
    year: Option<i32>,
  ) -> Result<Vec<String>, BillingError> {
    let mut pool: Vec<String> = existing.to_vec();
    let mut generated = Vec::with_capacity(count);

    for _ in 0..count {
      let number = self.next(kind, &pool, year).await?;
      pool.push(number.clone());
      generated.push(number);
    }

    Ok(generated)
  }

  pub async fn current_counter(&self, kind: DocumentKind, year: Option<i32>) -> Result<u64, BillingError> {
    let year = resolve_year(year)?;
    let key = CounterKey::new(kind, self.config(kind), year);
    self.counters.current(key).await
  }

  pub async fn reset_counter(&self, kind: DocumentKind, year: Option<i32>) -> Result<(), BillingError> {
    let year = resolve_year(year)?;
    let key = CounterKey::new(kind, self.config(kind), year);
    self.counters.reset(key).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::infrastructure::persistence::memory::InMemoryCounterStore;

  fn quote_config() -> NumberingConfig {
    NumberingConfig::for_kind(DocumentKind::Quote)
  }

  fn sequencer() -> NumberingSequencer {
    NumberingSequencer::new(
      Arc::new(InMemoryCounterStore::new()),
      quote_config(),
      NumberingConfig::for_kind(DocumentKind::Invoice),
    )
    .unwrap()
  }

  #[test]
  fn test_format_number() {
    assert_eq!(format_number(&quote_config(), 1, 2024), "Q-2024-0001");
    assert_eq!(
      format_number(&NumberingConfig::for_kind(DocumentKind::Invoice), 7, 2024),
      "INV-2024-0007"
    );

    let no_year = NumberingConfig {
      include_year: false,
      ..quote_config()
    };
    assert_eq!(format_number(&no_year, 42, 2024), "Q-0042");
  }

  #[test]
  fn test_sequence_wider_than_padding() {
    assert_eq!(format_number(&quote_config(), 12345, 2024), "Q-2024-12345");
    assert_eq!(
      parse_existing_number("Q-2024-12345", &quote_config()),
      Some(ParsedNumber {
        year: Some(2024),
        sequence: 12345
      })
    );
  }

  #[test]
  fn test_parse_is_inverse_of_format() {
    let config = quote_config();
    for (sequence, year) in [(1, 2024), (99, 1999), (10_000, 2030)] {
      let formatted = format_number(&config, sequence, year);
      assert_eq!(
        parse_existing_number(&formatted, &config),
        Some(ParsedNumber {
          year: Some(year),
          sequence
        })
      );
    }
  }

  #[test]
  fn test_parse_ignores_malformed_numbers() {
    let config = quote_config();
    assert_eq!(parse_existing_number("INV-2024-0001", &config), None);
    assert_eq!(parse_existing_number("Q-24-0001", &config), None);
    assert_eq!(parse_existing_number("Q-2024-+001", &config), None);
    assert_eq!(parse_existing_number("Q-2024-", &config), None);
    assert_eq!(parse_existing_number("Q-2024-0001-extra", &config), None);
    assert_eq!(parse_existing_number("garbage", &config), None);
  }

  #[test]
  fn test_year_helpers() {
    let config = quote_config();
    let numbers = vec![
      "Q-2023-0009".to_string(),
      "Q-2024-0001".to_string(),
      "bad".to_string(),
      "Q-2024-0002".to_string(),
    ];

    assert!(validate_number_format("Q-2024-0001", &config));
    assert!(!validate_number_format("bad", &config));
    assert_eq!(extract_year("Q-2023-0009", &config), Some(2023));
    assert_eq!(
      filter_numbers_by_year(&numbers, 2024, &config),
      vec!["Q-2024-0001", "Q-2024-0002"]
    );
  }

  #[test]
  fn test_highest_sequence_respects_year_scope() {
    let numbers = ["Q-2023-0040", "Q-2024-0005"];

    assert_eq!(highest_sequence(&numbers, &quote_config(), 2024), 5);

    let global = NumberingConfig {
      reset_yearly: false,
      ..quote_config()
    };
    assert_eq!(highest_sequence(&numbers, &global, 2024), 40);
  }

  #[test]
  fn test_config_validation() {
    assert!(quote_config().validate().is_ok());

    let cases = [
      NumberingConfig {
        prefix: " ".to_string(),
        ..quote_config()
      },
      NumberingConfig {
        separator: String::new(),
        ..quote_config()
      },
      NumberingConfig {
        prefix: "Q-X".to_string(),
        ..quote_config()
      },
      NumberingConfig {
        digit_count: 0,
        ..quote_config()
      },
    ];
    for config in cases {
      assert!(config.validate().is_err(), "{:?} should be rejected", config);
    }
  }

  #[test]
  fn test_counter_key_display() {
    let config = NumberingConfig::for_kind(DocumentKind::Invoice);
    let key = CounterKey::new(DocumentKind::Invoice, &config, 2024);
    assert_eq!(key.to_string(), "invoice_2024");

    let global = NumberingConfig {
      reset_yearly: false,
      ..config
    };
    assert_eq!(
      CounterKey::new(DocumentKind::Quote, &global, 2024).to_string(),
      "quote"
    );
  }

  #[tokio::test]
  async fn test_next_reconciles_with_existing() {
    let sequencer = sequencer();
    let existing = vec!["Q-2024-0005".to_string()];

    let number = sequencer
      .next(DocumentKind::Quote, &existing, Some(2024))
      .await
      .unwrap();
    assert_eq!(number, "Q-2024-0006");
  }

  #[tokio::test]
  async fn test_next_is_strictly_increasing() {
    let sequencer = sequencer();
    let mut issued: Vec<String> = Vec::new();

    for _ in 0..5 {
      let number = sequencer
        .next(DocumentKind::Invoice, &issued, Some(2024))
        .await
        .unwrap();
      issued.push(number);
    }

    assert_eq!(issued.first().unwrap(), "INV-2024-0001");
    assert_eq!(issued.last().unwrap(), "INV-2024-0005");
    let sequences: Vec<u64> = issued
      .iter()
      .map(|n| parse_existing_number(n, sequencer.config(DocumentKind::Invoice)).unwrap().sequence)
      .collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
  }

  #[tokio::test]
  async fn test_counter_survives_empty_existing_list() {
    let sequencer = sequencer();
    let none: Vec<String> = Vec::new();

    sequencer.next(DocumentKind::Quote, &none, Some(2024)).await.unwrap();
    let second = sequencer.next(DocumentKind::Quote, &none, Some(2024)).await.unwrap();

    assert_eq!(second, "Q-2024-0002");
  }

  #[tokio::test]
  async fn test_yearly_counters_are_independent() {
    let sequencer = sequencer();
    let none: Vec<String> = Vec::new();

    sequencer.next(DocumentKind::Quote, &none, Some(2024)).await.unwrap();
    sequencer.next(DocumentKind::Quote, &none, Some(2024)).await.unwrap();
    let next_year = sequencer.next(DocumentKind::Quote, &none, Some(2025)).await.unwrap();

    assert_eq!(next_year, "Q-2025-0001");
  }

  #[tokio::test]
  async fn test_preview_does_not_consume() {
    let sequencer = sequencer();
    let existing = vec!["Q-2024-0009".to_string()];

    let preview = sequencer
      .preview_next(DocumentKind::Quote, &existing, Some(2024))
      .await
      .unwrap();
    let next = sequencer
      .next(DocumentKind::Quote, &existing, Some(2024))
      .await
      .unwrap();

    assert_eq!(preview, "Q-2024-0010");
    assert_eq!(next, preview);
  }

  #[tokio::test]
  async fn test_years_outside_four_digits_rejected() {
    let sequencer = sequencer();
    let none: Vec<String> = Vec::new();

    for year in [999, 10000, -1] {
      let err = sequencer
        .next(DocumentKind::Quote, &none, Some(year))
        .await
        .unwrap_err();
      assert!(matches!(
        err,
        BillingError::InvalidInput(ValueObjectError::InvalidNumberingConfig(_))
      ));
      assert!(
        sequencer
          .preview_next(DocumentKind::Quote, &none, Some(year))
          .await
          .is_err()
      );
    }

    let first = sequencer
      .next(DocumentKind::Quote, &none, Some(1000))
      .await
      .unwrap();
    assert_eq!(first, "Q-1000-0001");
    assert_eq!(
      parse_existing_number(&first, &quote_config()).and_then(|parsed| parsed.year),
      Some(1000)
    );
  }

  #[tokio::test]
  async fn test_generate_unique_and_exhaustion() {
    let sequencer = sequencer();
    let existing = vec!["Q-2024-0001".to_string(), "Q-2024-0002".to_string()];

    let number = sequencer
      .generate_unique(DocumentKind::Quote, &existing, 3, Some(2024))
      .await
      .unwrap();
    assert_eq!(number, "Q-2024-0003");

    let err = sequencer
      .generate_unique(DocumentKind::Quote, &existing, 0, Some(2024))
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      BillingError::SequenceExhausted {
        kind: DocumentKind::Quote,
        attempts: 0
      }
    ));
  }

  #[tokio::test]
  async fn test_generate_bulk() {
    let sequencer = sequencer();
    let existing = vec!["INV-2024-0010".to_string()];

    let numbers = sequencer
      .generate_bulk(DocumentKind::Invoice, 3, &existing, Some(2024))
      .await
      .unwrap();

    assert_eq!(
      numbers,
      vec!["INV-2024-0011", "INV-2024-0012", "INV-2024-0013"]
    );
  }

  #[tokio::test]
  async fn test_current_and_reset_counter() {
    let sequencer = sequencer();
    let none: Vec<String> = Vec::new();

    assert_eq!(sequencer.current_counter(DocumentKind::Quote, Some(2024)).await.unwrap(), 0);
    sequencer.next(DocumentKind::Quote, &none, Some(2024)).await.unwrap();
    assert_eq!(sequencer.current_counter(DocumentKind::Quote, Some(2024)).await.unwrap(), 1);

    sequencer.reset_counter(DocumentKind::Quote, Some(2024)).await.unwrap();
    assert_eq!(sequencer.current_counter(DocumentKind::Quote, Some(2024)).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_concurrent_allocation_never_duplicates() {
    let sequencer = Arc::new(sequencer());
    let mut handles = Vec::new();

    for _ in 0..32 {
      let sequencer = Arc::clone(&sequencer);
      handles.push(tokio::spawn(async move {
        let none: Vec<String> = Vec::new();
        sequencer.next(DocumentKind::Invoice, &none, Some(2024)).await
      }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
      numbers.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(numbers.len(), 32);
  }
}
