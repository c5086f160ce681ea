use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entities::{Invoice, Quote};
use super::value_objects::{InvoiceStatus, QuoteStatus, ValueObjectError};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuoteFilters {
  /// Empty means any status.
  pub statuses: Vec<QuoteStatus>,
  pub customer_name: Option<String>,
  pub created_from: Option<DateTime<Utc>>,
  pub created_to: Option<DateTime<Utc>>,
  pub min_amount: Option<Decimal>,
  pub max_amount: Option<Decimal>,
}

impl QuoteFilters {
  pub fn matches(&self, quote: &Quote) -> bool {
    (self.statuses.is_empty() || self.statuses.contains(&quote.status))
      && name_matches(self.customer_name.as_deref(), &quote.customer.name)
      && in_range(quote.created_at, self.created_from, self.created_to)
      && in_range(quote.totals.grand_total, self.min_amount, self.max_amount)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InvoiceFilters {
  pub statuses: Vec<InvoiceStatus>,
  pub customer_name: Option<String>,
  pub created_from: Option<DateTime<Utc>>,
  pub created_to: Option<DateTime<Utc>>,
  pub min_amount: Option<Decimal>,
  pub max_amount: Option<Decimal>,
  /// `Some(true)` keeps only invoices past their due date, `Some(false)` only
  /// those that are not.
  pub overdue: Option<bool>,
}

impl InvoiceFilters {
  pub fn matches(&self, invoice: &Invoice, now: DateTime<Utc>) -> bool {
    (self.statuses.is_empty() || self.statuses.contains(&invoice.status))
      && name_matches(self.customer_name.as_deref(), &invoice.customer.name)
      && in_range(invoice.created_at, self.created_from, self.created_to)
      && in_range(invoice.totals.grand_total, self.min_amount, self.max_amount)
      && self
        .overdue
        .is_none_or(|overdue| invoice.is_overdue(now) == overdue)
  }
}

fn name_matches(needle: Option<&str>, name: &str) -> bool {
  match needle.map(str::trim).filter(|n| !n.is_empty()) {
    Some(needle) => name.to_lowercase().contains(&needle.to_lowercase()),
    None => true,
  }
}

fn in_range<T: PartialOrd>(value: T, from: Option<T>, to: Option<T>) -> bool {
  from.is_none_or(|from| value >= from) && to.is_none_or(|to| value <= to)
}

/// Requested page; `None` fields fall back to the first page and the
/// configured page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PageRequest {
  pub page: Option<u32>,
  pub page_size: Option<u32>,
}

impl PageRequest {
  pub fn new(page: u32, page_size: u32) -> Self {
    Self {
      page: Some(page),
      page_size: Some(page_size),
    }
  }

  /// Returns `(page, page_size)`, both 1 or more.
  pub fn resolve(&self, default_page_size: u32) -> Result<(u32, u32), ValueObjectError> {
    let page = self.page.unwrap_or(1);
    let page_size = self.page_size.unwrap_or(default_page_size);

    if page == 0 {
      return Err(ValueObjectError::InvalidPagination(
        "Page numbers start at 1".to_string(),
      ));
    }
    if page_size == 0 {
      return Err(ValueObjectError::InvalidPagination(
        "Page size must be greater than 0".to_string(),
      ));
    }
    Ok((page, page_size))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginatedResponse<T> {
  pub data: Vec<T>,
  pub total: u64,
  pub page: u32,
  pub page_size: u32,
  pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
  pub fn new(data: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
    let total_pages = total.div_ceil(u64::from(page_size.max(1)));
    Self {
      data,
      total,
      page,
      page_size,
      total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
    }
  }

  /// Zero-based row offset of `page`.
  pub fn offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
  }

  /// Slices an already filtered and ordered result set.
  pub fn from_all(all: Vec<T>, page: u32, page_size: u32) -> Self {
    let total = all.len() as u64;
    let offset = usize::try_from(Self::offset(page, page_size)).unwrap_or(usize::MAX);
    let data = all
      .into_iter()
      .skip(offset)
      .take(page_size as usize)
      .collect();
    Self::new(data, total, page, page_size)
  }
}
