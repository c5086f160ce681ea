use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entities::{Invoice, Payment};
use super::errors::BillingError;
use super::money::round;
use super::value_objects::InvoiceStatus;

const DUE_SOON_DAYS: i64 = 7;
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Outstanding amount, never negative.
pub fn balance_due(grand_total: Decimal, payments_total: Decimal) -> Decimal {
  round(grand_total - payments_total).max(round(Decimal::ZERO))
}

/// Result of re-deriving an invoice's balance from its full payment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
  pub balance_due: Decimal,
  pub status: InvoiceStatus,
  pub overpayment: Decimal,
}

impl Settlement {
  /// Applies a status asked for by an edit on top of the settled one. `Paid`
  /// is only accepted once nothing is owed.
  pub fn with_requested_status(
    mut self,
    requested: Option<InvoiceStatus>,
  ) -> Result<Self, BillingError> {
    let Some(requested) = requested.filter(|status| *status != self.status) else {
      return Ok(self);
    };

    let unpaid = requested == InvoiceStatus::Paid && self.balance_due > Decimal::ZERO;
    if unpaid || !self.status.can_transition_to(requested) {
      return Err(BillingError::transition(self.status, requested));
    }

    self.status = requested;
    Ok(self)
  }
}

/// Computes the settlement of `invoice` against `payments` (the complete list,
/// including any payment being recorded). The status flips to `Paid` only when
/// the balance reaches exactly zero; otherwise it is left as is.
pub fn settle_payments(invoice: &Invoice, payments: &[Payment]) -> Result<Settlement, BillingError> {
  if !invoice.status.accepts_payments() {
    return Err(BillingError::transition(invoice.status, "payment"));
  }

  let mut settlement = rebalance(invoice, payments)?;
  if settlement.balance_due.is_zero() {
    settlement.status = InvoiceStatus::Paid;
  }
  Ok(settlement)
}

/// Re-derives the balance after the totals changed, keeping the status.
pub fn rebalance(invoice: &Invoice, payments: &[Payment]) -> Result<Settlement, BillingError> {
  let paid = round(payments.iter().map(|p| p.amount).sum());
  let grand_total = invoice.totals.grand_total;

  Ok(Settlement {
    balance_due: balance_due(grand_total, paid),
    status: invoice.status,
    overpayment: round(paid - grand_total).max(Decimal::ZERO),
  })
}

pub fn is_overdue(due_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
  due_date < now
}

/// Whole days from `now` until `due_date`, rounded up. Negative once the
/// due date has passed.
pub fn days_difference(due_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
  let millis = (due_date - now).num_milliseconds();
  let days = millis / MILLIS_PER_DAY;
  if millis > 0 && millis % MILLIS_PER_DAY != 0 {
    days + 1
  } else {
    days
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DueState {
  Overdue,
  DueSoon,
  DueLater,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDateStatus {
  pub status: DueState,
  pub message: String,
  /// Always a magnitude, whichever side of the due date `now` is on.
  pub days: i64,
}

pub fn due_date_status(due_date: DateTime<Utc>, now: DateTime<Utc>) -> DueDateStatus {
  let days = days_difference(due_date, now);

  if days < 0 {
    let overdue = days.abs();
    return DueDateStatus {
      status: DueState::Overdue,
      message: format!("Overdue by {} {}", overdue, plural_days(overdue)),
      days: overdue,
    };
  }

  if days <= DUE_SOON_DAYS {
    let message = if days == 0 {
      "Due today".to_string()
    } else {
      format!("Due in {} {}", days, plural_days(days))
    };
    return DueDateStatus {
      status: DueState::DueSoon,
      message,
      days,
    };
  }

  DueDateStatus {
    status: DueState::DueLater,
    message: format!("Due in {} days", days),
    days,
  }
}

fn plural_days(days: i64) -> &'static str {
  if days == 1 { "day" } else { "days" }
}
