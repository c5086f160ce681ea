use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::billing::{BillingError, Payment, PaymentMethod, ports::PaymentRepository};

#[derive(Debug, FromRow)]
struct PaymentRow {
  id: Uuid,
  invoice_id: Uuid,
  amount: Decimal,
  method: String,
  reference: Option<String>,
  notes: Option<String>,
  received_at: DateTime<Utc>,
  created_by: Uuid,
  created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
  type Error = BillingError;

  fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
    Ok(Payment {
      id: row.id,
      invoice_id: row.invoice_id,
      amount: row.amount,
      method: PaymentMethod::from_str(&row.method)?,
      reference: row.reference,
      notes: row.notes,
      received_at: row.received_at,
      created_by: row.created_by,
      created_at: row.created_at,
    })
  }
}

/// Payments of every invoice in `invoice_ids`, newest `received_at` first.
pub(super) async fn load_payments(
  conn: &mut PgConnection,
  invoice_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Payment>>, BillingError> {
  let rows = sqlx::query_as::<_, PaymentRow>(
    r#"
            SELECT id, invoice_id, amount, method, reference, notes, received_at,
                   created_by, created_at
            FROM payments
            WHERE invoice_id = ANY($1)
            ORDER BY received_at DESC, created_at DESC
            "#,
  )
  .bind(invoice_ids)
  .fetch_all(&mut *conn)
  .await?;

  let mut grouped: HashMap<Uuid, Vec<Payment>> = HashMap::new();
  for row in rows {
    let invoice_id = row.invoice_id;
    grouped.entry(invoice_id).or_default().push(row.try_into()?);
  }
  Ok(grouped)
}

pub(super) async fn insert_payment(
  conn: &mut PgConnection,
  payment: &Payment,
) -> Result<(), BillingError> {
  sqlx::query(
    r#"
            INSERT INTO payments (
                id, invoice_id, amount, method, reference, notes, received_at,
                created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
  )
  .bind(payment.id)
  .bind(payment.invoice_id)
  .bind(payment.amount)
  .bind(payment.method.as_str())
  .bind(&payment.reference)
  .bind(&payment.notes)
  .bind(payment.received_at)
  .bind(payment.created_by)
  .bind(payment.created_at)
  .execute(&mut *conn)
  .await?;
  Ok(())
}

pub struct PostgresPaymentRepository {
  pool: PgPool,
}

impl PostgresPaymentRepository {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
  async fn find_by_invoice_id(&self, invoice_id: Uuid) -> Result<Vec<Payment>, BillingError> {
    let mut conn = self.pool.acquire().await?;
    let mut grouped = load_payments(&mut conn, &[invoice_id]).await?;
    Ok(grouped.remove(&invoice_id).unwrap_or_default())
  }
}
