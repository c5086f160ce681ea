use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use super::payment_repository::{insert_payment, load_payments};
use super::rows::{
  ItemTable, contains_pattern, customer_from_columns, delete_items, insert_items, load_items,
  map_number_conflict, totals_from_columns,
};
use crate::domain::billing::{
  BillingError, Currency, Invoice, InvoiceFilters, InvoiceStatus, LineItem, PaginatedResponse,
  Payment,
  ports::{InvoiceRepository, SettleFn},
};

const NUMBER_CONSTRAINT: &str = "invoices_number_unique";

macro_rules! select_invoices {
  ($($rest:tt)*) => {
    concat!(
      r#"
            SELECT id, number, status, customer_name, customer_email, customer_phone,
                   customer_address, customer_gst_number, subtotal, discount_total, tax_total,
                   shipping_amount, adjustment_amount, grand_total, currency, balance_due,
                   due_date, notes, terms, source_quote_id, created_by, created_at, updated_at
            FROM invoices
            "#,
      $($rest)*
    )
  };
}

macro_rules! invoice_filters {
  () => {
    r#"
            WHERE (cardinality($1::text[]) = 0 OR status = ANY($1))
              AND ($2::text IS NULL OR customer_name ILIKE $2 ESCAPE '\')
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
              AND ($5::numeric IS NULL OR grand_total >= $5)
              AND ($6::numeric IS NULL OR grand_total <= $6)
              AND ($7::boolean IS NULL OR (due_date < $8) = $7)
            "#
  };
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
  id: Uuid,
  number: String,
  status: String,
  customer_name: String,
  customer_email: Option<String>,
  customer_phone: Option<String>,
  customer_address: Option<String>,
  customer_gst_number: Option<String>,
  subtotal: Decimal,
  discount_total: Decimal,
  tax_total: Decimal,
  shipping_amount: Option<Decimal>,
  adjustment_amount: Option<Decimal>,
  grand_total: Decimal,
  currency: String,
  balance_due: Decimal,
  due_date: DateTime<Utc>,
  notes: Option<String>,
  terms: Option<String>,
  source_quote_id: Option<Uuid>,
  created_by: Uuid,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl InvoiceRow {
  fn into_invoice(
    self,
    items: Vec<LineItem>,
    payments: Vec<Payment>,
  ) -> Result<Invoice, BillingError> {
    Ok(Invoice {
      id: self.id,
      number: self.number,
      status: InvoiceStatus::from_str(&self.status)?,
      customer: customer_from_columns(
        self.customer_name,
        self.customer_email,
        self.customer_phone,
        self.customer_address,
        self.customer_gst_number,
      ),
      items,
      totals: totals_from_columns(
        self.subtotal,
        self.discount_total,
        self.tax_total,
        self.shipping_amount,
        self.adjustment_amount,
        self.grand_total,
      ),
      currency: Currency::from_str(&self.currency)?,
      balance_due: self.balance_due,
      due_date: self.due_date,
      notes: self.notes,
      terms: self.terms,
      source_quote_id: self.source_quote_id,
      payments,
      created_by: self.created_by,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

/// Loads items and payments for the given rows on one connection.
async fn hydrate(conn: &mut PgConnection, rows: Vec<InvoiceRow>) -> Result<Vec<Invoice>, BillingError> {
  if rows.is_empty() {
    return Ok(Vec::new());
  }

  let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
  let mut items = load_items(&mut *conn, ItemTable::Invoice, &ids).await?;
  let mut payments = load_payments(&mut *conn, &ids).await?;

  rows
    .into_iter()
    .map(|row| {
      let row_items = items.remove(&row.id).unwrap_or_default();
      let row_payments = payments.remove(&row.id).unwrap_or_default();
      row.into_invoice(row_items, row_payments)
    })
    .collect()
}

/// Locks the invoice row until the surrounding transaction ends.
async fn lock_invoice(conn: &mut PgConnection, id: Uuid) -> Result<Invoice, BillingError> {
  let row = sqlx::query_as::<_, InvoiceRow>(select_invoices!("WHERE id = $1 FOR UPDATE"))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(BillingError::InvoiceNotFound(id))?;

  hydrate(conn, vec![row])
    .await?
    .pop()
    .ok_or(BillingError::InvoiceNotFound(id))
}

pub struct PostgresInvoiceRepository {
  pool: PgPool,
}

impl PostgresInvoiceRepository {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
  async fn create(&self, mut invoice: Invoice) -> Result<Invoice, BillingError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
            INSERT INTO invoices (
                id, number, status, customer_name, customer_email, customer_phone,
                customer_address, customer_gst_number, subtotal, discount_total, tax_total,
                shipping_amount, adjustment_amount, grand_total, currency, balance_due,
                due_date, notes, terms, source_quote_id, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            "#,
    )
    .bind(invoice.id)
    .bind(&invoice.number)
    .bind(invoice.status.as_str())
    .bind(&invoice.customer.name)
    .bind(&invoice.customer.email)
    .bind(&invoice.customer.phone)
    .bind(&invoice.customer.address)
    .bind(&invoice.customer.gst_number)
    .bind(invoice.totals.subtotal)
    .bind(invoice.totals.discount_total)
    .bind(invoice.totals.tax_total)
    .bind(invoice.totals.shipping_amount)
    .bind(invoice.totals.adjustment_amount)
    .bind(invoice.totals.grand_total)
    .bind(invoice.currency.as_str())
    .bind(invoice.balance_due)
    .bind(invoice.due_date)
    .bind(&invoice.notes)
    .bind(&invoice.terms)
    .bind(invoice.source_quote_id)
    .bind(invoice.created_by)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| map_number_conflict(e, NUMBER_CONSTRAINT, &invoice.number))?;

    insert_items(&mut tx, ItemTable::Invoice, invoice.id, &invoice.items).await?;
    tx.commit().await?;

    // Payments are only ever recorded through record_payment
    invoice.payments.clear();
    tracing::info!("Created invoice {} ({})", invoice.number, invoice.id);
    Ok(invoice)
  }

  async fn update(
    &self,
    mut invoice: Invoice,
    status_change: Option<InvoiceStatus>,
    settle: SettleFn,
  ) -> Result<Invoice, BillingError> {
    let mut tx = self.pool.begin().await?;

    let stored = lock_invoice(&mut tx, invoice.id).await?;
    invoice.status = stored.status;
    let settlement = settle(&invoice, &stored.payments)?.with_requested_status(status_change)?;
    invoice.balance_due = settlement.balance_due;
    invoice.status = settlement.status;

    sqlx::query(
      r#"
            UPDATE invoices
            SET status = $2, customer_name = $3, customer_email = $4, customer_phone = $5,
                customer_address = $6, customer_gst_number = $7, subtotal = $8,
                discount_total = $9, tax_total = $10, shipping_amount = $11,
                adjustment_amount = $12, grand_total = $13, currency = $14, balance_due = $15,
                due_date = $16, notes = $17, terms = $18, updated_at = $19
            WHERE id = $1
            "#,
    )
    .bind(invoice.id)
    .bind(invoice.status.as_str())
    .bind(&invoice.customer.name)
    .bind(&invoice.customer.email)
    .bind(&invoice.customer.phone)
    .bind(&invoice.customer.address)
    .bind(&invoice.customer.gst_number)
    .bind(invoice.totals.subtotal)
    .bind(invoice.totals.discount_total)
    .bind(invoice.totals.tax_total)
    .bind(invoice.totals.shipping_amount)
    .bind(invoice.totals.adjustment_amount)
    .bind(invoice.totals.grand_total)
    .bind(invoice.currency.as_str())
    .bind(invoice.balance_due)
    .bind(invoice.due_date)
    .bind(&invoice.notes)
    .bind(&invoice.terms)
    .bind(invoice.updated_at)
    .execute(&mut *tx)
    .await?;

    delete_items(&mut tx, ItemTable::Invoice, invoice.id).await?;
    insert_items(&mut tx, ItemTable::Invoice, invoice.id, &invoice.items).await?;
    tx.commit().await?;

    invoice.payments = stored.payments;
    tracing::debug!(
      "Updated invoice {} (status {}, balance {})",
      invoice.id,
      invoice.status,
      invoice.balance_due
    );
    Ok(invoice)
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<Invoice>, BillingError> {
    let mut conn = self.pool.acquire().await?;
    let row = sqlx::query_as::<_, InvoiceRow>(select_invoices!("WHERE id = $1"))
      .bind(id)
      .fetch_optional(&mut *conn)
      .await?;

    match row {
      Some(row) => Ok(hydrate(&mut conn, vec![row]).await?.pop()),
      None => Ok(None),
    }
  }

  async fn list(
    &self,
    filters: &InvoiceFilters,
    page: u32,
    page_size: u32,
    now: DateTime<Utc>,
  ) -> Result<PaginatedResponse<Invoice>, BillingError> {
    let statuses: Vec<String> = filters
      .statuses
      .iter()
      .map(|s| s.as_str().to_string())
      .collect();
    let name_pattern = contains_pattern(filters.customer_name.as_deref());
    let mut conn = self.pool.acquire().await?;

    let total = sqlx::query_scalar::<_, i64>(concat!(
      "SELECT COUNT(*) FROM invoices ",
      invoice_filters!()
    ))
    .bind(&statuses)
    .bind(&name_pattern)
    .bind(filters.created_from)
    .bind(filters.created_to)
    .bind(filters.min_amount)
    .bind(filters.max_amount)
    .bind(filters.overdue)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let offset = PaginatedResponse::<Invoice>::offset(page, page_size);
    let rows = sqlx::query_as::<_, InvoiceRow>(select_invoices!(concat!(
      invoice_filters!(),
      "ORDER BY created_at DESC, number DESC LIMIT $9 OFFSET $10"
    )))
    .bind(&statuses)
    .bind(&name_pattern)
    .bind(filters.created_from)
    .bind(filters.created_to)
    .bind(filters.min_amount)
    .bind(filters.max_amount)
    .bind(filters.overdue)
    .bind(now)
    .bind(i64::from(page_size))
    .bind(i64::try_from(offset).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await?;

    let invoices = hydrate(&mut conn, rows).await?;
    Ok(PaginatedResponse::new(
      invoices,
      u64::try_from(total).unwrap_or(0),
      page,
      page_size,
    ))
  }

  async fn record_payment(
    &self,
    payment: Payment,
    settle: SettleFn,
  ) -> Result<(Payment, Invoice), BillingError> {
    let mut tx = self.pool.begin().await?;

    let mut invoice = lock_invoice(&mut tx, payment.invoice_id).await?;
    let mut payments = std::mem::take(&mut invoice.payments);
    payments.push(payment.clone());
    let settlement = settle(&invoice, &payments)?;

    insert_payment(&mut tx, &payment).await?;

    let updated_at = Utc::now();
    sqlx::query(
      r#"
            UPDATE invoices
            SET balance_due = $2, status = $3, updated_at = $4
            WHERE id = $1
            "#,
    )
    .bind(invoice.id)
    .bind(settlement.balance_due)
    .bind(settlement.status.as_str())
    .bind(updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    payments.sort_by(|a, b| {
      (b.received_at, b.created_at).cmp(&(a.received_at, a.created_at))
    });
    invoice.balance_due = settlement.balance_due;
    invoice.status = settlement.status;
    invoice.updated_at = updated_at;
    invoice.payments = payments;

    tracing::info!(
      "Recorded payment {} of {} on invoice {}",
      payment.id,
      payment.amount,
      invoice.number
    );
    Ok((payment, invoice))
  }

  async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM payments WHERE invoice_id = $1")
      .bind(id)
      .execute(&mut *tx)
      .await?;
    delete_items(&mut tx, ItemTable::Invoice, id).await?;
    let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
      .bind(id)
      .execute(&mut *tx)
      .await?;

    if result.rows_affected() == 0 {
      return Err(BillingError::InvoiceNotFound(id));
    }

    tx.commit().await?;
    tracing::info!("Deleted invoice {}", id);
    Ok(())
  }

  async fn all_numbers(&self) -> Result<Vec<String>, BillingError> {
    let numbers = sqlx::query_scalar::<_, String>("SELECT number FROM invoices")
      .fetch_all(&self.pool)
      .await?;
    Ok(numbers)
  }
}
