use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

use super::rows::{
  ItemTable, contains_pattern, customer_from_columns, delete_items, insert_items, load_items,
  map_number_conflict, totals_from_columns,
};
use crate::domain::billing::{
  BillingError, Currency, LineItem, PaginatedResponse, Quote, QuoteFilters, QuoteStatus,
  ports::QuoteRepository,
};

const NUMBER_CONSTRAINT: &str = "quotes_number_unique";

macro_rules! select_quotes {
  ($($rest:tt)*) => {
    concat!(
      r#"
            SELECT id, number, status, customer_name, customer_email, customer_phone,
                   customer_address, customer_gst_number, subtotal, discount_total, tax_total,
                   shipping_amount, adjustment_amount, grand_total, currency, notes, terms,
                   valid_until, converted_to_invoice_id, created_by, created_at, updated_at
            FROM quotes
            "#,
      $($rest)*
    )
  };
}

macro_rules! quote_filters {
  () => {
    r#"
            WHERE (cardinality($1::text[]) = 0 OR status = ANY($1))
              AND ($2::text IS NULL OR customer_name ILIKE $2 ESCAPE '\')
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
              AND ($5::numeric IS NULL OR grand_total >= $5)
              AND ($6::numeric IS NULL OR grand_total <= $6)
            "#
  };
}

#[derive(Debug, FromRow)]
struct QuoteRow {
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
  notes: Option<String>,
  terms: Option<String>,
  valid_until: Option<DateTime<Utc>>,
  converted_to_invoice_id: Option<Uuid>,
  created_by: Uuid,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl QuoteRow {
  fn into_quote(self, items: Vec<LineItem>) -> Result<Quote, BillingError> {
    Ok(Quote {
      id: self.id,
      number: self.number,
      status: QuoteStatus::from_str(&self.status)?,
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
      notes: self.notes,
      terms: self.terms,
      valid_until: self.valid_until,
      converted_to_invoice_id: self.converted_to_invoice_id,
      created_by: self.created_by,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

pub struct PostgresQuoteRepository {
  pool: PgPool,
}

impl PostgresQuoteRepository {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  async fn hydrate(&self, rows: Vec<QuoteRow>) -> Result<Vec<Quote>, BillingError> {
    if rows.is_empty() {
      return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let mut conn = self.pool.acquire().await?;
    let mut items = load_items(&mut conn, ItemTable::Quote, &ids).await?;

    rows
      .into_iter()
      .map(|row| {
        let row_items = items.remove(&row.id).unwrap_or_default();
        row.into_quote(row_items)
      })
      .collect()
  }
}

#[async_trait]
impl QuoteRepository for PostgresQuoteRepository {
  async fn create(&self, quote: Quote) -> Result<Quote, BillingError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query(
      r#"
            INSERT INTO quotes (
                id, number, status, customer_name, customer_email, customer_phone,
                customer_address, customer_gst_number, subtotal, discount_total, tax_total,
                shipping_amount, adjustment_amount, grand_total, currency, notes, terms,
                valid_until, converted_to_invoice_id, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            "#,
    )
    .bind(quote.id)
    .bind(&quote.number)
    .bind(quote.status.as_str())
    .bind(&quote.customer.name)
    .bind(&quote.customer.email)
    .bind(&quote.customer.phone)
    .bind(&quote.customer.address)
    .bind(&quote.customer.gst_number)
    .bind(quote.totals.subtotal)
    .bind(quote.totals.discount_total)
    .bind(quote.totals.tax_total)
    .bind(quote.totals.shipping_amount)
    .bind(quote.totals.adjustment_amount)
    .bind(quote.totals.grand_total)
    .bind(quote.currency.as_str())
    .bind(&quote.notes)
    .bind(&quote.terms)
    .bind(quote.valid_until)
    .bind(quote.converted_to_invoice_id)
    .bind(quote.created_by)
    .bind(quote.created_at)
    .bind(quote.updated_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| map_number_conflict(e, NUMBER_CONSTRAINT, &quote.number))?;

    insert_items(&mut tx, ItemTable::Quote, quote.id, &quote.items).await?;
    tx.commit().await?;

    tracing::info!("Created quote {} ({})", quote.number, quote.id);
    Ok(quote)
  }

  async fn update(
    &self,
    mut quote: Quote,
    status_change: Option<QuoteStatus>,
  ) -> Result<Quote, BillingError> {
    let mut tx = self.pool.begin().await?;

    let (stored_status, converted_to_invoice_id) = sqlx::query_as::<_, (String, Option<Uuid>)>(
      "SELECT status, converted_to_invoice_id FROM quotes WHERE id = $1 FOR UPDATE",
    )
    .bind(quote.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BillingError::QuoteNotFound(quote.id))?;

    quote.status = QuoteStatus::from_str(&stored_status)?;
    quote.converted_to_invoice_id = converted_to_invoice_id;
    if let Some(status) = status_change {
      quote.apply_requested_status(status, quote.updated_at)?;
    }

    sqlx::query(
      r#"
            UPDATE quotes
            SET status = $2, customer_name = $3, customer_email = $4, customer_phone = $5,
                customer_address = $6, customer_gst_number = $7, subtotal = $8,
                discount_total = $9, tax_total = $10, shipping_amount = $11,
                adjustment_amount = $12, grand_total = $13, currency = $14, notes = $15,
                terms = $16, valid_until = $17, updated_at = $18
            WHERE id = $1
            "#,
    )
    .bind(quote.id)
    .bind(quote.status.as_str())
    .bind(&quote.customer.name)
    .bind(&quote.customer.email)
    .bind(&quote.customer.phone)
    .bind(&quote.customer.address)
    .bind(&quote.customer.gst_number)
    .bind(quote.totals.subtotal)
    .bind(quote.totals.discount_total)
    .bind(quote.totals.tax_total)
    .bind(quote.totals.shipping_amount)
    .bind(quote.totals.adjustment_amount)
    .bind(quote.totals.grand_total)
    .bind(quote.currency.as_str())
    .bind(&quote.notes)
    .bind(&quote.terms)
    .bind(quote.valid_until)
    .bind(quote.updated_at)
    .execute(&mut *tx)
    .await?;

    delete_items(&mut tx, ItemTable::Quote, quote.id).await?;
    insert_items(&mut tx, ItemTable::Quote, quote.id, &quote.items).await?;
    tx.commit().await?;

    tracing::debug!("Updated quote {}", quote.id);
    Ok(quote)
  }

  async fn find_by_id(&self, id: Uuid) -> Result<Option<Quote>, BillingError> {
    let row = sqlx::query_as::<_, QuoteRow>(select_quotes!("WHERE id = $1"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?;

    match row {
      Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
      None => Ok(None),
    }
  }

  async fn list(
    &self,
    filters: &QuoteFilters,
    page: u32,
    page_size: u32,
  ) -> Result<PaginatedResponse<Quote>, BillingError> {
    let statuses: Vec<String> = filters
      .statuses
      .iter()
      .map(|s| s.as_str().to_string())
      .collect();
    let name_pattern = contains_pattern(filters.customer_name.as_deref());

    let total = sqlx::query_scalar::<_, i64>(concat!(
      "SELECT COUNT(*) FROM quotes ",
      quote_filters!()
    ))
    .bind(&statuses)
    .bind(&name_pattern)
    .bind(filters.created_from)
    .bind(filters.created_to)
    .bind(filters.min_amount)
    .bind(filters.max_amount)
    .fetch_one(&self.pool)
    .await?;

    let offset = PaginatedResponse::<Quote>::offset(page, page_size);
    let rows = sqlx::query_as::<_, QuoteRow>(select_quotes!(concat!(
      quote_filters!(),
      "ORDER BY created_at DESC, number DESC LIMIT $7 OFFSET $8"
    )))
    .bind(&statuses)
    .bind(&name_pattern)
    .bind(filters.created_from)
    .bind(filters.created_to)
    .bind(filters.min_amount)
    .bind(filters.max_amount)
    .bind(i64::from(page_size))
    .bind(i64::try_from(offset).unwrap_or(i64::MAX))
    .fetch_all(&self.pool)
    .await?;

    let quotes = self.hydrate(rows).await?;
    Ok(PaginatedResponse::new(
      quotes,
      u64::try_from(total).unwrap_or(0),
      page,
      page_size,
    ))
  }

  async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Quote>, BillingError> {
    let rows = sqlx::query_as::<_, QuoteRow>(select_quotes!(
      r#"
            WHERE status IN ('draft', 'sent')
              AND converted_to_invoice_id IS NULL
              AND valid_until IS NOT NULL
              AND valid_until < $1
            "#
    ))
    .bind(now)
    .fetch_all(&self.pool)
    .await?;

    self.hydrate(rows).await
  }

  async fn mark_converted(
    &self,
    quote_id: Uuid,
    invoice_id: Uuid,
    status: QuoteStatus,
    updated_at: DateTime<Utc>,
  ) -> Result<bool, BillingError> {
    let result = sqlx::query(
      r#"
            UPDATE quotes
            SET converted_to_invoice_id = $2, status = $3, updated_at = $4
            WHERE id = $1 AND converted_to_invoice_id IS NULL
            "#,
    )
    .bind(quote_id)
    .bind(invoice_id)
    .bind(status.as_str())
    .bind(updated_at)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 1 {
      return Ok(true);
    }

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM quotes WHERE id = $1)")
      .bind(quote_id)
      .fetch_one(&self.pool)
      .await?;

    if exists {
      tracing::warn!("Quote {} was already converted", quote_id);
      Ok(false)
    } else {
      Err(BillingError::QuoteNotFound(quote_id))
    }
  }

  async fn mark_expired(&self, quote_id: Uuid, now: DateTime<Utc>) -> Result<bool, BillingError> {
    let result = sqlx::query(
      r#"
            UPDATE quotes
            SET status = 'expired', updated_at = $2
            WHERE id = $1
              AND status IN ('draft', 'sent')
              AND converted_to_invoice_id IS NULL
              AND valid_until IS NOT NULL
              AND valid_until < $2
            "#,
    )
    .bind(quote_id)
    .bind(now)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
    let mut tx = self.pool.begin().await?;

    delete_items(&mut tx, ItemTable::Quote, id).await?;
    let result = sqlx::query("DELETE FROM quotes WHERE id = $1")
      .bind(id)
      .execute(&mut *tx)
      .await?;

    if result.rows_affected() == 0 {
      return Err(BillingError::QuoteNotFound(id));
    }

    tx.commit().await?;
    tracing::info!("Deleted quote {}", id);
    Ok(())
  }

  async fn all_numbers(&self) -> Result<Vec<String>, BillingError> {
    let numbers = sqlx::query_scalar::<_, String>("SELECT number FROM quotes")
      .fetch_all(&self.pool)
      .await?;
    Ok(numbers)
  }
}
