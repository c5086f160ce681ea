use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::billing::{
  BillingError, BillingTotals, CustomerInfo, LineItem, LineItemDescription, Percentage, Quantity,
  UnitPrice,
};

/// Line item tables share a layout and differ only in the parent column.
#[derive(Debug, Clone, Copy)]
pub(super) enum ItemTable {
  Quote,
  Invoice,
}

impl ItemTable {
  fn insert_sql(&self) -> &'static str {
    match self {
      ItemTable::Quote => {
        r#"
            INSERT INTO quote_items (
                id, quote_id, line_order, description, quantity, unit_price, discount,
                tax_rate, subtotal, discount_amount, tax_amount, total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
      }
      ItemTable::Invoice => {
        r#"
            INSERT INTO invoice_items (
                id, invoice_id, line_order, description, quantity, unit_price, discount,
                tax_rate, subtotal, discount_amount, tax_amount, total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
      }
    }
  }

  fn select_sql(&self) -> &'static str {
    match self {
      ItemTable::Quote => {
        r#"
            SELECT id, quote_id AS parent_id, description, quantity, unit_price, discount, tax_rate
            FROM quote_items
            WHERE quote_id = ANY($1)
            ORDER BY line_order
            "#
      }
      ItemTable::Invoice => {
        r#"
            SELECT id, invoice_id AS parent_id, description, quantity, unit_price, discount, tax_rate
            FROM invoice_items
            WHERE invoice_id = ANY($1)
            ORDER BY line_order
            "#
      }
    }
  }

  fn delete_sql(&self) -> &'static str {
    match self {
      ItemTable::Quote => "DELETE FROM quote_items WHERE quote_id = $1",
      ItemTable::Invoice => "DELETE FROM invoice_items WHERE invoice_id = $1",
    }
  }
}

#[derive(Debug, FromRow)]
struct LineItemRow {
  id: Uuid,
  parent_id: Uuid,
  description: String,
  quantity: Decimal,
  unit_price: Decimal,
  discount: Decimal,
  tax_rate: Decimal,
}

impl TryFrom<LineItemRow> for LineItem {
  type Error = BillingError;

  // Derived amounts are recomputed from the stored inputs
  fn try_from(row: LineItemRow) -> Result<Self, Self::Error> {
    Ok(LineItem::with_id(
      row.id,
      LineItemDescription::new(row.description)?,
      Quantity::new(row.quantity)?,
      UnitPrice::new(row.unit_price)?,
      Percentage::new(row.discount)?,
      Percentage::new(row.tax_rate)?,
    ))
  }
}

pub(super) async fn insert_items(
  conn: &mut PgConnection,
  table: ItemTable,
  parent_id: Uuid,
  items: &[LineItem],
) -> Result<(), BillingError> {
  for (index, item) in items.iter().enumerate() {
    sqlx::query(table.insert_sql())
      .bind(item.id())
      .bind(parent_id)
      .bind(i32::try_from(index).unwrap_or(i32::MAX))
      .bind(item.description())
      .bind(item.quantity())
      .bind(item.unit_price())
      .bind(item.discount())
      .bind(item.tax_rate())
      .bind(item.subtotal())
      .bind(item.discount_amount())
      .bind(item.tax_amount())
      .bind(item.total())
      .execute(&mut *conn)
      .await?;
  }
  Ok(())
}

/// Loads the items of every parent in `parent_ids`, grouped by parent.
pub(super) async fn load_items(
  conn: &mut PgConnection,
  table: ItemTable,
  parent_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<LineItem>>, BillingError> {
  let rows = sqlx::query_as::<_, LineItemRow>(table.select_sql())
    .bind(parent_ids)
    .fetch_all(&mut *conn)
    .await?;

  let mut grouped: HashMap<Uuid, Vec<LineItem>> = HashMap::new();
  for row in rows {
    let parent_id = row.parent_id;
    grouped.entry(parent_id).or_default().push(row.try_into()?);
  }
  Ok(grouped)
}

pub(super) async fn delete_items(
  conn: &mut PgConnection,
  table: ItemTable,
  parent_id: Uuid,
) -> Result<(), BillingError> {
  sqlx::query(table.delete_sql())
    .bind(parent_id)
    .execute(&mut *conn)
    .await?;
  Ok(())
}

pub(super) fn customer_from_columns(
  name: String,
  email: Option<String>,
  phone: Option<String>,
  address: Option<String>,
  gst_number: Option<String>,
) -> CustomerInfo {
  CustomerInfo {
    name,
    email,
    phone,
    address,
    gst_number,
  }
}

pub(super) fn totals_from_columns(
  subtotal: Decimal,
  discount_total: Decimal,
  tax_total: Decimal,
  shipping_amount: Option<Decimal>,
  adjustment_amount: Option<Decimal>,
  grand_total: Decimal,
) -> BillingTotals {
  BillingTotals {
    subtotal,
    discount_total,
    tax_total,
    shipping_amount,
    adjustment_amount,
    grand_total,
  }
}

/// Maps a unique violation on the document number constraint to a domain error.
pub(super) fn map_number_conflict(e: sqlx::Error, constraint: &str, number: &str) -> BillingError {
  if let sqlx::Error::Database(db_err) = &e {
    // PostgreSQL unique violation code
    if db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint) {
      return BillingError::DocumentNumberAlreadyExists(number.to_string());
    }
  }
  tracing::error!("Failed to insert document {}: {}", number, e);
  BillingError::Database(e)
}

/// Escapes LIKE metacharacters so the needle is matched literally.
pub(super) fn contains_pattern(needle: Option<&str>) -> Option<String> {
  needle.map(str::trim).filter(|n| !n.is_empty()).map(|n| {
    let escaped = n
      .replace('\\', "\\\\")
      .replace('%', "\\%")
      .replace('_', "\\_");
    format!("%{}%", escaped)
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_contains_pattern_escapes_wildcards() {
    assert_eq!(contains_pattern(Some("ravi")).as_deref(), Some("%ravi%"));
    assert_eq!(contains_pattern(Some("50%_off")).as_deref(), Some("%50\\%\\_off%"));
    assert_eq!(contains_pattern(Some("  ")), None);
    assert_eq!(contains_pattern(None), None);
  }
}
