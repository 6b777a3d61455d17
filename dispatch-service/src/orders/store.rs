//! Row-level order persistence shared by the order workflows.

use crate::models::{Order, OrderStatus, OrderType};
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::PgConnection;
use uuid::Uuid;

pub(crate) const ORDER_COLUMNS: &str = "order_id, order_number, city, street, order_number_key, \
     address_key, order_type, status, attempt_number, previous_order_id, technician_id, notes, \
     failure_reason, latitude, longitude, completed_utc, created_utc, updated_utc";

/// Fields of a row about to be inserted.
#[derive(Debug, Clone)]
pub(crate) struct OrderRow<'a> {
    pub order_number: &'a str,
    pub city: &'a str,
    pub street: &'a str,
    pub order_number_key: &'a str,
    pub address_key: &'a str,
    pub order_type: OrderType,
    pub attempt_number: i32,
    pub previous_order_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub notes: Option<&'a str>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub(crate) async fn insert_order(
    conn: &mut PgConnection,
    row: &OrderRow<'_>,
) -> Result<Order, AppError> {
    let status = if row.technician_id.is_some() {
        OrderStatus::Assigned
    } else {
        OrderStatus::Pending
    };

    let query = format!(
        r#"
        INSERT INTO "order"
            (order_id, order_number, city, street, order_number_key, address_key, order_type,
             status, attempt_number, previous_order_id, technician_id, notes, latitude, longitude)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {ORDER_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Order>(&query)
        .bind(Uuid::new_v4())
        .bind(row.order_number)
        .bind(row.city)
        .bind(row.street)
        .bind(row.order_number_key)
        .bind(row.address_key)
        .bind(row.order_type)
        .bind(status)
        .bind(row.attempt_number)
        .bind(row.previous_order_id)
        .bind(row.technician_id)
        .bind(row.notes)
        .bind(row.latitude)
        .bind(row.longitude)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Order '{}' already has an open attempt",
                    row.order_number
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create order: {}", e)),
        })
}

/// Load an order and hold its row lock until the transaction ends.
pub(crate) async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Order, AppError> {
    let query = format!(r#"SELECT {ORDER_COLUMNS} FROM "order" WHERE order_id = $1 FOR UPDATE"#);

    sqlx::query_as::<_, Order>(&query)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock order: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))
}

/// Write the outcome fields of a completion.
///
/// `completed_utc` is only set the first time an order is closed.
pub(crate) async fn record_outcome(
    conn: &mut PgConnection,
    order_id: Uuid,
    status: OrderStatus,
    notes: Option<&str>,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let query = format!(
        r#"
        UPDATE "order"
        SET status = $2, notes = $3, failure_reason = $4,
            completed_utc = COALESCE(completed_utc, $5), updated_utc = $5
        WHERE order_id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    );

    sqlx::query_as::<_, Order>(&query)
        .bind(order_id)
        .bind(status)
        .bind(notes)
        .bind(failure_reason)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update order outcome: {}", e)))
}

/// Append one row to the order's status audit trail.
pub(crate) async fn append_history(
    conn: &mut PgConnection,
    order_id: Uuid,
    status_before: Option<OrderStatus>,
    status_after: OrderStatus,
    changed_by: Uuid,
    mode: &str,
    note: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO order_history
            (history_id, order_id, status_before, status_after, changed_by, mode, note, changed_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(order_id)
    .bind(status_before)
    .bind(status_after)
    .bind(changed_by)
    .bind(mode)
    .bind(note)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record order history: {}", e)))?;

    Ok(())
}

/// Replace the order's billable work codes.
pub(crate) async fn replace_settlements(
    conn: &mut PgConnection,
    order_id: Uuid,
    work_codes: &[(String, i32)],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM order_settlement_entry WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to clear settlements: {}", e)))?;

    for (code, quantity) in work_codes {
        sqlx::query(
            r#"
            INSERT INTO order_settlement_entry (entry_id, order_id, work_code, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(code)
        .bind(quantity)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record settlement: {}", e)))?;
    }

    Ok(())
}
