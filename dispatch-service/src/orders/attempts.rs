//! Attempt chain: repeated visits to one job link back to the failed visit
//! they retry instead of colliding with it.

use super::store::ORDER_COLUMNS;
use crate::models::Order;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

/// Comparison key for an order number.
pub fn number_key(order_number: &str) -> String {
    collapse(order_number)
}

/// Comparison key for an address: city and street, case-folded, with
/// whitespace collapsed.
pub fn address_key(city: &str, street: &str) -> String {
    format!("{}|{}", collapse(city), collapse(street))
}

fn collapse(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Position of a new row in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLink {
    pub attempt_number: i32,
    pub previous_order_id: Option<Uuid>,
}

impl AttemptLink {
    pub fn first() -> Self {
        Self {
            attempt_number: 1,
            previous_order_id: None,
        }
    }

    pub fn after(previous: &Order) -> Self {
        Self {
            attempt_number: previous.attempt_number + 1,
            previous_order_id: Some(previous.order_id),
        }
    }
}

/// Existing rows relevant to creating an attempt.
#[derive(Debug, Default)]
pub struct ChainLookup {
    pub open: Option<Order>,
    pub completed: Option<Order>,
    pub failed_here: Option<Order>,
}

/// Decide where a new order with this number and address sits in the chain.
pub fn decide_attempt(order_number: &str, lookup: &ChainLookup) -> Result<AttemptLink, AppError> {
    if let Some(open) = &lookup.open {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Order '{}' already has an open attempt ({})",
            order_number,
            open.order_id
        )));
    }

    if let Some(completed) = &lookup.completed {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Order '{}' was already completed ({})",
            order_number,
            completed.order_id
        )));
    }

    Ok(lookup
        .failed_here
        .as_ref()
        .map(AttemptLink::after)
        .unwrap_or_else(AttemptLink::first))
}

async fn latest(
    conn: &mut PgConnection,
    condition: &str,
    number_key: &str,
    address_key: &str,
    exclude: Option<Uuid>,
) -> Result<Option<Order>, AppError> {
    let query = format!(
        r#"
        SELECT {ORDER_COLUMNS} FROM "order"
        WHERE order_number_key = $1
          AND ($2::text IS NULL OR $2 = '' OR address_key = $2)
          AND ($3::uuid IS NULL OR order_id <> $3)
          AND {condition}
        ORDER BY created_utc DESC
        LIMIT 1
        "#
    );

    sqlx::query_as::<_, Order>(&query)
        .bind(number_key)
        .bind(address_key)
        .bind(exclude)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up attempts: {}", e)))
}

/// The latest failed attempt at the same number and address.
pub async fn find_failed_attempt(
    conn: &mut PgConnection,
    number_key: &str,
    address_key: &str,
    exclude: Option<Uuid>,
) -> Result<Option<Order>, AppError> {
    latest(
        conn,
        "status = 'NOT_COMPLETED'",
        number_key,
        address_key,
        exclude,
    )
    .await
}

/// Query the chain and decide the new row's link.
pub async fn resolve_attempt(
    conn: &mut PgConnection,
    order_number: &str,
    number_key: &str,
    address_key: &str,
) -> Result<AttemptLink, AppError> {
    let lookup = ChainLookup {
        open: latest(conn, "status IN ('PENDING', 'ASSIGNED')", number_key, "", None).await?,
        completed: latest(conn, "status = 'COMPLETED'", number_key, "", None).await?,
        failed_here: find_failed_attempt(conn, number_key, address_key, None).await?,
    };

    let link = decide_attempt(order_number, &lookup)?;
    debug!(
        attempt_number = link.attempt_number,
        previous_order_id = ?link.previous_order_id,
        "Attempt chain resolved"
    );

    Ok(link)
}
