//! Order creation, editing and assignment.

use super::attempts::{self, AttemptLink};
use super::store::{self, OrderRow, ORDER_COLUMNS};
use crate::models::{Order, OrderStatus, OrderType};
use crate::policy::{GeoPoint, Geocoder};
use crate::services::Database;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrder {
    #[validate(length(min = 1, max = 64, message = "Order number must be 1-64 characters"))]
    pub order_number: String,
    #[validate(length(min = 1, max = 120, message = "City must be 1-120 characters"))]
    pub city: String,
    #[validate(length(min = 1, max = 200, message = "Street must be 1-200 characters"))]
    pub street: String,
    pub order_type: OrderType,
    pub technician_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct OrderUpdate {
    #[validate(length(min = 1, max = 120, message = "City must be 1-120 characters"))]
    pub city: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Street must be 1-200 characters"))]
    pub street: Option<String>,
    pub order_type: Option<OrderType>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl NewOrder {
    /// Copy with surrounding whitespace removed from the text fields.
    pub fn trimmed(&self) -> Self {
        Self {
            order_number: self.order_number.trim().to_string(),
            city: self.city.trim().to_string(),
            street: self.street.trim().to_string(),
            ..self.clone()
        }
    }
}

impl OrderUpdate {
    pub fn trimmed(&self) -> Self {
        Self {
            city: self.city.as_deref().map(|c| c.trim().to_string()),
            street: self.street.as_deref().map(|s| s.trim().to_string()),
            ..self.clone()
        }
    }
}

/// Geocode an address, treating lookup failures as "no coordinates".
async fn locate(geocoder: &dyn Geocoder, city: &str, street: &str) -> Option<GeoPoint> {
    match geocoder.geocode(city, street).await {
        Ok(point) => point,
        Err(e) => {
            warn!(error = %e, "Geocoding failed; continuing without coordinates");
            None
        }
    }
}

/// Create an order, placing it in its attempt chain.
#[instrument(skip(db, geocoder, input), fields(order_number = %input.order_number))]
pub async fn create_order(
    db: &Database,
    geocoder: &dyn Geocoder,
    input: &NewOrder,
    created_by: Uuid,
) -> Result<Order, AppError> {
    let input = input.trimmed();
    input.validate()?;

    let number_key = attempts::number_key(&input.order_number);
    let address_key = attempts::address_key(&input.city, &input.street);
    let point = locate(geocoder, &input.city, &input.street).await;

    let mut tx = db.begin().await?;

    let link = attempts::resolve_attempt(&mut tx, &input.order_number, &number_key, &address_key)
        .await?;

    let order = store::insert_order(
        &mut tx,
        &OrderRow {
            order_number: &input.order_number,
            city: &input.city,
            street: &input.street,
            order_number_key: &number_key,
            address_key: &address_key,
            order_type: input.order_type,
            attempt_number: link.attempt_number,
            previous_order_id: link.previous_order_id,
            technician_id: input.technician_id,
            notes: input.notes.as_deref(),
            latitude: point.map(|p| p.latitude),
            longitude: point.map(|p| p.longitude),
        },
    )
    .await?;

    store::append_history(
        &mut tx,
        order.order_id,
        None,
        order.status,
        created_by,
        "CREATE",
        None,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e)))?;

    info!(
        order_id = %order.order_id,
        attempt_number = order.attempt_number,
        "Order created"
    );

    Ok(order)
}

/// Edit an order. An address change re-geocodes and re-links the attempt.
#[instrument(skip(db, geocoder, input), fields(order_id = %order_id))]
pub async fn update_order(
    db: &Database,
    geocoder: &dyn Geocoder,
    order_id: Uuid,
    input: &OrderUpdate,
    edited_by: Uuid,
) -> Result<Order, AppError> {
    let input = input.trimmed();
    input.validate()?;

    let current = db
        .get_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order {} not found", order_id)))?;

    let city = input.city.as_deref().map(str::trim).unwrap_or(&current.city);
    let street = input
        .street
        .as_deref()
        .map(str::trim)
        .unwrap_or(&current.street);
    let address_key = attempts::address_key(city, street);
    let address_changed = address_key != current.address_key;

    let point = if address_changed {
        locate(geocoder, city, street).await
    } else {
        None
    };

    let mut tx = db.begin().await?;
    let locked = store::lock_order(&mut tx, order_id).await?;

    let link = if address_changed {
        attempts::find_failed_attempt(&mut tx, &locked.order_number_key, &address_key, Some(order_id))
            .await?
            .as_ref()
            .map(AttemptLink::after)
            .unwrap_or_else(AttemptLink::first)
    } else {
        AttemptLink {
            attempt_number: locked.attempt_number,
            previous_order_id: locked.previous_order_id,
        }
    };

    let query = format!(
        r#"
        UPDATE "order"
        SET city = $2, street = $3, address_key = $4, order_type = $5, notes = $6,
            attempt_number = $7, previous_order_id = $8,
            latitude = CASE WHEN $9 THEN $10 ELSE latitude END,
            longitude = CASE WHEN $9 THEN $11 ELSE longitude END,
            updated_utc = NOW()
        WHERE order_id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    );

    let order = sqlx::query_as::<_, Order>(&query)
        .bind(order_id)
        .bind(city)
        .bind(street)
        .bind(&address_key)
        .bind(input.order_type.unwrap_or(locked.order_type))
        .bind(input.notes.as_deref().or(locked.notes.as_deref()))
        .bind(link.attempt_number)
        .bind(link.previous_order_id)
        .bind(address_changed)
        .bind(point.map(|p| p.latitude))
        .bind(point.map(|p| p.longitude))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update order: {}", e)))?;

    store::append_history(
        &mut tx,
        order_id,
        Some(locked.status),
        order.status,
        edited_by,
        "EDIT",
        address_changed.then_some("Address changed"),
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e)))?;

    info!(address_changed, "Order updated");

    Ok(order)
}

/// Hand an open order to a technician.
#[instrument(skip(db), fields(order_id = %order_id, technician_id = %technician_id))]
pub async fn assign_order(
    db: &Database,
    order_id: Uuid,
    technician_id: Uuid,
    assigned_by: Uuid,
) -> Result<Order, AppError> {
    let mut tx = db.begin().await?;
    let locked = store::lock_order(&mut tx, order_id).await?;

    if !locked.status.is_open() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Order {} is {} and cannot be assigned",
            order_id,
            locked.status
        )));
    }

    let query = format!(
        r#"
        UPDATE "order"
        SET technician_id = $2, status = $3, updated_utc = NOW()
        WHERE order_id = $1
        RETURNING {ORDER_COLUMNS}
        "#
    );

    let order = sqlx::query_as::<_, Order>(&query)
        .bind(order_id)
        .bind(technician_id)
        .bind(OrderStatus::Assigned)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to assign order: {}", e)))?;

    store::append_history(
        &mut tx,
        order_id,
        Some(locked.status),
        OrderStatus::Assigned,
        assigned_by,
        "ASSIGN",
        None,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e)))?;

    info!("Order assigned");

    Ok(order)
}
