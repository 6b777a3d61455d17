use crate::models::{Order, OrderStatus, OrderType};
use crate::orders::NewOrder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub city: String,
    pub street: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub attempt_number: i32,
    pub previous_order_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.order_id,
            order_number: order.order_number,
            city: order.city,
            street: order.street,
            order_type: order.order_type,
            status: order.status,
            attempt_number: order.attempt_number,
            previous_order_id: order.previous_order_id,
            technician_id: order.technician_id,
            notes: order.notes,
            failure_reason: order.failure_reason,
            latitude: order.latitude,
            longitude: order.longitude,
            completed_at: order.completed_utc.map(|t| t.to_rfc3339()),
            created_at: order.created_utc.to_rfc3339(),
            updated_at: order.updated_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignOrderRequest {
    pub technician_id: Uuid,
}

/// Rows are validated one by one during import so a bad row cannot sink the batch.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportOrdersRequest {
    #[validate(length(min = 1, max = 5000, message = "Import must contain 1-5000 rows"))]
    pub orders: Vec<NewOrder>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_needs_at_least_one_row() {
        let empty: ImportOrdersRequest =
            serde_json::from_value(serde_json::json!({ "orders": [] })).unwrap();
        assert!(empty.validate().is_err());

        let one: ImportOrdersRequest = serde_json::from_value(serde_json::json!({
            "orders": [{
                "order_number": "A-100",
                "city": "Gdańsk",
                "street": "Długa 1",
                "order_type": "INSTALLATION"
            }]
        }))
        .unwrap();
        assert!(one.validate().is_ok());
    }
}
