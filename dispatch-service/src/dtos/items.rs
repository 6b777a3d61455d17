use crate::models::{DeviceCategory, InventoryItem, ItemKind, ItemState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: Uuid,
    pub kind: ItemKind,
    pub category: Option<DeviceCategory>,
    pub name: String,
    pub serial_number: Option<String>,
    pub material_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub state: ItemState,
    pub technician_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub updated_at: String,
}

impl From<InventoryItem> for ItemResponse {
    fn from(item: InventoryItem) -> Self {
        Self {
            id: item.item_id,
            kind: item.kind,
            category: item.category,
            name: item.name,
            serial_number: item.serial_number,
            material_id: item.material_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            state: item.state,
            technician_id: item.technician_id,
            location_id: item.location_id,
            order_id: item.order_id,
            updated_at: item.updated_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueItemRequest {
    pub technician_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DefineMaterialRequest {
    #[validate(length(min = 1, max = 200, message = "Material name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be 1-20 characters"))]
    pub unit: String,
    #[serde(default)]
    pub unit_price: Decimal,
}
