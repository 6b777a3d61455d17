//! Warehouse intake and issue to technicians.

use super::collected::normalize_serial;
use super::ledger::{self, NewItem, Transition};
use super::materials::adjust_stock;
use crate::models::{DeviceCategory, InventoryItem, ItemKind, ItemState, LedgerAction};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiveItem {
    pub kind: ItemKind,
    pub category: Option<DeviceCategory>,
    #[validate(length(min = 1, max = 200, message = "Item name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(max = 120, message = "Serial number must be at most 120 characters"))]
    pub serial_number: Option<String>,
    pub material_id: Option<Uuid>,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    #[serde(default)]
    pub unit_price: Decimal,
    pub location_id: Uuid,
}

fn default_quantity() -> i32 {
    1
}

/// Create an item on a warehouse shelf with its `RECEIVED` entry.
#[instrument(skip(conn, input), fields(kind = %input.kind, location_id = %input.location_id))]
pub async fn receive_item(
    conn: &mut PgConnection,
    input: &ReceiveItem,
    performed_by: Uuid,
) -> Result<InventoryItem, AppError> {
    let new_item = match input.kind {
        ItemKind::Device => NewItem {
            kind: ItemKind::Device,
            category: Some(input.category.unwrap_or(DeviceCategory::Other)),
            name: input.name.clone(),
            serial_number: normalize_serial(input.serial_number.as_deref()),
            material_id: None,
            quantity: 1,
            unit_price: input.unit_price,
        },
        ItemKind::Material => NewItem {
            kind: ItemKind::Material,
            category: None,
            name: input.name.clone(),
            serial_number: None,
            material_id: Some(input.material_id.ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Material lots require a material_id"))
            })?),
            quantity: input.quantity,
            unit_price: input.unit_price,
        },
    };

    let transition = Transition::new(LedgerAction::Received, performed_by)
        .to_location(Some(input.location_id))
        .with_quantity(new_item.quantity);
    let (item, _) = ledger::create_with_transition(conn, &new_item, &transition).await?;

    info!(item_id = %item.item_id, "Item received");

    Ok(item)
}

/// Hand an item from the warehouse to a technician.
///
/// Issuing a material lot also credits the technician's virtual stock.
#[instrument(skip(conn), fields(item_id = %item_id, technician_id = %technician_id))]
pub async fn issue_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    technician_id: Uuid,
    performed_by: Uuid,
) -> Result<InventoryItem, AppError> {
    let item = ledger::fetch_items_for_update(conn, &[item_id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Item {} not found", item_id)))?;

    if !matches!(item.state, ItemState::Available | ItemState::Returned) {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Item {} is {} and cannot be issued",
            item.item_id,
            item.state
        )));
    }

    let transition = Transition::new(LedgerAction::Issued, performed_by)
        .to_technician(Some(technician_id))
        .with_quantity(item.quantity);
    ledger::apply_transition(conn, &item, &transition).await?;

    if let (ItemKind::Material, Some(material_id)) = (item.kind, item.material_id) {
        adjust_stock(conn, technician_id, material_id, item.quantity).await?;
    }

    let issued = ledger::fetch_item(conn, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Item {} not found", item_id)))?;

    info!("Item issued");

    Ok(issued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_defaults_to_one() {
        let input: ReceiveItem = serde_json::from_value(serde_json::json!({
            "kind": "DEVICE",
            "category": "ROUTER",
            "name": "Router AX3000",
            "serial_number": "rt-001",
            "location_id": Uuid::new_v4(),
        }))
        .unwrap();

        assert_eq!(input.quantity, 1);
        assert_eq!(input.unit_price, Decimal::ZERO);
        assert!(input.validate().is_ok());
    }
}
