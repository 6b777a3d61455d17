//! Inventory item model: devices and material lots.

use super::ledger::Custody;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Whether an item is a tracked device or a fungible material lot.
    pub enum ItemKind {
        Device => "DEVICE",
        Material => "MATERIAL",
    }
}

string_enum! {
    /// Device category. `Other` is the catch-all bucket that any technician may bind.
    pub enum DeviceCategory {
        Modem => "MODEM",
        Router => "ROUTER",
        Ont => "ONT",
        Decoder => "DECODER",
        Phone => "PHONE",
        Amplifier => "AMPLIFIER",
        Ups => "UPS",
        Other => "OTHER",
    }
}

string_enum! {
    /// Current custodian state of an item.
    pub enum ItemState {
        /// On a warehouse shelf.
        Available => "AVAILABLE",
        /// Held by a technician.
        Assigned => "ASSIGNED",
        /// Installed on a job; no human custodian.
        AssignedToOrder => "ASSIGNED_TO_ORDER",
        /// Recovered from a client, held by the collecting technician.
        CollectedFromClient => "COLLECTED_FROM_CLIENT",
        Returned => "RETURNED",
        ReturnedToTechnician => "RETURNED_TO_TECHNICIAN",
        ReturnedToOperator => "RETURNED_TO_OPERATOR",
        /// In transit between custodians.
        Transfer => "TRANSFER",
    }
}

impl ItemState {
    /// States bound to a job rather than to a place or person.
    pub fn is_order_bound(&self) -> bool {
        matches!(self, Self::AssignedToOrder | Self::CollectedFromClient)
    }
}

/// Inventory item row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct InventoryItem {
    pub item_id: Uuid,
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
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl InventoryItem {
    /// Current projection fields.
    pub fn custody(&self) -> Custody {
        Custody {
            state: self.state,
            technician_id: self.technician_id,
            location_id: self.location_id,
            order_id: self.order_id,
        }
    }

    pub fn is_device(&self) -> bool {
        self.kind == ItemKind::Device
    }

    /// Short description of who holds the item, for conflict messages.
    pub fn custodian_label(&self) -> String {
        match (self.technician_id, self.location_id, self.order_id) {
            (Some(t), _, _) => format!("technician {}", t),
            (None, Some(l), _) => format!("location {}", l),
            (None, None, Some(o)) => format!("order {}", o),
            (None, None, None) => "no custodian".to_string(),
        }
    }
}

/// Catalog entry for a consumable material.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaterialDefinition {
    pub material_id: Uuid,
    pub name: String,
    pub unit: String,
    pub unit_price: Decimal,
    pub created_utc: DateTime<Utc>,
}
