//! Field-service order model and its completion records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// Order lifecycle: `PENDING -> ASSIGNED -> COMPLETED | NOT_COMPLETED`.
    pub enum OrderStatus {
        Pending => "PENDING",
        Assigned => "ASSIGNED",
        Completed => "COMPLETED",
        NotCompleted => "NOT_COMPLETED",
    }
}

impl OrderStatus {
    /// An open attempt blocks any other attempt with the same order number.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned)
    }

    /// Final outcomes a completion may submit.
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Completed | Self::NotCompleted)
    }
}

string_enum! {
    pub enum OrderType {
        Installation => "INSTALLATION",
        Service => "SERVICE",
        Outage => "OUTAGE",
    }
}

impl OrderType {
    /// Completed jobs of this type must carry at least one billable work code.
    pub fn requires_work_codes(&self) -> bool {
        matches!(self, Self::Installation)
    }
}

string_enum! {
    /// Measured service line on a completed order.
    pub enum ServiceType {
        Internet => "INTERNET",
        Tv => "TV",
        Phone => "PHONE",
    }
}

string_enum! {
    /// Where a service device came from.
    pub enum DeviceSource {
        Warehouse => "WAREHOUSE",
        Client => "CLIENT",
    }
}

/// One attempt at a field-service job.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub order_id: Uuid,
    pub order_number: String,
    pub city: String,
    pub street: String,
    #[serde(skip)]
    pub order_number_key: String,
    #[serde(skip)]
    pub address_key: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub attempt_number: i32,
    pub previous_order_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub notes: Option<String>,
    pub failure_reason: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub completed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Status-change audit row, separate from the inventory ledger.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderHistory {
    pub history_id: Uuid,
    pub order_id: Uuid,
    pub status_before: Option<OrderStatus>,
    pub status_after: OrderStatus,
    pub changed_by: Uuid,
    pub mode: String,
    pub note: Option<String>,
    pub changed_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EquipmentLink {
    pub order_id: Uuid,
    pub item_id: Uuid,
    pub linked_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MaterialUsage {
    pub usage_id: Uuid,
    pub order_id: Uuid,
    pub material_id: Uuid,
    pub quantity: i32,
}

/// Billable work code recorded on an order.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SettlementEntry {
    pub entry_id: Uuid,
    pub order_id: Uuid,
    pub work_code: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderService {
    pub service_id: Uuid,
    pub order_id: Uuid,
    pub service_type: ServiceType,
    pub device_source: Option<DeviceSource>,
    pub device_item_id: Option<Uuid>,
    pub device_category: Option<super::DeviceCategory>,
    pub device_serial: Option<String>,
    pub device2_source: Option<DeviceSource>,
    pub device2_item_id: Option<Uuid>,
    pub device2_category: Option<super::DeviceCategory>,
    pub device2_serial: Option<String>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ServiceExtraDevice {
    pub extra_id: Uuid,
    pub service_id: Uuid,
    pub source: DeviceSource,
    pub item_id: Option<Uuid>,
    pub category: super::DeviceCategory,
    pub name: Option<String>,
    pub serial: Option<String>,
}
