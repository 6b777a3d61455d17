//! Completion payload and its checks against the order it targets.

use crate::inventory::{normalize_serial, CollectedDevice, UsedMaterial};
use crate::models::{DeviceCategory, DeviceSource, Order, OrderStatus, ServiceType};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkCode {
    #[validate(length(min = 1, max = 40, message = "Work code must be 1-40 characters"))]
    pub code: String,
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Work code quantity must be between 1 and 100000"
    ))]
    pub quantity: i32,
}

/// A device referenced by a service record.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServiceDevice {
    pub source: DeviceSource,
    /// Required for warehouse devices.
    pub item_id: Option<Uuid>,
    /// Required for client devices; resolved from inventory otherwise.
    pub category: Option<DeviceCategory>,
    #[validate(length(max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 120))]
    pub serial_number: Option<String>,
}

impl ServiceDevice {
    fn check(&self) -> Result<(), String> {
        match self.source {
            DeviceSource::Warehouse if self.item_id.is_none() => {
                Err("warehouse devices need an item_id".to_string())
            }
            DeviceSource::Client if self.category.is_none() => {
                Err("client devices need a category".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn normalized_serial(&self) -> Option<String> {
        normalize_serial(self.serial_number.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServiceRecord {
    pub service_type: ServiceType,
    #[validate(nested)]
    pub device: Option<ServiceDevice>,
    #[validate(nested)]
    pub device2: Option<ServiceDevice>,
    #[serde(default)]
    #[validate(nested)]
    pub extra_devices: Vec<ServiceDevice>,
    #[validate(range(min = 0.0))]
    pub download_mbps: Option<f64>,
    #[validate(range(min = 0.0))]
    pub upload_mbps: Option<f64>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Everything a technician or administrator submits when closing an order.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CompletionSubmission {
    pub status: OrderStatus,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(max = 2000))]
    pub failure_reason: Option<String>,
    #[serde(default)]
    #[validate(nested)]
    pub work_codes: Vec<WorkCode>,
    #[serde(default)]
    pub equipment_ids: Vec<Uuid>,
    #[serde(default)]
    #[validate(nested)]
    pub used_materials: Vec<UsedMaterial>,
    #[serde(default)]
    #[validate(nested)]
    pub collected_devices: Vec<CollectedDevice>,
    #[serde(default)]
    #[validate(nested)]
    pub services: Vec<ServiceRecord>,
}

impl CompletionSubmission {
    /// Domain rules that depend on the target order. Runs before any write.
    pub fn check_against(&self, order: &Order) -> Result<(), AppError> {
        if !self.status.is_outcome() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Completion status must be COMPLETED or NOT_COMPLETED, got {}",
                self.status
            )));
        }

        if self.status == OrderStatus::NotCompleted
            && self
                .failure_reason
                .as_deref()
                .map_or(true, |reason| reason.trim().is_empty())
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A failure reason is required when the order is not completed"
            )));
        }

        if self.status == OrderStatus::Completed
            && order.order_type.requires_work_codes()
            && self.work_codes.is_empty()
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Completed {} orders require at least one work code",
                order.order_type
            )));
        }

        let device_errors: Vec<String> = self
            .services
            .iter()
            .flat_map(|service| {
                service
                    .device
                    .iter()
                    .chain(service.device2.iter())
                    .chain(service.extra_devices.iter())
                    .filter_map(move |device| {
                        device
                            .check()
                            .err()
                            .map(|reason| format!("{}: {}", service.service_type, reason))
                    })
            })
            .collect();
        if !device_errors.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Invalid service devices: {}",
                device_errors.join("; ")
            )));
        }

        Ok(())
    }

    /// Work codes with duplicates summed, in first-seen order.
    pub fn settlement_lines(&self) -> Result<Vec<(String, i32)>, AppError> {
        let mut lines: Vec<(String, i32)> = Vec::new();
        for work_code in &self.work_codes {
            let code = work_code.code.trim().to_uppercase();
            match lines.iter_mut().find(|(existing, _)| *existing == code) {
                Some((_, quantity)) => {
                    *quantity = quantity.checked_add(work_code.quantity).ok_or_else(|| {
                        AppError::BadRequest(anyhow::anyhow!(
                            "Total quantity of work code {} is out of range",
                            code
                        ))
                    })?;
                }
                None => lines.push((code, work_code.quantity)),
            }
        }
        Ok(lines)
    }
}
