//! Service lines measured on a completed order.

use super::submission::{ServiceDevice, ServiceRecord};
use crate::inventory::DeviceCategoryResolver;
use crate::models::{DeviceCategory, DeviceSource};
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::debug;
use uuid::Uuid;

/// A service device with its category and serial settled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedDevice {
    pub source: DeviceSource,
    pub item_id: Option<Uuid>,
    pub category: DeviceCategory,
    pub name: Option<String>,
    pub serial: Option<String>,
}

async fn resolve(
    conn: &mut PgConnection,
    resolver: &dyn DeviceCategoryResolver,
    device: &ServiceDevice,
) -> Result<ResolvedDevice, AppError> {
    match (device.source, device.item_id) {
        (DeviceSource::Warehouse, Some(item_id)) => {
            let (category, serial) = resolver.resolve(conn, item_id).await?;
            Ok(ResolvedDevice {
                source: DeviceSource::Warehouse,
                item_id: Some(item_id),
                category,
                name: device.name.clone(),
                serial: serial.or_else(|| device.normalized_serial()),
            })
        }
        (DeviceSource::Warehouse, None) => Err(AppError::BadRequest(anyhow::anyhow!(
            "Warehouse service devices need an item_id"
        ))),
        (DeviceSource::Client, _) => Ok(client_device(device)),
    }
}

/// Client devices are described entirely by the operator.
fn client_device(device: &ServiceDevice) -> ResolvedDevice {
    ResolvedDevice {
        source: DeviceSource::Client,
        item_id: None,
        category: device.category.unwrap_or(DeviceCategory::Other),
        name: device.name.clone(),
        serial: device.normalized_serial(),
    }
}

async fn resolve_optional(
    conn: &mut PgConnection,
    resolver: &dyn DeviceCategoryResolver,
    device: Option<&ServiceDevice>,
) -> Result<Option<ResolvedDevice>, AppError> {
    match device {
        Some(device) => Ok(Some(resolve(conn, resolver, device).await?)),
        None => Ok(None),
    }
}

/// Replace all service records of an order, and their extra devices.
pub(crate) async fn replace_services(
    conn: &mut PgConnection,
    resolver: &dyn DeviceCategoryResolver,
    order_id: Uuid,
    services: &[ServiceRecord],
) -> Result<usize, AppError> {
    // Extra devices go with their service rows through the cascade.
    sqlx::query("DELETE FROM order_service WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to clear services: {}", e)))?;

    for record in services {
        let device = resolve_optional(conn, resolver, record.device.as_ref()).await?;
        let device2 = resolve_optional(conn, resolver, record.device2.as_ref()).await?;

        let service_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO order_service
                (service_id, order_id, service_type,
                 device_source, device_item_id, device_category, device_serial,
                 device2_source, device2_item_id, device2_category, device2_serial,
                 download_mbps, upload_mbps, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(service_id)
        .bind(order_id)
        .bind(record.service_type)
        .bind(device.as_ref().map(|d| d.source))
        .bind(device.as_ref().and_then(|d| d.item_id))
        .bind(device.as_ref().map(|d| d.category))
        .bind(device.as_ref().and_then(|d| d.serial.clone()))
        .bind(device2.as_ref().map(|d| d.source))
        .bind(device2.as_ref().and_then(|d| d.item_id))
        .bind(device2.as_ref().map(|d| d.category))
        .bind(device2.as_ref().and_then(|d| d.serial.clone()))
        .bind(record.download_mbps)
        .bind(record.upload_mbps)
        .bind(&record.notes)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record service: {}", e)))?;

        for extra in &record.extra_devices {
            let extra = resolve(conn, resolver, extra).await?;
            sqlx::query(
                r#"
                INSERT INTO order_service_extra_device
                    (extra_id, service_id, source, item_id, category, name, serial)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(service_id)
            .bind(extra.source)
            .bind(extra.item_id)
            .bind(extra.category)
            .bind(&extra.name)
            .bind(&extra.serial)
            .execute(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record extra device: {}", e)))?;
        }
    }

    debug!(services = services.len(), "Service records replaced");

    Ok(services.len())
}
