use super::ledger;
use crate::models::DeviceCategory;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::PgConnection;
use uuid::Uuid;

/// Looks up the category of a warehouse device referenced by a service record.
#[async_trait]
pub trait DeviceCategoryResolver: Send + Sync {
    async fn resolve(
        &self,
        conn: &mut PgConnection,
        item_id: Uuid,
    ) -> Result<(DeviceCategory, Option<String>), AppError>;
}

/// Resolves categories from the inventory item table.
///
/// Items without a category resolve to [`DeviceCategory::Other`].
#[derive(Debug, Clone, Default)]
pub struct InventoryCatalog;

#[async_trait]
impl DeviceCategoryResolver for InventoryCatalog {
    async fn resolve(
        &self,
        conn: &mut PgConnection,
        item_id: Uuid,
    ) -> Result<(DeviceCategory, Option<String>), AppError> {
        let item = ledger::fetch_item(conn, item_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Service device {} not found", item_id))
        })?;

        Ok((
            item.category.unwrap_or(DeviceCategory::Other),
            item.serial_number,
        ))
    }
}
