//! Devices picked up from a client during a visit.
//!
//! Matching between the stored and submitted lists is by normalized serial
//! number. Devices without a serial never match and are always recreated.

use super::ledger::{self, item_columns_for, NewItem, Transition};
use super::rollback::{self, RollbackOutcome};
use crate::models::{DeviceCategory, InventoryItem, ItemKind, LedgerAction};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Validate)]
pub struct CollectedDevice {
    #[validate(length(min = 1, max = 200, message = "Device name must be 1-200 characters"))]
    pub name: String,
    pub category: DeviceCategory,
    #[validate(length(max = 120, message = "Serial number must be at most 120 characters"))]
    pub serial_number: Option<String>,
}

impl CollectedDevice {
    fn serial_key(&self) -> Option<String> {
        normalize_serial(self.serial_number.as_deref())
    }
}

/// Trim and upper-case a serial number. Blank serials count as absent.
pub fn normalize_serial(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

#[derive(Debug, Default)]
pub struct CollectedPlan<'a> {
    /// Previously collected items no longer submitted.
    pub retract: Vec<Uuid>,
    /// Items present in both lists, with their refreshed attributes.
    pub keep: Vec<(Uuid, &'a CollectedDevice)>,
    /// Submitted devices not yet collected on this order.
    pub add: Vec<&'a CollectedDevice>,
}

/// Split the stored and submitted collections into retractions, kept items
/// and additions.
pub fn plan_collected<'a>(
    previous: &[InventoryItem],
    submitted: &'a [CollectedDevice],
) -> Result<CollectedPlan<'a>, AppError> {
    let mut seen = HashSet::new();
    for device in submitted {
        if let Some(serial) = device.serial_key() {
            if !seen.insert(serial.clone()) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Serial number {} is listed more than once",
                    serial
                )));
            }
        }
    }

    let stored: HashMap<String, Uuid> = previous
        .iter()
        .filter_map(|item| {
            normalize_serial(item.serial_number.as_deref()).map(|serial| (serial, item.item_id))
        })
        .collect();

    let mut plan = CollectedPlan::default();
    let mut kept = HashSet::new();

    for device in submitted {
        match device.serial_key().and_then(|serial| stored.get(&serial)) {
            Some(item_id) => {
                kept.insert(*item_id);
                plan.keep.push((*item_id, device));
            }
            None => plan.add.push(device),
        }
    }

    plan.retract = previous
        .iter()
        .map(|item| item.item_id)
        .filter(|id| !kept.contains(id))
        .collect();

    Ok(plan)
}

#[derive(Debug, Clone, Default)]
pub struct CollectedOutcome {
    pub retracted: usize,
    pub purged: usize,
    pub kept: usize,
    pub added: Vec<Uuid>,
}

async fn collected_on_order(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<InventoryItem>, AppError> {
    let columns = item_columns_for("i");
    let query = format!(
        r#"
        SELECT {columns} FROM inventory_item i
        JOIN order_equipment_link l ON l.item_id = i.item_id
        WHERE l.order_id = $1 AND i.state = 'COLLECTED_FROM_CLIENT'
        ORDER BY l.linked_utc, i.item_id
        FOR UPDATE OF i
        "#
    );

    sqlx::query_as::<_, InventoryItem>(&query)
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get collected devices: {}", e)))
}

async fn refresh_attributes(
    conn: &mut PgConnection,
    item_id: Uuid,
    device: &CollectedDevice,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE inventory_item
        SET name = $2, category = $3, updated_utc = NOW()
        WHERE item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(&device.name)
    .bind(device.category)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update device: {}", e)))?;

    Ok(())
}

/// Bring the order's collected devices in line with `submitted`.
///
/// Retractions run first and one at a time, then kept devices are refreshed,
/// then additions are collected.
#[instrument(skip(conn, submitted), fields(order_id = %order_id))]
pub async fn sync_collected_devices(
    conn: &mut PgConnection,
    order_id: Uuid,
    editor: Uuid,
    technician_id: Option<Uuid>,
    submitted: &[CollectedDevice],
) -> Result<CollectedOutcome, AppError> {
    let previous = collected_on_order(conn, order_id).await?;
    let plan = plan_collected(&previous, submitted)?;
    let mut outcome = CollectedOutcome::default();

    for item_id in &plan.retract {
        let Some(item) = previous.iter().find(|item| item.item_id == *item_id) else {
            continue;
        };
        ledger::unlink_from_order(conn, order_id, item.item_id).await?;

        match ledger::last_entry_for_order(
            conn,
            item.item_id,
            LedgerAction::CollectedFromClient,
            order_id,
        )
        .await?
        {
            Some(collection) => {
                if rollback::undo_entry(conn, item, &collection, editor).await?
                    == RollbackOutcome::Purged
                {
                    outcome.purged += 1;
                }
            }
            None => warn!(item_id = %item.item_id, "Collected item has no collection entry"),
        }
        outcome.retracted += 1;
    }

    for (item_id, device) in &plan.keep {
        refresh_attributes(conn, *item_id, device).await?;
        outcome.kept += 1;
    }

    for device in &plan.add {
        let serial = device.serial_key();
        let transition = Transition::new(LedgerAction::CollectedFromClient, editor)
            .to_technician(technician_id)
            .to_order(order_id);

        let existing = match &serial {
            Some(serial) => ledger::fetch_item_by_serial_for_update(conn, serial).await?,
            None => None,
        };

        let item_id = match existing {
            Some(item) => {
                refresh_attributes(conn, item.item_id, device).await?;
                ledger::apply_transition(conn, &item, &transition).await?;
                item.item_id
            }
            None => {
                let new_item = NewItem {
                    kind: ItemKind::Device,
                    category: Some(device.category),
                    name: device.name.clone(),
                    serial_number: serial.clone(),
                    material_id: None,
                    quantity: 1,
                    unit_price: Decimal::ZERO,
                };
                let (item, _) =
                    ledger::create_with_transition(conn, &new_item, &transition).await?;
                item.item_id
            }
        };

        ledger::link_to_order(conn, order_id, item_id).await?;
        outcome.added.push(item_id);
    }

    info!(
        retracted = outcome.retracted,
        purged = outcome.purged,
        kept = outcome.kept,
        added = outcome.added.len(),
        "Collected devices synchronized"
    );

    Ok(outcome)
}
