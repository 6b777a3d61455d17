//! Ledger writes and the item state machine.
//!
//! Every custody change goes through [`apply_transition`], which appends one
//! ledger entry and updates the item projection in the same connection.

use crate::models::{Custody, InventoryItem, ItemKind, LedgerAction, LedgerEntry};
use crate::services::metrics::{DB_QUERY_DURATION, ITEM_TRANSITIONS_TOTAL};
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{debug, instrument};
use uuid::Uuid;

pub(crate) const ITEM_COLUMNS: &str = "item_id, kind, category, name, serial_number, material_id, \
     quantity, unit_price, state, technician_id, location_id, order_id, created_utc, updated_utc";

pub(crate) const LEDGER_COLUMNS: &str = "entry_id, seq, item_id, action, performed_by, \
     performed_utc, target_technician_id, target_order_id, target_location_id, quantity, notes";

/// Item columns qualified with a table alias, for joins.
pub(crate) fn item_columns_for(alias: &str) -> String {
    ITEM_COLUMNS
        .split(',')
        .map(|column| format!("{}.{}", alias, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A custody change requested by the engine.
#[derive(Debug, Clone)]
pub struct Transition {
    pub action: LedgerAction,
    pub performed_by: Uuid,
    pub technician_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub quantity: Option<i32>,
    pub notes: Option<String>,
}

impl Transition {
    pub fn new(action: LedgerAction, performed_by: Uuid) -> Self {
        Self {
            action,
            performed_by,
            technician_id: None,
            order_id: None,
            location_id: None,
            quantity: None,
            notes: None,
        }
    }

    pub fn to_technician(mut self, technician_id: Option<Uuid>) -> Self {
        self.technician_id = technician_id;
        self
    }

    pub fn to_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn to_location(mut self, location_id: Option<Uuid>) -> Self {
        self.location_id = location_id;
        self
    }

    pub fn with_quantity(mut self, quantity: i32) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn custody_after(&self, previous: Option<&Custody>) -> Custody {
        self.action
            .custody_after(self.technician_id, self.order_id, self.location_id, previous)
    }
}

/// Attributes of an item entering the system.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub kind: ItemKind,
    pub category: Option<crate::models::DeviceCategory>,
    pub name: String,
    pub serial_number: Option<String>,
    pub material_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

async fn insert_entry(
    conn: &mut PgConnection,
    item_id: Uuid,
    transition: &Transition,
) -> Result<LedgerEntry, AppError> {
    let query = format!(
        r#"
        INSERT INTO inventory_ledger_entry
            (entry_id, item_id, action, performed_by, performed_utc,
             target_technician_id, target_order_id, target_location_id, quantity, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {LEDGER_COLUMNS}
        "#
    );

    let entry = sqlx::query_as::<_, LedgerEntry>(&query)
        .bind(Uuid::new_v4())
        .bind(item_id)
        .bind(transition.action)
        .bind(transition.performed_by)
        .bind(Utc::now())
        .bind(transition.technician_id)
        .bind(transition.order_id)
        .bind(transition.location_id)
        .bind(transition.quantity)
        .bind(&transition.notes)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append ledger entry: {}", e)))?;

    ITEM_TRANSITIONS_TOTAL
        .with_label_values(&[transition.action.as_str()])
        .inc();

    Ok(entry)
}

/// Overwrite the projection fields of an item.
///
/// Only rollback calls this directly, and only with a custody obtained by
/// replaying the item's remaining ledger.
pub(crate) async fn set_custody(
    conn: &mut PgConnection,
    item_id: Uuid,
    custody: &Custody,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE inventory_item
        SET state = $2, technician_id = $3, location_id = $4, order_id = $5, updated_utc = NOW()
        WHERE item_id = $1
        "#,
    )
    .bind(item_id)
    .bind(custody.state)
    .bind(custody.technician_id)
    .bind(custody.location_id)
    .bind(custody.order_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update item custody: {}", e)))?;

    Ok(())
}

/// Append a ledger entry for `item` and move its projection to the action's
/// canonical custody.
#[instrument(skip(conn, item, transition), fields(item_id = %item.item_id, action = %transition.action))]
pub async fn apply_transition(
    conn: &mut PgConnection,
    item: &InventoryItem,
    transition: &Transition,
) -> Result<LedgerEntry, AppError> {
    let timer = DB_QUERY_DURATION
        .with_label_values(&["apply_transition"])
        .start_timer();

    let custody = transition.custody_after(Some(&item.custody()));
    let entry = insert_entry(conn, item.item_id, transition).await?;
    set_custody(conn, item.item_id, &custody).await?;

    timer.observe_duration();

    debug!(
        from = %item.state,
        to = %custody.state,
        entry_id = %entry.entry_id,
        "Item transitioned"
    );

    Ok(entry)
}

/// Create an item whose first ledger entry is `transition`.
#[instrument(skip(conn, new_item, transition), fields(action = %transition.action))]
pub async fn create_with_transition(
    conn: &mut PgConnection,
    new_item: &NewItem,
    transition: &Transition,
) -> Result<(InventoryItem, LedgerEntry), AppError> {
    let custody = transition.custody_after(None);
    let quantity = match new_item.kind {
        ItemKind::Device => 1,
        ItemKind::Material => new_item.quantity,
    };

    let query = format!(
        r#"
        INSERT INTO inventory_item
            (item_id, kind, category, name, serial_number, material_id, quantity, unit_price,
             state, technician_id, location_id, order_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {ITEM_COLUMNS}
        "#
    );

    let item = sqlx::query_as::<_, InventoryItem>(&query)
        .bind(Uuid::new_v4())
        .bind(new_item.kind)
        .bind(new_item.category)
        .bind(&new_item.name)
        .bind(&new_item.serial_number)
        .bind(new_item.material_id)
        .bind(quantity)
        .bind(new_item.unit_price)
        .bind(custody.state)
        .bind(custody.technician_id)
        .bind(custody.location_id)
        .bind(custody.order_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "An item with serial number '{}' already exists",
                    new_item.serial_number.as_deref().unwrap_or_default()
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create item: {}", e)),
        })?;

    let entry = insert_entry(conn, item.item_id, transition).await?;

    Ok((item, entry))
}

pub async fn fetch_item(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> Result<Option<InventoryItem>, AppError> {
    let query = format!("SELECT {ITEM_COLUMNS} FROM inventory_item WHERE item_id = $1");

    sqlx::query_as::<_, InventoryItem>(&query)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get item: {}", e)))
}

/// Load items and lock their rows until the surrounding transaction ends.
pub async fn fetch_items_for_update(
    conn: &mut PgConnection,
    item_ids: &[Uuid],
) -> Result<Vec<InventoryItem>, AppError> {
    let query = format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_item WHERE item_id = ANY($1) ORDER BY item_id FOR UPDATE"
    );

    sqlx::query_as::<_, InventoryItem>(&query)
        .bind(item_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock items: {}", e)))
}

/// Find a device by its normalized serial number, locking the row.
pub async fn fetch_item_by_serial_for_update(
    conn: &mut PgConnection,
    serial_number: &str,
) -> Result<Option<InventoryItem>, AppError> {
    let query =
        format!("SELECT {ITEM_COLUMNS} FROM inventory_item WHERE serial_number = $1 FOR UPDATE");

    sqlx::query_as::<_, InventoryItem>(&query)
        .bind(serial_number)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find item by serial: {}", e)))
}

/// Full history of an item, oldest first.
pub async fn item_history(
    conn: &mut PgConnection,
    item_id: Uuid,
) -> Result<Vec<LedgerEntry>, AppError> {
    let query = format!(
        "SELECT {LEDGER_COLUMNS} FROM inventory_ledger_entry WHERE item_id = $1 ORDER BY performed_utc, seq"
    );

    sqlx::query_as::<_, LedgerEntry>(&query)
        .bind(item_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get item history: {}", e)))
}

/// History of an item up to and including `last`, oldest first.
pub async fn history_through(
    conn: &mut PgConnection,
    last: &LedgerEntry,
) -> Result<Vec<LedgerEntry>, AppError> {
    let query = format!(
        r#"
        SELECT {LEDGER_COLUMNS} FROM inventory_ledger_entry
        WHERE item_id = $1 AND (performed_utc, seq) <= ($2, $3)
        ORDER BY performed_utc, seq
        "#
    );

    sqlx::query_as::<_, LedgerEntry>(&query)
        .bind(last.item_id)
        .bind(last.performed_utc)
        .bind(last.seq)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get item history: {}", e)))
}

/// The entry immediately preceding `entry` in the item's history, excluding `entry` itself.
pub async fn last_entry_before(
    conn: &mut PgConnection,
    entry: &LedgerEntry,
) -> Result<Option<LedgerEntry>, AppError> {
    let query = format!(
        r#"
        SELECT {LEDGER_COLUMNS} FROM inventory_ledger_entry
        WHERE item_id = $1 AND entry_id <> $2 AND (performed_utc, seq) < ($3, $4)
        ORDER BY performed_utc DESC, seq DESC
        LIMIT 1
        "#
    );

    sqlx::query_as::<_, LedgerEntry>(&query)
        .bind(entry.item_id)
        .bind(entry.entry_id)
        .bind(entry.performed_utc)
        .bind(entry.seq)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get prior entry: {}", e)))
}

/// Most recent entry of `action` that targeted `order_id`.
pub async fn last_entry_for_order(
    conn: &mut PgConnection,
    item_id: Uuid,
    action: LedgerAction,
    order_id: Uuid,
) -> Result<Option<LedgerEntry>, AppError> {
    let query = format!(
        r#"
        SELECT {LEDGER_COLUMNS} FROM inventory_ledger_entry
        WHERE item_id = $1 AND action = $2 AND target_order_id = $3
        ORDER BY performed_utc DESC, seq DESC
        LIMIT 1
        "#
    );

    sqlx::query_as::<_, LedgerEntry>(&query)
        .bind(item_id)
        .bind(action)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get order entry: {}", e)))
}

/// Count entries recorded after `entry` for the same item.
pub async fn entries_after(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<i64, AppError> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM inventory_ledger_entry
        WHERE item_id = $1 AND (performed_utc, seq) > ($2, $3)
        "#,
    )
    .bind(entry.item_id)
    .bind(entry.performed_utc)
    .bind(entry.seq)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count entries: {}", e)))
}

/// Remove one ledger entry that is being undone.
pub(crate) async fn delete_entry(conn: &mut PgConnection, entry_id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM inventory_ledger_entry WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete ledger entry: {}", e)))?;

    Ok(())
}

/// Hard-delete an item, its order links and its whole ledger.
pub(crate) async fn purge_item(conn: &mut PgConnection, item_id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM order_equipment_link WHERE item_id = $1")
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to unlink item: {}", e)))?;

    sqlx::query("DELETE FROM inventory_ledger_entry WHERE item_id = $1")
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to purge ledger: {}", e)))?;

    sqlx::query("DELETE FROM inventory_item WHERE item_id = $1")
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to purge item: {}", e)))?;

    Ok(())
}

/// Link an item to an order's equipment. Linking twice is a no-op.
pub(crate) async fn link_to_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    item_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO order_equipment_link (order_id, item_id)
        VALUES ($1, $2)
        ON CONFLICT (order_id, item_id) DO NOTHING
        "#,
    )
    .bind(order_id)
    .bind(item_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to link item: {}", e)))?;

    Ok(())
}

pub(crate) async fn unlink_from_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    item_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM order_equipment_link WHERE order_id = $1 AND item_id = $2")
        .bind(order_id)
        .bind(item_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to unlink item: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemState;

    #[test]
    fn item_columns_are_qualified_for_joins() {
        let columns = item_columns_for("i");
        assert!(columns.starts_with("i.item_id, i.kind"));
        assert!(columns.ends_with("i.updated_utc"));
        assert!(!columns.contains("i. "));
    }

    #[test]
    fn transition_builder_targets_order_only() {
        let by = Uuid::new_v4();
        let order = Uuid::new_v4();
        let transition = Transition::new(LedgerAction::AssignedToOrder, by).to_order(order);
        let previous = Custody {
            state: ItemState::Assigned,
            technician_id: Some(Uuid::new_v4()),
            location_id: None,
            order_id: None,
        };

        let custody = transition.custody_after(Some(&previous));
        assert_eq!(custody.state, ItemState::AssignedToOrder);
        assert_eq!(custody.technician_id, None);
        assert_eq!(custody.order_id, Some(order));
    }

    #[test]
    fn issue_transition_clears_warehouse_location() {
        let tech = Uuid::new_v4();
        let transition =
            Transition::new(LedgerAction::Issued, Uuid::new_v4()).to_technician(Some(tech));
        let previous = Custody {
            state: ItemState::Available,
            technician_id: None,
            location_id: Some(Uuid::new_v4()),
            order_id: None,
        };

        let custody = transition.custody_after(Some(&previous));
        assert_eq!(custody.state, ItemState::Assigned);
        assert_eq!(custody.technician_id, Some(tech));
        assert_eq!(custody.location_id, None);
    }
}
