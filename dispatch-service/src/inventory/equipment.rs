//! Equipment delta reconciler.
//!
//! Compares the devices currently installed on an order with the submitted
//! list, validates every addition up front, then unbinds removals through the
//! ledger rollback and binds additions.

use super::ledger::{self, Transition, ITEM_COLUMNS};
use super::rollback;
use crate::models::{DeviceCategory, InventoryItem, LedgerAction};
use crate::policy::CompletionMode;
use service_core::error::AppError;
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Items to unbind and bind, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquipmentDelta {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

impl EquipmentDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Set difference between the installed and the desired equipment.
///
/// Duplicates in `desired` are ignored.
pub fn compute_delta(previous: &[Uuid], desired: &[Uuid]) -> EquipmentDelta {
    let previous_set: HashSet<Uuid> = previous.iter().copied().collect();
    let desired_set: HashSet<Uuid> = desired.iter().copied().collect();

    let mut seen = HashSet::new();
    let added = desired
        .iter()
        .copied()
        .filter(|id| !previous_set.contains(id) && seen.insert(*id))
        .collect();
    let removed = previous
        .iter()
        .copied()
        .filter(|id| !desired_set.contains(id))
        .collect();

    EquipmentDelta { added, removed }
}

/// Why an item may not be bound to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRejection {
    NotDevice,
    BoundElsewhere { order_id: Uuid },
    NotInCustody,
}

/// Check whether `item` may be installed on `order_id` under `mode`.
///
/// `linked_order` is any other order still holding an equipment link to the
/// item; it rejects the binding whatever the item's state says.
pub fn check_binding(
    item: &InventoryItem,
    order_id: Uuid,
    linked_order: Option<Uuid>,
    mode: &CompletionMode,
) -> Result<(), BindingRejection> {
    if !item.is_device() {
        return Err(BindingRejection::NotDevice);
    }

    let bound_to = item
        .order_id
        .filter(|_| item.state.is_order_bound())
        .or(linked_order)
        .filter(|other| *other != order_id);
    if let Some(other) = bound_to {
        return Err(BindingRejection::BoundElsewhere { order_id: other });
    }

    let held_by_actor = mode
        .acting_technician()
        .is_some_and(|tech| item.technician_id == Some(tech));

    if mode.binds_any_item()
        || held_by_actor
        || item.state.is_order_bound()
        || item.category == Some(DeviceCategory::Other)
    {
        Ok(())
    } else {
        Err(BindingRejection::NotInCustody)
    }
}

/// Fold all rejections into the single error reported to the caller.
///
/// A non-device is a malformed request; anything else is a conflict with the
/// current inventory.
pub fn rejection_error(rejections: &[(&InventoryItem, BindingRejection)]) -> AppError {
    let describe = |filter: fn(&BindingRejection) -> bool| {
        rejections
            .iter()
            .filter(|(_, reason)| filter(reason))
            .map(|(item, reason)| match reason {
                BindingRejection::BoundElsewhere { order_id } => {
                    format!("{} (bound to order {})", item.item_id, order_id)
                }
                _ => format!(
                    "{} ({}, {})",
                    item.item_id,
                    item.state,
                    item.custodian_label()
                ),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    if rejections
        .iter()
        .any(|(_, reason)| *reason == BindingRejection::NotDevice)
    {
        return AppError::BadRequest(anyhow::anyhow!(
            "Only devices can be installed as equipment: {}",
            describe(|r| *r == BindingRejection::NotDevice)
        ));
    }

    AppError::Conflict(anyhow::anyhow!(
        "Items cannot be installed on this order: {}",
        describe(|_| true)
    ))
}

/// Summary of applied equipment changes.
#[derive(Debug, Clone, Default)]
pub struct EquipmentOutcome {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

/// Devices currently installed on the order, excluding collected ones.
pub async fn installed_equipment(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<Vec<Uuid>, AppError> {
    sqlx::query_scalar(
        r#"
        SELECT l.item_id
        FROM order_equipment_link l
        JOIN inventory_item i ON i.item_id = l.item_id
        WHERE l.order_id = $1 AND i.state <> 'COLLECTED_FROM_CLIENT'
        ORDER BY l.linked_utc, l.item_id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get equipment: {}", e)))
}

/// Other orders linked to any of `item_ids`, keyed by item.
async fn links_elsewhere(
    conn: &mut PgConnection,
    order_id: Uuid,
    item_ids: &[Uuid],
) -> Result<HashMap<Uuid, Uuid>, AppError> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT item_id, order_id
        FROM order_equipment_link
        WHERE item_id = ANY($1) AND order_id <> $2
        ORDER BY linked_utc
        "#,
    )
    .bind(item_ids)
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get equipment links: {}", e)))?;

    Ok(rows.into_iter().collect())
}

/// Apply the difference between installed and `desired` equipment.
#[instrument(skip(conn, mode, desired), fields(order_id = %order_id, mode = mode.label()))]
pub async fn reconcile_equipment(
    conn: &mut PgConnection,
    order_id: Uuid,
    mode: &CompletionMode,
    desired: &[Uuid],
) -> Result<EquipmentOutcome, AppError> {
    let previous = installed_equipment(conn, order_id).await?;
    let delta = compute_delta(&previous, desired);

    if delta.is_empty() {
        return Ok(EquipmentOutcome::default());
    }

    let candidates = if delta.added.is_empty() {
        Vec::new()
    } else {
        ledger::fetch_items_for_update(conn, &delta.added).await?
    };

    let missing: Vec<String> = delta
        .added
        .iter()
        .filter(|id| !candidates.iter().any(|item| item.item_id == **id))
        .map(Uuid::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Items not found: {}",
            missing.join(", ")
        )));
    }

    let linked = if candidates.is_empty() {
        HashMap::new()
    } else {
        links_elsewhere(conn, order_id, &delta.added).await?
    };

    let rejections: Vec<(&InventoryItem, BindingRejection)> = candidates
        .iter()
        .filter_map(|item| {
            check_binding(item, order_id, linked.get(&item.item_id).copied(), mode)
                .err()
                .map(|reason| (item, reason))
        })
        .collect();
    if !rejections.is_empty() {
        warn!(rejected = rejections.len(), "Equipment binding rejected");
        return Err(rejection_error(&rejections));
    }

    let editor = mode.editor_id();

    for item_id in &delta.removed {
        ledger::unlink_from_order(conn, order_id, *item_id).await?;
        unbind(conn, order_id, *item_id, editor).await?;
    }

    for item_id in &delta.added {
        let Some(item) = candidates.iter().find(|item| item.item_id == *item_id) else {
            continue;
        };
        ledger::link_to_order(conn, order_id, item.item_id).await?;
        let transition = Transition::new(LedgerAction::AssignedToOrder, editor).to_order(order_id);
        ledger::apply_transition(conn, item, &transition).await?;
    }

    info!(
        added = delta.added.len(),
        removed = delta.removed.len(),
        "Equipment reconciled"
    );

    Ok(EquipmentOutcome {
        added: delta.added,
        removed: delta.removed,
    })
}

async fn unbind(
    conn: &mut PgConnection,
    order_id: Uuid,
    item_id: Uuid,
    editor: Uuid,
) -> Result<(), AppError> {
    let query = format!("SELECT {ITEM_COLUMNS} FROM inventory_item WHERE item_id = $1 FOR UPDATE");
    let item = sqlx::query_as::<_, InventoryItem>(&query)
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to lock item: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Item {} not found", item_id)))?;

    match ledger::last_entry_for_order(conn, item_id, LedgerAction::AssignedToOrder, order_id)
        .await?
    {
        Some(binding) => {
            rollback::undo_entry(conn, &item, &binding, editor).await?;
        }
        None => {
            warn!(item_id = %item_id, "Installed item has no binding entry; left unchanged");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemKind, ItemState};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn device(state: ItemState) -> InventoryItem {
        InventoryItem {
            item_id: Uuid::new_v4(),
            kind: ItemKind::Device,
            category: Some(DeviceCategory::Router),
            name: "Router".to_string(),
            serial_number: None,
            material_id: None,
            quantity: 1,
            unit_price: Decimal::ZERO,
            state,
            technician_id: None,
            location_id: None,
            order_id: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn delta_keeps_submission_order_and_drops_duplicates() {
        let (d1, d2, d3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let delta = compute_delta(&[d1, d2], &[d3, d1, d3]);
        assert_eq!(delta.added, vec![d3]);
        assert_eq!(delta.removed, vec![d2]);
    }

    #[test]
    fn unchanged_list_is_empty_delta() {
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        assert!(compute_delta(&ids, &[ids[1], ids[0]]).is_empty());
    }

    #[test]
    fn technician_may_bind_own_device() {
        let tech = Uuid::new_v4();
        let mut item = device(ItemState::Assigned);
        item.technician_id = Some(tech);
        let mode = CompletionMode::Complete { technician_id: tech };

        assert_eq!(check_binding(&item, Uuid::new_v4(), None, &mode), Ok(()));
    }

    #[test]
    fn technician_may_not_bind_someone_elses_device() {
        let mut item = device(ItemState::Assigned);
        item.technician_id = Some(Uuid::new_v4());
        let mode = CompletionMode::Complete {
            technician_id: Uuid::new_v4(),
        };

        assert_eq!(
            check_binding(&item, Uuid::new_v4(), None, &mode),
            Err(BindingRejection::NotInCustody)
        );
    }

    #[test]
    fn other_category_is_bindable_by_anyone() {
        let mut item = device(ItemState::Available);
        item.category = Some(DeviceCategory::Other);
        let mode = CompletionMode::Complete {
            technician_id: Uuid::new_v4(),
        };

        assert_eq!(check_binding(&item, Uuid::new_v4(), None, &mode), Ok(()));
    }

    #[test]
    fn admin_cannot_steal_device_from_other_order() {
        let other = Uuid::new_v4();
        let mut item = device(ItemState::AssignedToOrder);
        item.order_id = Some(other);
        let mode = CompletionMode::Admin {
            editor_id: Uuid::new_v4(),
        };

        assert_eq!(
            check_binding(&item, Uuid::new_v4(), None, &mode),
            Err(BindingRejection::BoundElsewhere { order_id: other })
        );
    }

    #[test]
    fn collected_device_of_other_order_is_bound_elsewhere() {
        let tech = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut item = device(ItemState::CollectedFromClient);
        item.technician_id = Some(tech);
        item.order_id = Some(other);
        let mode = CompletionMode::Complete { technician_id: tech };

        assert_eq!(
            check_binding(&item, Uuid::new_v4(), None, &mode),
            Err(BindingRejection::BoundElsewhere { order_id: other })
        );
    }

    #[test]
    fn stale_link_rejects_whatever_the_state() {
        let tech = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut item = device(ItemState::Assigned);
        item.technician_id = Some(tech);
        let mode = CompletionMode::Complete { technician_id: tech };

        assert_eq!(
            check_binding(&item, Uuid::new_v4(), Some(other), &mode),
            Err(BindingRejection::BoundElsewhere { order_id: other })
        );
    }

    #[test]
    fn device_already_on_this_order_passes() {
        let order_id = Uuid::new_v4();
        let mut item = device(ItemState::CollectedFromClient);
        item.order_id = Some(order_id);
        let mode = CompletionMode::Admin {
            editor_id: Uuid::new_v4(),
        };

        assert_eq!(check_binding(&item, order_id, None, &mode), Ok(()));
    }

    #[test]
    fn materials_are_rejected_as_bad_request() {
        let mut item = device(ItemState::Available);
        item.kind = ItemKind::Material;
        let mode = CompletionMode::Admin {
            editor_id: Uuid::new_v4(),
        };

        let reason = check_binding(&item, Uuid::new_v4(), None, &mode).unwrap_err();
        let err = rejection_error(&[(&item, reason)]);
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn rejection_lists_every_item() {
        let a = device(ItemState::Available);
        let b = device(ItemState::Available);
        let err = rejection_error(&[
            (&a, BindingRejection::NotInCustody),
            (&b, BindingRejection::NotInCustody),
        ]);

        match err {
            AppError::Conflict(e) => {
                let message = e.to_string();
                assert!(message.contains(&a.item_id.to_string()));
                assert!(message.contains(&b.item_id.to_string()));
                assert!(message.contains("AVAILABLE"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
