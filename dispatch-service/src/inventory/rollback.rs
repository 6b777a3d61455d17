//! Undo of a single ledger entry by replaying what came before it.

use super::ledger::{self, Transition};
use crate::models::{replay, Custody, InventoryItem, ItemState, LedgerAction, LedgerEntry};
use crate::services::metrics::ITEM_ROLLBACKS_TOTAL;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What has to happen to an item once an entry is undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restoration {
    /// No history remains; the item only existed for the undone entry.
    Purge,
    /// The remaining ledger already yields the restored custody.
    Restore(Custody),
    /// The restored state differs from the replay, so a normalizing entry is
    /// appended to keep the projection reproducible.
    Normalize {
        action: LedgerAction,
        technician_id: Option<Uuid>,
        location_id: Option<Uuid>,
    },
}

/// Result of undoing one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Purged,
    Restored(ItemState),
}

/// Decide how to restore an item from the history that remains before the
/// undone entry (oldest first).
pub fn plan_restoration(remaining: &[LedgerEntry]) -> Restoration {
    let (Some(prior), Some(replayed)) = (remaining.last(), replay(remaining)) else {
        return Restoration::Purge;
    };

    let restored_state = match prior.action {
        LedgerAction::ReturnedToTechnician | LedgerAction::Transfer | LedgerAction::Issued => {
            ItemState::Assigned
        }
        LedgerAction::Returned | LedgerAction::ReturnedToOperator | LedgerAction::Received => {
            ItemState::Available
        }
        LedgerAction::AssignedToOrder | LedgerAction::CollectedFromClient => {
            return Restoration::Restore(replayed);
        }
    };

    if replayed.state == restored_state {
        return Restoration::Restore(replayed);
    }

    match restored_state {
        ItemState::Assigned => Restoration::Normalize {
            action: LedgerAction::Issued,
            technician_id: replayed.technician_id.or(prior.target_technician_id),
            location_id: None,
        },
        _ => Restoration::Normalize {
            action: LedgerAction::Received,
            technician_id: None,
            location_id: replayed.location_id.or_else(|| last_known_location(remaining)),
        },
    }
}

fn last_known_location(entries: &[LedgerEntry]) -> Option<Uuid> {
    entries.iter().rev().find_map(|entry| entry.target_location_id)
}

/// Delete `undone` and put `item` back where its remaining ledger says it was.
#[instrument(skip(conn, item, undone), fields(item_id = %item.item_id, entry_id = %undone.entry_id))]
pub async fn undo_entry(
    conn: &mut PgConnection,
    item: &InventoryItem,
    undone: &LedgerEntry,
    performed_by: Uuid,
) -> Result<RollbackOutcome, AppError> {
    let later = ledger::entries_after(conn, undone).await?;
    if later > 0 {
        warn!(
            later_entries = later,
            action = %undone.action,
            "Undoing an entry that is not the latest for this item"
        );
    }

    let remaining = match ledger::last_entry_before(conn, undone).await? {
        Some(prior) => ledger::history_through(conn, &prior).await?,
        None => Vec::new(),
    };

    ledger::delete_entry(conn, undone.entry_id).await?;

    let outcome = match plan_restoration(&remaining) {
        Restoration::Purge => {
            ledger::purge_item(conn, item.item_id).await?;
            ITEM_ROLLBACKS_TOTAL.with_label_values(&["purged"]).inc();
            info!("Item had no prior history and was purged");
            RollbackOutcome::Purged
        }
        Restoration::Restore(custody) => {
            ledger::set_custody(conn, item.item_id, &custody).await?;
            ITEM_ROLLBACKS_TOTAL.with_label_values(&["restored"]).inc();
            info!(state = %custody.state, "Item restored from ledger");
            RollbackOutcome::Restored(custody.state)
        }
        Restoration::Normalize {
            action,
            technician_id,
            location_id,
        } => {
            let transition = Transition::new(action, performed_by)
                .to_technician(technician_id)
                .to_location(location_id)
                .with_notes(format!("Restored after undoing {}", undone.action));
            ledger::apply_transition(conn, item, &transition).await?;
            ITEM_ROLLBACKS_TOTAL.with_label_values(&["normalized"]).inc();

            let state = transition_state(action);
            info!(state = %state, "Item restored with normalizing entry");
            RollbackOutcome::Restored(state)
        }
    };

    Ok(outcome)
}

fn transition_state(action: LedgerAction) -> ItemState {
    action.custody_after(None, None, None, None).state
}
