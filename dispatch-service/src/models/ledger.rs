//! Inventory ledger: the append-only history every item state is derived from.

use super::item::ItemState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

string_enum! {
    /// A single kind of custody transition.
    pub enum LedgerAction {
        Received => "RECEIVED",
        Issued => "ISSUED",
        AssignedToOrder => "ASSIGNED_TO_ORDER",
        CollectedFromClient => "COLLECTED_FROM_CLIENT",
        Returned => "RETURNED",
        ReturnedToTechnician => "RETURNED_TO_TECHNICIAN",
        ReturnedToOperator => "RETURNED_TO_OPERATOR",
        Transfer => "TRANSFER",
    }
}

/// Materialized custody of an item: its state plus whichever custodian holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Custody {
    pub state: ItemState,
    pub technician_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

impl Custody {
    fn new(state: ItemState) -> Self {
        Self {
            state,
            technician_id: None,
            location_id: None,
            order_id: None,
        }
    }
}

impl LedgerAction {
    /// Canonical custody produced by this action.
    ///
    /// `previous` only supplies a warehouse location when a warehouse-bound
    /// action does not name one.
    pub fn custody_after(
        &self,
        target_technician_id: Option<Uuid>,
        target_order_id: Option<Uuid>,
        target_location_id: Option<Uuid>,
        previous: Option<&Custody>,
    ) -> Custody {
        let prior_location = || target_location_id.or(previous.and_then(|c| c.location_id));

        match self {
            Self::Received => Custody {
                location_id: prior_location(),
                ..Custody::new(ItemState::Available)
            },
            Self::Issued => Custody {
                technician_id: target_technician_id,
                ..Custody::new(ItemState::Assigned)
            },
            Self::AssignedToOrder => Custody {
                order_id: target_order_id,
                ..Custody::new(ItemState::AssignedToOrder)
            },
            Self::CollectedFromClient => Custody {
                technician_id: target_technician_id,
                order_id: target_order_id,
                ..Custody::new(ItemState::CollectedFromClient)
            },
            Self::Returned => Custody {
                location_id: prior_location(),
                ..Custody::new(ItemState::Returned)
            },
            Self::ReturnedToTechnician => Custody {
                technician_id: target_technician_id,
                ..Custody::new(ItemState::ReturnedToTechnician)
            },
            Self::ReturnedToOperator => Custody::new(ItemState::ReturnedToOperator),
            Self::Transfer => Custody {
                technician_id: target_technician_id,
                location_id: target_location_id,
                ..Custody::new(ItemState::Transfer)
            },
        }
    }
}

/// One immutable ledger fact.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub seq: i64,
    pub item_id: Uuid,
    pub action: LedgerAction,
    pub performed_by: Uuid,
    pub performed_utc: DateTime<Utc>,
    pub target_technician_id: Option<Uuid>,
    pub target_order_id: Option<Uuid>,
    pub target_location_id: Option<Uuid>,
    pub quantity: Option<i32>,
    pub notes: Option<String>,
}

impl LedgerEntry {
    pub fn custody_after(&self, previous: Option<&Custody>) -> Custody {
        self.action.custody_after(
            self.target_technician_id,
            self.target_order_id,
            self.target_location_id,
            previous,
        )
    }
}

/// Fold an item's history (oldest first) into its custody.
///
/// Returns `None` for an empty history.
pub fn replay(entries: &[LedgerEntry]) -> Option<Custody> {
    entries
        .iter()
        .fold(None, |custody, entry| Some(entry.custody_after(custody.as_ref())))
}
