//! Inventory engine: the ledger, the item state machine and the reconcilers
//! that move items in and out of orders.
//!
//! Everything here runs on a borrowed `PgConnection` so callers decide the
//! transaction boundary.

pub mod catalog;
pub mod collected;
pub mod equipment;
pub mod intake;
pub mod ledger;
pub mod materials;
pub mod rollback;

pub use catalog::{DeviceCategoryResolver, InventoryCatalog};
pub use collected::{normalize_serial, CollectedDevice};
pub use intake::ReceiveItem;
pub use ledger::Transition;
pub use materials::UsedMaterial;
