//! Order workflows: creation and the attempt chain, assignment, completion
//! and bulk import.

pub mod attempts;
pub mod completion;
pub mod import;
pub mod lifecycle;
mod service_records;
pub(crate) mod store;
pub mod submission;

pub use completion::{
    admin_edit_completion, amend_completion, complete_order, submit_completion, CompletionOutcome,
};
pub use import::{import_orders, ImportSummary};
pub use lifecycle::{assign_order, create_order, update_order, NewOrder, OrderUpdate};
pub use submission::{CompletionSubmission, ServiceDevice, ServiceRecord, WorkCode};
