pub mod items;
pub mod orders;

pub use items::{DefineMaterialRequest, IssueItemRequest, ItemResponse};
pub use orders::{AssignOrderRequest, ImportOrdersRequest, OrderResponse};
