pub mod database;
pub mod metrics;

pub use database::{Database, OrderDetail, ProjectionReport, ServiceDetail};
