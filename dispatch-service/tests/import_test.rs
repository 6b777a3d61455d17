//! Bulk order import.

mod common;

use common::TestApp;
use dispatch_service::models::OrderType;
use dispatch_service::orders::{self, NewOrder};
use dispatch_service::policy::NoopGeocoder;
use serial_test::serial;

fn row(order_number: &str, street: &str) -> NewOrder {
    NewOrder {
        order_number: order_number.to_string(),
        city: "Sopot".to_string(),
        street: street.to_string(),
        order_type: OrderType::Outage,
        technician_id: None,
        notes: None,
    }
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn import_skips_duplicates_and_reports_failures() {
    let app = TestApp::spawn().await;

    let rows = vec![
        row("I-100", "Monte Cassino 1"),
        row("I-101", "Monte Cassino 2"),
        row("I-100", "Monte Cassino 1"),
        row("", "Monte Cassino 3"),
    ];

    let summary = orders::import_orders(&app.db, &NoopGeocoder, &rows, common::admin_id()).await;

    assert_eq!(summary.created, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(summary.errors[0].row, 3);
    assert_eq!(summary.errors[0].order_number, "I-100");
    assert_eq!(summary.errors[1].row, 4);

    app.cleanup().await;
}
