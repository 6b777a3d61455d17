//! Technician material stock across completion edits.

mod common;

use common::{submission, TestApp};
use dispatch_service::inventory::{InventoryCatalog, UsedMaterial};
use dispatch_service::models::{OrderStatus, OrderType};
use dispatch_service::orders::{self, CompletionSubmission};
use rust_decimal::Decimal;
use serial_test::serial;
use uuid::Uuid;

fn using(material_id: Uuid, quantity: i32) -> CompletionSubmission {
    CompletionSubmission {
        used_materials: vec![UsedMaterial {
            material_id,
            quantity,
        }],
        ..submission(OrderStatus::Completed)
    }
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn usage_beyond_stock_commits_with_warning() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let cable = app
        .db
        .define_material("Drop cable", "m", Decimal::new(250, 2))
        .await
        .unwrap();
    let order = app
        .create_order("M-100", "Mariacka 1", OrderType::Service, Some(tech))
        .await;

    let outcome = orders::complete_order(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        tech,
        &using(cable.material_id, 3),
    )
    .await
    .expect("Deficit must not block completion");

    assert!(outcome.success);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("Drop cable"));
    assert_eq!(
        app.db.material_stock(tech, cable.material_id).await.unwrap(),
        -3
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn edits_move_stock_by_the_difference() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let cable = app
        .db
        .define_material("Patch cord", "pcs", Decimal::ZERO)
        .await
        .unwrap();
    let lot = app.receive_material(cable.material_id, 10).await;
    app.issue(lot.item_id, tech).await;
    assert_eq!(
        app.db.material_stock(tech, cable.material_id).await.unwrap(),
        10
    );

    let order = app
        .create_order("M-200", "Mariacka 2", OrderType::Service, Some(tech))
        .await;

    orders::complete_order(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        tech,
        &using(cable.material_id, 4),
    )
    .await
    .unwrap();
    assert_eq!(
        app.db.material_stock(tech, cable.material_id).await.unwrap(),
        6
    );

    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &using(cable.material_id, 1),
    )
    .await
    .unwrap();
    assert_eq!(
        app.db.material_stock(tech, cable.material_id).await.unwrap(),
        9
    );

    let outcome = orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &submission(OrderStatus::Completed),
    )
    .await
    .unwrap();
    assert!(outcome.warnings.is_empty());
    assert_eq!(
        app.db.material_stock(tech, cable.material_id).await.unwrap(),
        10
    );

    let detail = app
        .db
        .get_order_detail(order.order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(detail.materials.is_empty());

    app.cleanup().await;
}
