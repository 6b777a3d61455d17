//! Collected-device synchronization on completion edits.

mod common;

use common::{installation, TestApp};
use dispatch_service::inventory::{ledger, CollectedDevice, InventoryCatalog, Transition};
use dispatch_service::models::{DeviceCategory, ItemState, LedgerAction, OrderType};
use dispatch_service::orders;
use serial_test::serial;
use uuid::Uuid;

fn collected(serial: &str) -> CollectedDevice {
    CollectedDevice {
        name: "Legacy modem".to_string(),
        category: DeviceCategory::Modem,
        serial_number: Some(serial.to_string()),
    }
}

fn unlabelled(name: &str) -> CollectedDevice {
    CollectedDevice {
        name: name.to_string(),
        category: DeviceCategory::Decoder,
        serial_number: None,
    }
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn retracting_a_first_seen_device_purges_it() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let order = app
        .create_order("C-100", "Ogarna 10", OrderType::Installation, Some(tech))
        .await;

    let mut submission = installation(Vec::new());
    submission.collected_devices = vec![collected(" cm-100 ")];
    orders::complete_order(&app.db, &InventoryCatalog, order.order_id, tech, &submission)
        .await
        .expect("Completion should succeed");

    let item = app
        .db
        .get_item_by_serial("CM-100")
        .await
        .unwrap()
        .expect("Collected device should be recorded under its normalized serial");
    assert_eq!(item.state, ItemState::CollectedFromClient);
    assert_eq!(item.technician_id, Some(tech));

    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &installation(Vec::new()),
    )
    .await
    .expect("Admin edit should succeed");

    assert!(app.db.get_item(item.item_id).await.unwrap().is_none());
    assert!(app.db.item_history(item.item_id).await.unwrap().is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn retracting_a_known_device_restores_its_custody() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let known = app.receive_device("Returned ONT", "CM-200").await;
    let order = app
        .create_order("C-200", "Ogarna 20", OrderType::Installation, Some(tech))
        .await;

    let mut submission = installation(Vec::new());
    submission.collected_devices = vec![collected("cm-200")];
    orders::complete_order(&app.db, &InventoryCatalog, order.order_id, tech, &submission)
        .await
        .unwrap();

    let item = app.item(known.item_id).await;
    assert_eq!(item.state, ItemState::CollectedFromClient);
    assert_eq!(item.order_id, Some(order.order_id));

    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &installation(Vec::new()),
    )
    .await
    .unwrap();

    let item = app.item(known.item_id).await;
    assert_eq!(item.state, ItemState::Available);
    assert_eq!(item.location_id, Some(common::warehouse_id()));
    assert_eq!(item.technician_id, None);
    assert_eq!(item.order_id, None);

    let report = app.db.verify_projection(known.item_id).await.unwrap();
    assert!(report.consistent);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn resubmitting_the_same_serial_keeps_the_device() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let order = app
        .create_order("C-300", "Ogarna 30", OrderType::Installation, Some(tech))
        .await;

    let mut submission = installation(Vec::new());
    submission.collected_devices = vec![collected("CM-300")];
    orders::complete_order(&app.db, &InventoryCatalog, order.order_id, tech, &submission)
        .await
        .unwrap();
    let first = app.db.get_item_by_serial("CM-300").await.unwrap().unwrap();

    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &submission,
    )
    .await
    .unwrap();
    let second = app.db.get_item_by_serial("CM-300").await.unwrap().unwrap();

    assert_eq!(first.item_id, second.item_id);
    assert_eq!(app.db.item_history(first.item_id).await.unwrap().len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn serial_less_devices_are_swapped_on_edit() {
    let app = TestApp::spawn().await;
    let tech = Uuid::new_v4();
    let order = app
        .create_order("C-400", "Ogarna 40", OrderType::Installation, Some(tech))
        .await;

    let mut submission = installation(Vec::new());
    submission.collected_devices = vec![unlabelled("Old decoder"), unlabelled("Old remote hub")];
    orders::complete_order(&app.db, &InventoryCatalog, order.order_id, tech, &submission)
        .await
        .unwrap();

    let before = app.db.get_order_detail(order.order_id).await.unwrap().unwrap();
    assert_eq!(before.collected_devices.len(), 2);

    submission.collected_devices = vec![unlabelled("Decoder HD"), unlabelled("Decoder 4K")];
    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &submission,
    )
    .await
    .unwrap();

    for old in &before.collected_devices {
        assert!(app.db.get_item(old.item_id).await.unwrap().is_none());
    }

    let after = app.db.get_order_detail(order.order_id).await.unwrap().unwrap();
    assert_eq!(after.collected_devices.len(), 2);
    for item in &after.collected_devices {
        assert!(before.collected_devices.iter().all(|old| old.item_id != item.item_id));
        assert_eq!(item.state, ItemState::CollectedFromClient);
        assert_eq!(item.technician_id, Some(tech));
        let report = app.db.verify_projection(item.item_id).await.unwrap();
        assert!(report.consistent);
    }

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn retracting_a_transferred_device_returns_it_to_the_receiver() {
    let app = TestApp::spawn().await;
    let giver = Uuid::new_v4();
    let receiver = Uuid::new_v4();
    let issued = app.issue(app.receive_device("Spare modem", "CM-500").await.item_id, giver).await;

    let mut tx = app.db.begin().await.unwrap();
    ledger::apply_transition(
        &mut tx,
        &issued,
        &Transition::new(LedgerAction::Transfer, common::admin_id()).to_technician(Some(receiver)),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(app.item(issued.item_id).await.technician_id, Some(receiver));

    let order = app
        .create_order("C-500", "Ogarna 50", OrderType::Installation, Some(receiver))
        .await;
    let mut submission = installation(Vec::new());
    submission.collected_devices = vec![collected("CM-500")];
    orders::complete_order(&app.db, &InventoryCatalog, order.order_id, receiver, &submission)
        .await
        .unwrap();
    assert_eq!(app.item(issued.item_id).await.state, ItemState::CollectedFromClient);

    orders::admin_edit_completion(
        &app.db,
        &InventoryCatalog,
        order.order_id,
        common::admin_id(),
        &installation(Vec::new()),
    )
    .await
    .unwrap();

    let item = app.item(issued.item_id).await;
    assert_eq!(item.state, ItemState::Assigned);
    assert_eq!(item.technician_id, Some(receiver));
    assert_eq!(item.order_id, None);

    let report = app.db.verify_projection(issued.item_id).await.unwrap();
    assert!(report.consistent);

    app.cleanup().await;
}
