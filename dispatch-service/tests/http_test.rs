//! HTTP surface: health, identity headers and order routes.

mod common;

use common::TestApp;
use reqwest::{Client, StatusCode};
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

fn as_role(request: reqwest::RequestBuilder, user_id: Uuid, role: &str) -> reqwest::RequestBuilder {
    request
        .header("X-User-ID", user_id.to_string())
        .header("X-User-Role", role)
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn health_check_works() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "dispatch-service");

    let response = client
        .get(format!("{}/metrics", app.http_address))
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn requests_without_identity_are_unauthorized() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/orders/{}", app.http_address, Uuid::new_v4()))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
#[serial]
async fn order_lifecycle_over_http() {
    let app = TestApp::spawn().await;
    let client = Client::new();
    let coordinator = Uuid::new_v4();
    let tech = Uuid::new_v4();

    let new_order = json!({
        "order_number": "H-100",
        "city": "Gdynia",
        "street": "Świętojańska 5",
        "order_type": "SERVICE",
        "technician_id": tech,
    });

    // Technicians do not create orders.
    let response = as_role(
        client.post(format!("{}/orders", app.http_address)),
        tech,
        "technician",
    )
    .json(&new_order)
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = as_role(
        client.post(format!("{}/orders", app.http_address)),
        coordinator,
        "coordinator",
    )
    .json(&new_order)
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = response.json().await.unwrap();
    assert_eq!(created["status"], "ASSIGNED");
    assert_eq!(created["attempt_number"], 1);
    let order_id = created["id"].as_str().unwrap().to_string();

    let response = as_role(
        client.post(format!("{}/orders/{}/completion", app.http_address, order_id)),
        tech,
        "technician",
    )
    .json(&json!({ "status": "COMPLETED", "notes": "Line restored" }))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: serde_json::Value = response.json().await.unwrap();
    assert_eq!(outcome["success"], true);

    let response = as_role(
        client.get(format!("{}/orders/{}", app.http_address, order_id)),
        coordinator,
        "coordinator",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail: serde_json::Value = response.json().await.unwrap();
    assert_eq!(detail["order"]["status"], "COMPLETED");
    assert_eq!(detail["history"].as_array().unwrap().len(), 2);

    let response = as_role(
        client.get(format!("{}/orders/{}", app.http_address, Uuid::new_v4())),
        coordinator,
        "coordinator",
    )
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await;
}
