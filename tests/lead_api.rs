//! Contract tests for the lead intake service, run against a live server on
//! an ephemeral port.

use std::net::SocketAddr;

use serde_json::json;

use tavolo::config::LeadServerConfig;
use tavolo::lead_server;

async fn spawn_lead_server(config: LeadServerConfig) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = lead_server::serve_on(listener, config).await;
    });
    addr
}

fn test_config(dir: &tempfile::TempDir) -> LeadServerConfig {
    LeadServerConfig {
        bind_addr: String::new(),
        database_path: dir
            .path()
            .join("leads.db")
            .to_str()
            .unwrap()
            .to_string(),
        automation_webhook_url: None,
        crm_webhook_url: None,
    }
}

fn complete_payload() -> serde_json::Value {
    json!({
        "firstName": "Priya",
        "lastName": "Nair",
        "email": "priya@example.com",
        "phone": "+1-555-0142",
        "restaurantName": "Saffron House",
        "restaurantType": "fine dining",
        "numBranches": "2",
        "menuSize": "60+",
        "state": "NY",
        "utmSource": "instagram"
    })
}

#[tokio::test]
async fn valid_submission_returns_id() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_lead_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/leads", addr))
        .json(&complete_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let first_id = body["data"]["id"].as_i64().unwrap();
    assert!(first_id >= 1);

    // A second submission gets a fresh id.
    let response = client
        .post(format!("http://{}/api/leads", addr))
        .json(&complete_payload())
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["data"]["id"].as_i64().unwrap() > first_id);
}

#[tokio::test]
async fn missing_required_fields_return_400() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_lead_server(test_config(&dir)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/leads", addr))
        .json(&json!({ "firstName": "Priya", "email": "priya@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("Missing required fields: "));
    assert!(error.contains("lastName"));
    assert!(error.contains("phone"));
    assert!(!error.contains("firstName"));
}

#[tokio::test]
async fn dead_webhooks_do_not_fail_the_submission() {
    let dir = tempfile::tempdir().unwrap();

    // Point both webhooks at a port that actively refuses connections.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let config = LeadServerConfig {
        automation_webhook_url: Some(format!("http://{}/automation", dead)),
        crm_webhook_url: Some(format!("http://{}/crm", dead)),
        ..test_config(&dir)
    };
    let addr = spawn_lead_server(config).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/leads", addr))
        .json(&complete_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn health_endpoint_answers() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_lead_server(test_config(&dir)).await;

    let response = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
}
