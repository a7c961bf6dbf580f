//! Lead intake HTTP service.
//!
//! One write endpoint: `POST /api/leads` validates the payload, persists it,
//! then forwards the stored record to the configured webhooks without letting
//! either forward affect the response.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::json;

use crate::config::LeadServerConfig;
use crate::leads::{spawn_webhook_forwards, LeadSubmission, StoredLead};

/// SQLite-backed lead store.
pub struct LeadStore {
    conn: Mutex<Connection>,
}

impl LeadStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open lead database at {}", path))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                submitted_at TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                restaurant_name TEXT NOT NULL,
                restaurant_type TEXT NOT NULL,
                num_branches TEXT NOT NULL,
                menu_size TEXT NOT NULL,
                state TEXT NOT NULL,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                referrer TEXT,
                landing_page TEXT
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, lead: &LeadSubmission, submitted_at: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO leads (
                submitted_at, first_name, last_name, email, phone,
                restaurant_name, restaurant_type, num_branches, menu_size, state,
                utm_source, utm_medium, utm_campaign, referrer, landing_page
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                submitted_at,
                lead.first_name,
                lead.last_name,
                lead.email,
                lead.phone,
                lead.restaurant_name,
                lead.restaurant_type,
                lead.num_branches,
                lead.menu_size,
                lead.state,
                lead.utm_source,
                lead.utm_medium,
                lead.utm_campaign,
                lead.referrer,
                lead.landing_page,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count(&self) -> anyhow::Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
        Ok(count)
    }
}

struct AppState {
    store: LeadStore,
    config: LeadServerConfig,
    http: reqwest::Client,
}

pub fn router(config: LeadServerConfig) -> anyhow::Result<Router> {
    let store = LeadStore::open(&config.database_path)?;
    let state = Arc::new(AppState {
        store,
        config,
        http: reqwest::Client::new(),
    });
    Ok(Router::new()
        .route("/api/leads", post(submit_lead))
        .route("/api/health", get(health))
        .with_state(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn submit_lead(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    let lead: LeadSubmission = match serde_json::from_value(body) {
        Ok(lead) => lead,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid payload: {}", e) })),
            );
        }
    };

    if let Err(message) = lead.validate() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": message })));
    }

    let submitted_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let id = match state.store.insert(&lead, &submitted_at) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!("Failed to persist lead: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to save lead" })),
            );
        }
    };

    tracing::info!("Lead {} stored for {}", id, lead.restaurant_name);

    spawn_webhook_forwards(
        state.http.clone(),
        &state.config,
        StoredLead {
            id,
            submitted_at,
            lead,
        },
    );

    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": { "id": id } })),
    )
}

/// Bind and serve the lead API until the process exits.
pub async fn serve(config: LeadServerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Lead intake listening on http://{}", config.bind_addr);
    serve_on(listener, config).await
}

/// Serve on an already-bound listener. Tests use this with an ephemeral port.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    config: LeadServerConfig,
) -> anyhow::Result<()> {
    let app = router(config)?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lead() -> LeadSubmission {
        serde_json::from_value(serde_json::json!({
            "firstName": "Omar",
            "lastName": "Haddad",
            "email": "omar@example.com",
            "phone": "+1-555-0199",
            "restaurantName": "Cedar Grill",
            "restaurantType": "fast casual",
            "numBranches": "1",
            "menuSize": "20-40",
            "state": "TX"
        }))
        .unwrap()
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads.db");
        let store = LeadStore::open(path.to_str().unwrap()).unwrap();

        let first = store.insert(&sample_lead(), "2026-08-23 09:00:00").unwrap();
        let second = store.insert(&sample_lead(), "2026-08-23 09:01:00").unwrap();
        assert!(second > first);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn attribution_columns_accept_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads.db");
        let store = LeadStore::open(path.to_str().unwrap()).unwrap();

        let lead = sample_lead();
        assert!(lead.utm_source.is_none());
        store.insert(&lead, "2026-08-23 09:00:00").unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
