#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use sha2::Sha256;
use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use tower::ServiceExt;
use webhook_intake::{
    billing::{BillingError, BillingService},
    config::IntakeConfig,
    dispatch::{self, DispatchJob},
    router,
    signature::StripeEvent,
    state::AppState,
};

const SECRET: &str = "whsec_test123secret456";

type HmacSha256 = Hmac<Sha256>;

struct TestDb {
    pool: SqlitePool,
    _db_file: NamedTempFile,
}

async fn setup_db() -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_millis(500));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite for migrations");
    run_migrations(&mut conn).await.expect("run migrations");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("connect sqlite");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

async fn run_migrations(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .map_err(sqlx::Error::Io)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).map_err(sqlx::Error::Io)?;
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&mut *conn).await?;
            }
        }
    }
    Ok(())
}

/// Billing double that records every call.
#[derive(Default)]
struct RecordingBilling {
    calls: Mutex<Vec<String>>,
}

impl RecordingBilling {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl BillingService for RecordingBilling {
    async fn activate_subscription(
        &self,
        company_id: &str,
        plan: &str,
    ) -> Result<(), BillingError> {
        self.record(format!("activate:{company_id}:{plan}"));
        Ok(())
    }

    async fn record_payment_success(&self, subscription_id: &str) -> Result<(), BillingError> {
        self.record(format!("payment_success:{subscription_id}"));
        Ok(())
    }

    async fn record_payment_failure(
        &self,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> Result<(), BillingError> {
        self.record(format!(
            "payment_failure:{subscription_id}:{}",
            reason.unwrap_or("-")
        ));
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), BillingError> {
        self.record(format!("cancel:{subscription_id}"));
        Ok(())
    }
}

fn build_app(pool: SqlitePool, billing: Arc<RecordingBilling>) -> Router {
    let config = IntakeConfig {
        webhook_secret: SECRET.to_string(),
        ..IntakeConfig::default()
    };
    let (queue, worker) = dispatch::channel(16, pool.clone(), billing);
    tokio::spawn(worker.run());

    router(AppState {
        pool,
        config,
        queue,
    })
}

fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn signature_header(payload: &str, secret: &str) -> String {
    let ts = Utc::now().timestamp();
    format!("t={ts},v1={}", sign(payload, secret, ts))
}

async fn post_webhook(app: &Router, payload: &str, header: &str) -> axum::response::Response {
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("stripe-signature", header)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build request");

    app.clone().oneshot(request).await.expect("send request")
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

#[derive(sqlx::FromRow)]
struct EventRow {
    status: String,
    processing_attempts: i64,
    processed_at: Option<String>,
    metadata: Option<String>,
    error_message: Option<String>,
}

async fn fetch_event(pool: &SqlitePool, event_id: &str) -> Option<EventRow> {
    sqlx::query_as::<_, EventRow>(
        r#"
        SELECT status, processing_attempts, processed_at, metadata, error_message
        FROM webhook_events
        WHERE event_id = ?
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await
    .expect("fetch event")
}

// The worker runs on its own task, so terminal status lands shortly after
// the ack. Poll rather than sleep a fixed amount.
async fn wait_for_terminal(pool: &SqlitePool, event_id: &str) -> EventRow {
    for _ in 0..200 {
        if let Some(row) = fetch_event(pool, event_id).await
            && row.status != "processing"
        {
            return row;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("event {event_id} never reached a terminal status");
}

fn checkout_payload(event_id: &str) -> String {
    serde_json::json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_1",
                "metadata": { "company_id": "acme", "plan": "pro" }
            }
        }
    })
    .to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Happy path and idempotent replay
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_event_is_acked_then_processed() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = checkout_payload("evt_1");
    let response = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["event_id"], "evt_1");
    assert!(
        body.get("processed").is_none(),
        "admission ack carries no processed field"
    );

    let row = wait_for_terminal(&db.pool, "evt_1").await;
    assert_eq!(row.status, "completed");
    assert_eq!(row.processing_attempts, 1);
    assert!(row.processed_at.is_some());
    assert!(row.metadata.expect("metadata").contains("subscription_activated"));
    assert_eq!(billing.calls(), vec!["activate:acme:pro".to_string()]);
}

#[tokio::test]
async fn replay_after_completion_skips_handler() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = checkout_payload("evt_1");
    let first = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;
    assert_eq!(first.status(), StatusCode::OK);
    let completed = wait_for_terminal(&db.pool, "evt_1").await;
    let first_processed_at = completed.processed_at.expect("processed_at set");

    let second = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;
    assert_eq!(second.status(), StatusCode::OK);
    let body = response_json(second).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["processed"], false);
    assert_eq!(body["event_id"], "evt_1");

    let row = fetch_event(&db.pool, "evt_1").await.expect("row exists");
    assert_eq!(row.status, "completed");
    assert_eq!(row.processed_at.as_deref(), Some(first_processed_at.as_str()));
    assert_eq!(
        billing.calls().len(),
        1,
        "handler must not run again on replay"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Signature rejection happens before the ledger
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_signature_rejected_without_ledger_row() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = checkout_payload("evt_forged");
    let response = post_webhook(&app, &payload, &signature_header(&payload, "wrong_secret")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(fetch_event(&db.pool, "evt_forged").await.is_none());
    assert!(billing.calls().is_empty());
}

#[tokio::test]
async fn missing_signature_header_rejected() {
    let db = setup_db().await;
    let app = build_app(db.pool.clone(), Arc::new(RecordingBilling::default()));

    let payload = checkout_payload("evt_1");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .expect("build request");

    let response = app.clone().oneshot(request).await.expect("send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(fetch_event(&db.pool, "evt_1").await.is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_event_type_completes_as_unhandled() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = serde_json::json!({
        "id": "evt_odd",
        "type": "product.created",
        "data": { "object": {} }
    })
    .to_string();
    let response = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let row = wait_for_terminal(&db.pool, "evt_odd").await;
    assert_eq!(row.status, "completed", "unknown types complete, not fail");
    let metadata = row.metadata.expect("metadata");
    assert!(metadata.contains("\"unhandled\":true"));
    assert!(metadata.contains("product.created"));
    assert!(billing.calls().is_empty());
}

#[tokio::test]
async fn malformed_checkout_payload_marks_failed() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = serde_json::json!({
        "id": "evt_bad",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_1" } }
    })
    .to_string();
    let response = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;
    assert_eq!(response.status(), StatusCode::OK, "intake still acks");

    let row = wait_for_terminal(&db.pool, "evt_bad").await;
    assert_eq!(row.status, "failed");
    assert!(row.error_message.expect("error recorded").contains("company_id"));
    assert!(billing.calls().is_empty());
}

#[tokio::test]
async fn payment_failure_event_reaches_billing() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let app = build_app(db.pool.clone(), billing.clone());

    let payload = serde_json::json!({
        "id": "evt_pf",
        "type": "invoice.payment_failed",
        "data": {
            "object": {
                "subscription": "sub_42",
                "last_payment_error": { "message": "card_declined" }
            }
        }
    })
    .to_string();
    let response = post_webhook(&app, &payload, &signature_header(&payload, SECRET)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let row = wait_for_terminal(&db.pool, "evt_pf").await;
    assert_eq!(row.status, "completed");
    assert_eq!(
        billing.calls(),
        vec!["payment_failure:sub_42:card_declined".to_string()]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown drains the queue
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn worker_drains_buffered_jobs_before_exiting() {
    let db = setup_db().await;
    let billing = Arc::new(RecordingBilling::default());
    let (queue, worker) = dispatch::channel(8, db.pool.clone(), billing.clone());

    for i in 0..3 {
        let event_id = format!("evt_drain_{i}");
        let decision = webhook_intake::ledger::should_process(
            &db.pool,
            300,
            &webhook_intake::ledger::NewLedgerEvent {
                event_id: &event_id,
                event_type: "customer.subscription.deleted",
                provider: "stripe",
                payload: "{}",
            },
        )
        .await
        .expect("gate check");
        assert!(matches!(
            decision,
            webhook_intake::ledger::GateDecision::Admitted { .. }
        ));

        queue
            .enqueue(DispatchJob {
                event_id: event_id.clone(),
                event: StripeEvent {
                    id: event_id,
                    event_type: "customer.subscription.deleted".to_string(),
                    data: serde_json::json!({ "object": { "id": format!("sub_{i}") } }),
                },
            })
            .await
            .expect("enqueue");
    }

    // Dropping the last sender closes the channel; run() must finish the
    // buffered jobs before returning.
    drop(queue);
    worker.run().await;

    for i in 0..3 {
        let row = fetch_event(&db.pool, &format!("evt_drain_{i}"))
            .await
            .expect("row exists");
        assert_eq!(row.status, "completed");
    }
    assert_eq!(billing.calls().len(), 3);
}
