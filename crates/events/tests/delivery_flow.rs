//! End-to-end delivery scenarios: bus → dispatcher → attempt → audit row →
//! retry worker, against real Postgres and an ephemeral mock endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use relay_core::signing;
use relay_core::types::DbId;
use relay_db::models::WebhookDelivery;
use relay_db::repositories::{DeliveryRepo, WebhookRepo};
use relay_events::bus::EventHandler;
use relay_events::{
    DeliverySender, Dispatcher, EventBus, MemoryBus, RetryConfig, RetryWorker, WebhookEvent,
};

// ---------------------------------------------------------------------------
// Mock endpoint
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Capture {
    requests: Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    capture: Capture,
}

async fn hook(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    state
        .capture
        .requests
        .lock()
        .unwrap()
        .push((headers, body.to_vec()));
    state.status
}

/// Spawn an ephemeral endpoint answering every POST with `status`.
async fn spawn_endpoint(status: StatusCode) -> (String, Capture) {
    let capture = Capture::default();
    let app = Router::new().route("/hook", post(hook)).with_state(MockState {
        status,
        capture: capture.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), capture)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    dispatcher: Arc<Dispatcher>,
    worker: RetryWorker,
}

fn build_harness(pool: &PgPool) -> Harness {
    let sender = Arc::new(DeliverySender::new());
    let limiter = Arc::new(Semaphore::new(16));
    Harness {
        dispatcher: Arc::new(Dispatcher::new(pool.clone(), sender.clone(), limiter.clone())),
        worker: RetryWorker::new(pool.clone(), sender, limiter, RetryConfig::default()),
    }
}

async fn seed_registration(pool: &PgPool, url: &str, secret: &str) -> DbId {
    WebhookRepo::create(pool, 1, url, secret, &serde_json::json!(["activity.created"]))
        .await
        .unwrap()
        .id
}

/// Poll until the webhook's single delivery row reports `status`.
async fn wait_for_status(pool: &PgPool, webhook_id: DbId, status: &str) -> WebhookDelivery {
    for _ in 0..200 {
        let rows = DeliveryRepo::list_for_webhook(pool, webhook_id, 10, 0)
            .await
            .unwrap();
        if let Some(row) = rows.iter().find(|r| r.status == status) {
            return row.clone();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("delivery for webhook {webhook_id} never reached status {status}");
}

/// Pull the row's retry time into the past so the next poll picks it up.
async fn force_due(pool: &PgPool, delivery_id: DbId) {
    sqlx::query(
        "UPDATE webhook_deliveries SET next_retry_at = NOW() - INTERVAL '1 second' WHERE id = $1",
    )
    .bind(delivery_id)
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario A: happy path
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn successful_delivery_reaches_succeeded_in_one_attempt(pool: PgPool) {
    let (url, capture) = spawn_endpoint(StatusCode::OK).await;
    let webhook_id = seed_registration(&pool, &url, "s3cret").await;
    let harness = build_harness(&pool);

    let cancel = CancellationToken::new();
    let bus = MemoryBus::new(16, cancel.clone());
    bus.subscribe(harness.dispatcher.clone()).await.unwrap();

    let event = WebhookEvent::new("activity.created", 1)
        .with_payload(serde_json::json!({"activity_id": 5}));
    bus.publish(&event).await.unwrap();

    let row = wait_for_status(&pool, webhook_id, "succeeded").await;
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.last_http_status, Some(200));
    assert!(row.last_error.is_none());
    assert!(row.next_retry_at.is_none());

    // Exactly one request, carrying the signed protocol headers.
    let requests = capture.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers["x-webhook-event"], "activity.created");
    let signature = headers["x-webhook-signature"].to_str().unwrap();
    assert!(
        signing::verify_signature("s3cret", body, signature),
        "receiver-side HMAC verification must pass"
    );
    let delivered: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(delivered["event_type"], "activity.created");
    assert_eq!(delivered["payload"]["activity_id"], 5);

    cancel.cancel();
}

// ---------------------------------------------------------------------------
// Scenario B: persistent failure exhausts the schedule
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn persistent_500_exhausts_after_max_attempts(pool: PgPool) {
    let (url, _capture) = spawn_endpoint(StatusCode::INTERNAL_SERVER_ERROR).await;
    let webhook_id = seed_registration(&pool, &url, "s3cret").await;
    let harness = build_harness(&pool);

    let event = WebhookEvent::new("activity.created", 1);
    harness.dispatcher.handle(event).await.unwrap();

    // First attempt fails and schedules the first backoff step.
    let row = wait_for_status(&pool, webhook_id, "failed").await;
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.last_http_status, Some(500));
    let next = row.next_retry_at.expect("failed row must have a retry time");
    let delta = (next - Utc::now()).num_seconds();
    assert!((50..=70).contains(&delta), "first backoff step should be ~1m, got {delta}s");

    // Drive the remaining attempts through the retry worker, checking the
    // scheduled delay after each failure: 5m, 30m, 2h — then exhausted.
    for expected_secs in [300i64, 1_800, 7_200] {
        force_due(&pool, row.id).await;
        assert_eq!(harness.worker.poll_once().await.unwrap(), 1);

        let row = DeliveryRepo::find_by_id(&pool, row.id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        let next = row.next_retry_at.expect("non-terminal failure keeps a retry time");
        let delta = (next - Utc::now()).num_seconds();
        assert!(
            (expected_secs - 10..=expected_secs + 10).contains(&delta),
            "expected ~{expected_secs}s backoff, got {delta}s"
        );
    }

    // Fifth attempt hits the cap.
    force_due(&pool, row.id).await;
    assert_eq!(harness.worker.poll_once().await.unwrap(), 1);

    let row = DeliveryRepo::find_by_id(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(row.status, "exhausted");
    assert_eq!(row.attempt_count, 5);
    assert_eq!(row.last_http_status, Some(500));
    assert!(row.next_retry_at.is_none());

    // Terminal rows never reappear in a later poll.
    force_due_all(&pool).await;
    assert_eq!(harness.worker.poll_once().await.unwrap(), 0);
}

/// Force every non-terminal row due (no-op for terminal rows, whose
/// updates are SQL-guarded).
async fn force_due_all(pool: &PgPool) {
    sqlx::query(
        "UPDATE webhook_deliveries SET next_retry_at = NOW() - INTERVAL '1 second' \
         WHERE status IN ('pending', 'failed')",
    )
    .execute(pool)
    .await
    .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: failure then recovery
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn failed_delivery_succeeds_on_retry(pool: PgPool) {
    // Endpoint is down first (no listener), then comes up.
    let dead_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead_listener.local_addr().unwrap();
    drop(dead_listener);

    let webhook_id =
        seed_registration(&pool, &format!("http://{dead_addr}/hook"), "s3cret").await;
    let harness = build_harness(&pool);

    harness
        .dispatcher
        .handle(WebhookEvent::new("activity.created", 1))
        .await
        .unwrap();

    let row = wait_for_status(&pool, webhook_id, "failed").await;
    assert_eq!(row.attempt_count, 1);
    assert!(row.last_http_status.is_none(), "connection failure has no HTTP status");
    assert!(row.last_error.is_some());

    // Point the registration at a live endpoint and replay.
    let (url, _capture) = spawn_endpoint(StatusCode::NO_CONTENT).await;
    sqlx::query("UPDATE webhooks SET url = $2 WHERE id = $1")
        .bind(webhook_id)
        .bind(&url)
        .execute(&pool)
        .await
        .unwrap();

    force_due(&pool, row.id).await;
    assert_eq!(harness.worker.poll_once().await.unwrap(), 1);

    let row = DeliveryRepo::find_by_id(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(row.status, "succeeded");
    assert_eq!(row.attempt_count, 2);
    assert_eq!(row.last_http_status, Some(204));
}

// ---------------------------------------------------------------------------
// Scenario C: no matching registrations
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn event_without_registrations_creates_no_rows(pool: PgPool) {
    let (url, capture) = spawn_endpoint(StatusCode::OK).await;
    let webhook_id = seed_registration(&pool, &url, "s3cret").await;
    let harness = build_harness(&pool);

    // Subscribed to activity.created only; this event matches nothing.
    let result = harness
        .dispatcher
        .handle(WebhookEvent::new("billing.invoice_paid", 1))
        .await;

    assert!(result.is_ok(), "the bus entry must still be acknowledged");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let rows = DeliveryRepo::list_for_webhook(&pool, webhook_id, 10, 0).await.unwrap();
    assert!(rows.is_empty());
    assert!(capture.requests.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: bus redelivery is deduplicated
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn redelivered_event_does_not_duplicate_rows(pool: PgPool) {
    let (url, _capture) = spawn_endpoint(StatusCode::OK).await;
    let webhook_id = seed_registration(&pool, &url, "s3cret").await;
    let harness = build_harness(&pool);

    let event = WebhookEvent::new("activity.created", 1);
    let redelivered = WebhookEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();

    harness.dispatcher.handle(event).await.unwrap();
    harness.dispatcher.handle(redelivered).await.unwrap();

    wait_for_status(&pool, webhook_id, "succeeded").await;
    let rows = DeliveryRepo::list_for_webhook(&pool, webhook_id, 10, 0).await.unwrap();
    assert_eq!(rows.len(), 1, "redelivery must not create a second row");
}

// ---------------------------------------------------------------------------
// Scenario E: concurrent fan-out
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_dispatch_creates_exactly_one_row_per_pair(pool: PgPool) {
    let (url, _capture) = spawn_endpoint(StatusCode::OK).await;
    let mut webhook_ids = Vec::new();
    for _ in 0..10 {
        webhook_ids.push(seed_registration(&pool, &url, "s3cret").await);
    }
    let harness = build_harness(&pool);

    let mut handles = Vec::new();
    for i in 0..100 {
        let dispatcher = harness.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let event = WebhookEvent::new("activity.created", i)
                .with_payload(serde_json::json!({"seq": i}));
            dispatcher.handle(event).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Exactly 100 events × 10 registrations = 1000 rows, no losses, no dupes.
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_deliveries")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1_000);

    let (distinct,): (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT (webhook_id, event_key)) FROM webhook_deliveries",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(distinct, 1_000);

    // Every row reaches a terminal state within bounded time.
    for _ in 0..1_200 {
        let (pending,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM webhook_deliveries WHERE status NOT IN ('succeeded', 'exhausted')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        if pending == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("not all deliveries reached a terminal state");
}
