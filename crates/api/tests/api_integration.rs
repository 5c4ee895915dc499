//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::config::Config;
use api::routes::AppState;
use api::routes::queues::{
    EMAIL_HEADER, ROLES_HEADER, SIGNATURE_HEADER, SUBJECT_HEADER, signing_input,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker::{InMemoryBroker, MessageBroker};
use ledger::InMemoryLedger;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Claims, IngestListener, InMemoryCatalog, derive_signing_key};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

type TestState = Arc<AppState<InMemoryBroker, InMemoryLedger>>;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: TestState,
    broker: InMemoryBroker,
    catalog: InMemoryCatalog,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        let broker = InMemoryBroker::new();
        let catalog = api::default_catalog();
        let state = api::create_state(
            &config,
            broker.clone(),
            InMemoryLedger::new(),
            InMemoryLedger::new(),
            catalog.clone(),
            CancellationToken::new(),
        );
        let app = api::create_app(state.clone(), get_metrics_handle());
        Self {
            app,
            state,
            broker,
            catalog,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn create_order(&self, item_id: &str) -> String {
        let (status, json) = self
            .post(
                "/orders",
                serde_json::json!({
                    "item_id": item_id,
                    "amount_cents": 2500,
                    "user_id": "alice",
                    "consumer": "web",
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {json}");
        json["correlation_key"].as_str().unwrap().to_string()
    }

    async fn confirm_order(&self, key: &str) -> (StatusCode, serde_json::Value) {
        self.post(
            &format!("/orders/{key}/confirm"),
            serde_json::json!({
                "address": {
                    "home_address": "1 Main St",
                    "city": "Springfield",
                    "country": "US",
                }
            }),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let (status, json) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["queues"]["OrderQueue"], 0);
    assert_eq!(json["queues"]["DispatchQueue"], 0);
}

#[tokio::test]
async fn test_health_reports_broker_outage() {
    let app = TestApp::new();
    app.broker.set_unavailable(true);

    let (status, json) = app.get("/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new();
    app.create_order("SKU-001").await;

    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_create_order_enqueues_work_item() {
    let app = TestApp::new();

    let key = app.create_order("SKU-002").await;

    let queued = app.broker.queue_contents("OrderQueue").await;
    assert_eq!(queued.len(), 1);
    let item: serde_json::Value = serde_json::from_slice(&queued[0]).unwrap();
    assert_eq!(item["correlation_key"], key.as_str());
    assert_eq!(item["item_name"], "Gadget");
    assert_eq!(item["stage"], "order-confirmation");

    let (status, json) = app.get(&format!("/orders/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "Pending");
    assert_eq!(json["confirmations"][0]["stage"], "placement");
}

#[tokio::test]
async fn test_create_order_defaults_to_anonymous() {
    let app = TestApp::new();

    let (status, json) = app
        .post(
            "/orders",
            serde_json::json!({ "item_id": "SKU-001", "amount_cents": 100 }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user_id"], "anonymous");
    assert_eq!(json["consumer"], "anonymous");
}

#[tokio::test]
async fn test_create_order_validation() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/orders",
            serde_json::json!({ "item_id": "SKU-001", "amount_cents": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/orders",
            serde_json::json!({ "item_id": " ", "amount_cents": 100 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_order_unknown_item() {
    let app = TestApp::new();

    let (status, json) = app
        .post(
            "/orders",
            serde_json::json!({ "item_id": "SKU-404", "amount_cents": 100 }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("SKU-404"));
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap_or(0), 0);
}

#[tokio::test]
async fn test_create_order_catalog_down() {
    let app = TestApp::new();
    app.catalog.set_fail_on_lookup(true);

    let (status, _) = app
        .post(
            "/orders",
            serde_json::json!({ "item_id": "SKU-001", "amount_cents": 100 }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_get_order_not_found() {
    let app = TestApp::new();

    let (status, _) = app.get("/orders/000000-missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_order_forwards_to_shipping() {
    let app = TestApp::new();
    let key = app.create_order("SKU-001").await;

    let (status, json) = app.confirm_order(&key).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "confirmed");
    assert_eq!(json["newly_confirmed"], true);
    assert_eq!(json["forwarded"]["stage"], "shipment-confirmation");
    assert_eq!(json["forwarded"]["address"]["city"], "Springfield");

    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 0);
    assert_eq!(app.broker.message_count("ShippingQueue").await.unwrap(), 1);

    let (_, json) = app.get(&format!("/orders/{key}")).await;
    assert_eq!(json["order"]["status"], "Confirmed");

    // The work item was consumed, so a second attempt finds nothing.
    let (status, json) = app.confirm_order(&key).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["outcome"], "not_found");
}

#[tokio::test]
async fn test_confirm_order_leaves_other_orders_queued() {
    let app = TestApp::new();
    let first = app.create_order("SKU-001").await;
    let second = app.create_order("SKU-002").await;
    let third = app.create_order("SKU-003").await;

    let (status, _) = app.confirm_order(&second).await;
    assert_eq!(status, StatusCode::OK);

    let queued = app.broker.queue_contents("OrderQueue").await;
    let keys: Vec<String> = queued
        .iter()
        .map(|p| {
            let item: serde_json::Value = serde_json::from_slice(p).unwrap();
            item["correlation_key"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&first));
    assert!(keys.contains(&third));
    assert_eq!(app.broker.held_count().await, 0);
}

#[tokio::test]
async fn test_confirm_order_requires_address() {
    let app = TestApp::new();
    let key = app.create_order("SKU-001").await;

    let (status, _) = app
        .post(
            &format!("/orders/{key}/confirm"),
            serde_json::json!({
                "address": { "home_address": "", "city": "Springfield", "country": "US" }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 1);
}

#[tokio::test]
async fn test_cancelled_order_cannot_be_confirmed() {
    let app = TestApp::new();
    let key = app.create_order("SKU-001").await;

    let (status, json) = app
        .post(&format!("/orders/{key}/cancel"), serde_json::json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Failed");

    let (status, json) = app.confirm_order(&key).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["outcome"], "failed");
    assert!(json["reason"].is_string());

    // The failed item goes back to its queue for later inspection.
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 1);
    assert_eq!(app.broker.message_count("ShippingQueue").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_confirmed_order_conflicts() {
    let app = TestApp::new();
    let key = app.create_order("SKU-001").await;
    app.confirm_order(&key).await;

    let (status, _) = app
        .post(&format!("/orders/{key}/cancel"), serde_json::json!({}))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_confirm_order_broker_down() {
    let app = TestApp::new();
    let key = app.create_order("SKU-001").await;
    app.broker.set_unavailable(true);

    let (status, _) = app.confirm_order(&key).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_shipment_to_dispatch() {
    let app = TestApp::new();
    let key = app.create_order("SKU-003").await;
    app.confirm_order(&key).await;

    // Another user cannot claim this shipment.
    let (status, json) = app
        .post(
            &format!("/shipments/{key}/confirm"),
            serde_json::json!({ "user_id": "mallory", "supplier_id": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["outcome"], "not_found");
    assert_eq!(app.broker.message_count("ShippingQueue").await.unwrap(), 1);

    let (status, json) = app
        .post(
            &format!("/shipments/{key}/confirm"),
            serde_json::json!({ "user_id": "alice", "supplier_id": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "confirmed");
    assert_eq!(json["forwarded"]["stage"], "dispatch");

    let (status, json) = app.get(&format!("/shipments/{key}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Confirmed");

    let listener = IngestListener::new(
        app.broker.clone(),
        "DispatchQueue",
        app.state.dispatches.clone(),
    );
    assert!(listener.poll_once().await.unwrap());

    let (status, json) = app.get("/dispatches").await;
    assert_eq!(status, StatusCode::OK);
    let dispatches = json.as_array().unwrap();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0]["correlation_key"], key.as_str());
    assert_eq!(dispatches[0]["address"]["country"], "US");
}

#[tokio::test]
async fn test_shipment_confirm_requires_ids() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/shipments/abc/confirm",
            serde_json::json!({ "user_id": "", "supplier_id": "acme" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dispatch_listener_stops_on_shutdown() {
    let app = TestApp::new();
    let handle = api::spawn_dispatch_listener(&app.state);

    app.state.shutdown.cancel();

    let result = handle.await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_purge_queue() {
    let app = TestApp::new();
    app.create_order("SKU-001").await;
    app.create_order("SKU-002").await;

    let (status, json) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/queues/OrderQueue")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 2);
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 0);

    let (status, _) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/queues/NoSuchQueue")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn signed_purge(queue: &str, claims: &Claims, secret: &str) -> Request<Body> {
    let key = derive_signing_key(claims, secret.as_bytes()).unwrap();
    let signature = key.sign(signing_input(queue).as_bytes());

    Request::builder()
        .method("DELETE")
        .uri(format!("/queues/{queue}"))
        .header(SUBJECT_HEADER, claims.subject.clone().unwrap())
        .header(ROLES_HEADER, claims.roles.join(","))
        .header(EMAIL_HEADER, claims.email.clone().unwrap())
        .header(SIGNATURE_HEADER, signature)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_signed_purge() {
    let app = TestApp::with_config(Config {
        identity_secret: Some(SECRET.to_string()),
        ..Config::default()
    });
    app.create_order("SKU-001").await;

    let unsigned = Request::builder()
        .method("DELETE")
        .uri("/queues/OrderQueue")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = Claims::new("ops-1", &["admin"], "ops@example.com");
    let (status, _) = app
        .send(signed_purge("OrderQueue", &admin, "another-secret-another-secret-xx"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let viewer = Claims::new("dev-1", &["viewer"], "dev@example.com");
    let (status, _) = app.send(signed_purge("OrderQueue", &viewer, SECRET)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 1);

    // A signature for one queue does not authorize another.
    let mut request = signed_purge("ShippingQueue", &admin, SECRET);
    *request.uri_mut() = "/queues/OrderQueue".parse().unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = app.send(signed_purge("OrderQueue", &admin, SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], 1);

    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("admin_requests_rejected_total"));
}

#[tokio::test]
async fn test_signed_purge_rejects_incomplete_claims() {
    let app = TestApp::with_config(Config {
        identity_secret: Some(SECRET.to_string()),
        ..Config::default()
    });
    app.create_order("SKU-001").await;

    let admin = Claims::new("ops-1", &["admin"], "ops@example.com");
    let mut request = signed_purge("OrderQueue", &admin, SECRET);
    request.headers_mut().remove(EMAIL_HEADER);

    let (status, json) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("email"));
    assert_eq!(app.broker.message_count("OrderQueue").await.unwrap(), 1);
}
