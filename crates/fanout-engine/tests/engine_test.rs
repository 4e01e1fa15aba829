//! End-to-end delivery scenarios against a mock HTTP endpoint.
//!
//! The engine is driven deterministically: a `TestClock` owns all timing
//! and `run_tick` replaces the background driver loop, so retry schedules
//! are asserted exactly rather than slept through.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use fanout_core::{
    models::{DeliveryStatus, Endpoint, Event, FilterOp, FilterRule},
    Clock, EngineError, NoOpNotificationHandler, TestClock,
};
use fanout_engine::{
    signature::sign_payload, EngineConfig, Transform, TransformError, TransformRegistry,
    WebhookEngine,
};
use serde_json::{json, Value};
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn test_engine() -> (WebhookEngine, Arc<TestClock>) {
    test_engine_with(EngineConfig::default(), TransformRegistry::new())
}

fn test_engine_with(
    config: EngineConfig,
    transforms: TransformRegistry,
) -> (WebhookEngine, Arc<TestClock>) {
    let clock = Arc::new(TestClock::new());
    let engine = WebhookEngine::with_dependencies(
        config,
        clock.clone(),
        Arc::new(NoOpNotificationHandler::new()),
        transforms,
    )
    .expect("engine construction");
    (engine, clock)
}

fn order_endpoint(url: String) -> Endpoint {
    Endpoint::new("orders", url).with_event_types(["order.created"])
}

fn order_event(clock: &TestClock) -> Event {
    Event::new("api", "order.created", json!({"id": 1}), clock.now_utc())
}

#[tokio::test]
async fn recovers_after_transient_failures_with_signature() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/hook"))
        .and(matchers::header_exists("X-Fanout-Signature"))
        .and(matchers::header("X-Fanout-Event", "order.created"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    let endpoint = order_endpoint(format!("{}/hook", server.uri()))
        .with_secret("s3cr3t")
        .with_max_retries(2);
    let endpoint_id = engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    // First attempt failed; a retry is armed one base delay out.
    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.next_retry_at.is_some());
    assert_eq!(delivery.response.as_ref().unwrap().status, 500);

    clock.advance(Duration::from_secs(1));
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Retrying);
    assert_eq!(delivery.attempts, 2);

    clock.advance(Duration::from_secs(2));
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(delivery.response.as_ref().unwrap().status, 200);
    assert!(delivery.last_error.is_none());

    let metrics = engine.metrics().await;
    assert_eq!(metrics.total_events, 1);
    assert_eq!(metrics.delivered, 1);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.retried, 2);
    assert_eq!(metrics.error_rate, 0.0);

    let endpoint_metrics = engine.endpoint_metrics(endpoint_id).await.unwrap();
    assert_eq!(endpoint_metrics.deliveries, 1);
    assert_eq!(endpoint_metrics.delivered, 1);
    assert_eq!(endpoint_metrics.success_rate, 1.0);

    server.verify().await;
}

#[tokio::test]
async fn exhausted_retries_end_in_terminal_failure() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .expect(3)
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    let endpoint = order_endpoint(format!("{}/hook", server.uri())).with_max_retries(2);
    let endpoint_id = engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;
    clock.advance(Duration::from_secs(1));
    engine.run_tick().await;
    clock.advance(Duration::from_secs(2));
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 3); // max_retries + 1
    assert!(delivery.next_retry_at.is_none());
    assert!(delivery.last_error.as_ref().unwrap().contains("HTTP 500"));

    let metrics = engine.metrics().await;
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.error_rate, 1.0);

    let endpoint_metrics = engine.endpoint_metrics(endpoint_id).await.unwrap();
    assert_eq!(endpoint_metrics.failed, 1);
    assert_eq!(endpoint_metrics.error_rate, 1.0);
    assert_eq!(endpoint_metrics.success_rate, 0.0);

    // No further timers are armed; later ticks stay quiet.
    clock.advance(Duration::from_secs(60));
    engine.run_tick().await;
    server.verify().await;
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    let endpoint = order_endpoint(format!("{}/hook", server.uri())).with_max_retries(5);
    engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 1);

    server.verify().await;
}

#[tokio::test]
async fn filters_narrow_matching_beyond_type_subscription() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    let eu_only = order_endpoint(format!("{}/eu", server.uri())).with_filters(vec![
        FilterRule::new("payload.region", FilterOp::Equals, json!("eu")),
    ]);
    let unfiltered = order_endpoint(format!("{}/all", server.uri()));
    let eu_id = engine.register_endpoint(eu_only).await.unwrap();
    let all_id = engine.register_endpoint(unfiltered).await.unwrap();

    let event = Event::new(
        "api",
        "order.created",
        json!({"id": 7, "region": "us"}),
        clock.now_utc(),
    );
    engine.trigger_event(event).await;
    engine.run_tick().await;

    assert!(engine.deliveries_for_endpoint(eu_id).await.is_empty());
    let matched = engine.deliveries_for_endpoint(all_id).await;
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn unregistering_cancels_armed_retry_timers() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    let endpoint = order_endpoint(format!("{}/hook", server.uri())).with_max_retries(5);
    let endpoint_id = engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Retrying);

    engine.unregister_endpoint(endpoint_id).await.unwrap();

    // The timer would have fired here; no attempt may follow it.
    clock.advance(Duration::from_secs(30));
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.last_error.as_deref(), Some("endpoint unregistered"));

    assert!(engine.endpoint_metrics(endpoint_id).await.is_err());
    server.verify().await;
}

#[tokio::test]
async fn manual_retry_requeues_a_failed_delivery() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    // Zero retries still gets exactly one attempt.
    let endpoint = order_endpoint(format!("{}/hook", server.uri())).with_max_retries(0);
    engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 1);

    engine.retry_delivery(delivery.id).await.unwrap();
    engine.run_tick().await;

    let delivery = engine.delivery(delivery.id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempts, 2);

    server.verify().await;
}

#[tokio::test]
async fn self_test_bypasses_pipeline_and_metrics() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-Fanout-Event", "endpoint.test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _clock) = test_engine();
    let endpoint = order_endpoint(format!("{}/hook", server.uri()));
    let endpoint_id = engine.register_endpoint(endpoint).await.unwrap();

    let outcome = engine.test_endpoint(endpoint_id, json!({"probe": true})).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.response.as_ref().unwrap().status, 200);
    assert_eq!(outcome.response.as_ref().unwrap().body, "pong");

    // Nothing entered the pipeline, nothing was counted.
    assert!(engine.deliveries().await.is_empty());
    assert!(engine.events().await.is_empty());
    let metrics = engine.metrics().await;
    assert_eq!(metrics.total_events, 0);
    assert_eq!(metrics.delivered, 0);
    let endpoint_metrics = engine.endpoint_metrics(endpoint_id).await.unwrap();
    assert_eq!(endpoint_metrics.deliveries, 0);

    server.verify().await;
}

#[tokio::test]
async fn self_test_reports_failures_inline() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (engine, _clock) = test_engine();
    let endpoint_id = engine
        .register_endpoint(order_endpoint(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    let outcome = engine.test_endpoint(endpoint_id, json!({})).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.response.as_ref().unwrap().status, 503);
    assert!(outcome.error.as_ref().unwrap().contains("503"));

    let missing = engine.test_endpoint(fanout_core::EndpointId::new(), json!({})).await;
    assert!(matches!(missing, Err(EngineError::EndpointNotFound { .. })));
}

struct Envelope;

impl Transform for Envelope {
    fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        Ok(json!({ "wrapped": value.clone() }))
    }
}

#[tokio::test]
async fn request_transform_shapes_body_and_signature() {
    let transformed_body =
        serde_json::to_vec(&json!({"wrapped": {"id": 1}})).expect("serialize expected body");
    let expected_signature =
        sign_payload(&transformed_body, "s3cr3t").expect("signature over expected body");

    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::body_json(json!({"wrapped": {"id": 1}})))
        .and(matchers::header("X-Fanout-Signature", expected_signature.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut transforms = TransformRegistry::new();
    transforms.register("envelope", Arc::new(Envelope));
    let (engine, clock) = test_engine_with(EngineConfig::default(), transforms);

    let endpoint = order_endpoint(format!("{}/hook", server.uri()))
        .with_secret("s3cr3t")
        .with_transforms(Some("envelope".to_string()), None);
    engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    server.verify().await;
}

#[tokio::test]
async fn response_transform_rewrites_recorded_body() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"ok":true,"token":"secret"}"#),
        )
        .mount(&server)
        .await;

    let mut transforms = TransformRegistry::new();
    transforms.register(
        "redact",
        Arc::new(|_: &Value| -> Result<Value, TransformError> { Ok(json!({"ok": true})) }),
    );
    let (engine, clock) = test_engine_with(EngineConfig::default(), transforms);

    let endpoint = order_endpoint(format!("{}/hook", server.uri()))
        .with_transforms(None, Some("redact".to_string()));
    engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    let body = &delivery.response.as_ref().unwrap().body;
    assert_eq!(serde_json::from_str::<Value>(body).unwrap(), json!({"ok": true}));
}

#[tokio::test]
async fn broken_transform_never_aborts_delivery() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::body_json(json!({"id": 1})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut transforms = TransformRegistry::new();
    transforms.register(
        "explodes",
        Arc::new(|_: &Value| -> Result<Value, TransformError> {
            Err(TransformError::new("always fails"))
        }),
    );
    let (engine, clock) = test_engine_with(EngineConfig::default(), transforms);

    let endpoint = order_endpoint(format!("{}/hook", server.uri()))
        .with_transforms(Some("explodes".to_string()), None);
    engine.register_endpoint(endpoint).await.unwrap();

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    let delivery = engine.deliveries().await.pop().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    server.verify().await;
}

#[tokio::test]
async fn export_import_round_trip_reproduces_registry() {
    let (source, _clock) = test_engine();
    let orders = order_endpoint("https://example.com/orders".to_string())
        .with_secret("s3cr3t")
        .with_max_retries(5);
    let billing = Endpoint::new("billing", "https://example.com/billing")
        .with_event_types(["invoice.paid", "invoice.voided"]);
    source.register_endpoint(orders).await.unwrap();
    source.register_endpoint(billing).await.unwrap();

    let document = serde_json::to_value(source.export_endpoints().await).unwrap();

    let (fresh, _clock) = test_engine();
    let imported = fresh.import_endpoints(document).await.unwrap();
    assert_eq!(imported, 2);

    let mut original = source.endpoints().await;
    let mut restored = fresh.endpoints().await;
    original.sort_by_key(|e| e.id.0);
    restored.sort_by_key(|e| e.id.0);
    assert_eq!(original, restored);
}

#[tokio::test]
async fn malformed_import_leaves_engine_untouched() {
    let (engine, _clock) = test_engine();
    let existing = order_endpoint("https://example.com/hook".to_string());
    engine.register_endpoint(existing).await.unwrap();

    let missing = json!({ "exportDate": Utc::now().to_rfc3339() });
    assert!(matches!(
        engine.import_endpoints(missing).await,
        Err(EngineError::InvalidImportFormat { .. })
    ));

    let not_a_list = json!({ "endpoints": 42 });
    assert!(matches!(
        engine.import_endpoints(not_a_list).await,
        Err(EngineError::InvalidImportFormat { .. })
    ));

    // The failed imports changed nothing.
    assert_eq!(engine.endpoints().await.len(), 1);
}

#[tokio::test]
async fn in_flight_cap_bounds_concurrent_sends() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let config = EngineConfig { max_in_flight: 2, ..EngineConfig::default() };
    let (engine, clock) = test_engine_with(config, TransformRegistry::new());

    for index in 0..4 {
        let endpoint = Endpoint::new(
            format!("target-{index}"),
            format!("{}/hook/{index}", server.uri()),
        )
        .with_event_types(["order.created"]);
        engine.register_endpoint(endpoint).await.unwrap();
    }

    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;

    // Only the capped pair went out this tick; the rest stayed queued.
    let deliveries = engine.deliveries().await;
    let delivered =
        deliveries.iter().filter(|d| d.status == DeliveryStatus::Delivered).count();
    let pending = deliveries.iter().filter(|d| d.status == DeliveryStatus::Pending).count();
    assert_eq!(delivered, 2);
    assert_eq!(pending, 2);

    engine.run_tick().await;
    let deliveries = engine.deliveries().await;
    assert!(deliveries.iter().all(|d| d.status == DeliveryStatus::Delivered));
}

#[tokio::test]
async fn duplicate_registration_is_rejected_and_harmless() {
    let (engine, _clock) = test_engine();
    let endpoint = order_endpoint("https://example.com/hook".to_string());
    let twin = endpoint.clone();

    engine.register_endpoint(endpoint).await.unwrap();
    let error = engine.register_endpoint(twin).await.unwrap_err();

    assert!(matches!(error, EngineError::DuplicateEndpoint { .. }));
    assert_eq!(engine.endpoints().await.len(), 1);
}

#[tokio::test]
async fn clear_queue_drops_backlog_but_keeps_history() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (engine, clock) = test_engine();
    engine
        .register_endpoint(order_endpoint(format!("{}/hook", server.uri())))
        .await
        .unwrap();

    // One event flows through to a terminal record.
    engine.trigger_event(order_event(&clock)).await;
    engine.run_tick().await;
    assert_eq!(engine.deliveries().await.len(), 1);

    // Two more queue up but never get a tick before the clear.
    engine.trigger_event(order_event(&clock)).await;
    engine.trigger_event(order_event(&clock)).await;
    engine.clear_queue().await;
    engine.run_tick().await;

    let deliveries = engine.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);

    // total_events keeps counting accepted events even when cleared.
    assert_eq!(engine.metrics().await.total_events, 3);
}
