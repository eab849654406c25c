//! Batch Engine Integration Tests
//!
//! Drives engines through the public API, verifying:
//! - One window per empty-to-non-empty transition
//! - Flush empties the store on success and on transport failure
//! - Keep/drop predicates and extractor failures stay per metric
//! - Independent engine instances on one bus
//! - End-to-end delivery over the sender protocol

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use telemetry_batcher::engine::{spawn_engine, spawn_engine_with_clock, EventBus};
use telemetry_batcher::metrics::{value_map, Measurements, Metadata, MetricDefinition, MetricError, MetricValue};
use telemetry_batcher::transport::{EmissionBatch, InMemoryTransport, SendSummary, TransportError, ZabbixCodec};
use telemetry_batcher::{ManualClock, ReporterConfig, ZabbixSender};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

const WINDOW: Duration = Duration::from_millis(50);

fn values(batch: &EmissionBatch) -> Vec<(String, MetricValue)> {
    batch
        .records
        .iter()
        .map(|r| (r.key.clone(), r.value.clone()))
        .collect()
}

// ============================================================================
// Batch Window Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_produces_single_flush() {
    let bus = EventBus::new();
    let transport = InMemoryTransport::new();
    let (engine, _task) = spawn_engine(
        ReporterConfig::test(),
        vec![MetricDefinition::counter("http.request.count")],
        &bus,
        transport.clone(),
    )
    .unwrap();

    for _ in 0..25 {
        bus.execute(&["http", "request"], &Measurements::new(), &Metadata::new());
    }
    tokio::time::sleep(WINDOW * 4).await;

    assert_eq!(transport.batch_count(), 1, "a burst must flush exactly once");
    assert_eq!(
        values(&transport.batches()[0]),
        vec![("http.request.count".to_string(), MetricValue::Integer(25))]
    );

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.windows_opened, 1);
    assert_eq!(stats.flushes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_after_flush_open_new_window() {
    let bus = EventBus::new();
    let transport = InMemoryTransport::new();
    let (_engine, _task) = spawn_engine(
        ReporterConfig::test(),
        vec![MetricDefinition::sum("db.query.rows")],
        &bus,
        transport.clone(),
    )
    .unwrap();

    bus.execute(&["db", "query"], &value_map([("rows", 10)]), &Metadata::new());
    tokio::time::sleep(WINDOW * 2).await;
    bus.execute(&["db", "query"], &value_map([("rows", 5)]), &Metadata::new());
    tokio::time::sleep(WINDOW * 2).await;

    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].records[0].value, MetricValue::Integer(10));
    assert_eq!(batches[1].records[0].value, MetricValue::Integer(5));
}

#[tokio::test(start_paused = true)]
async fn test_flush_discards_batch_on_any_outcome() {
    let bus = EventBus::new();
    let transport = InMemoryTransport::new();
    transport.push_response(Err(TransportError::ConnectionRefused("127.0.0.1:10051".to_string())));
    transport.push_response(Ok(SendSummary {
        processed: 0,
        failed: 1,
        total: 1,
        seconds_spent: 0.0,
    }));
    let (engine, _task) = spawn_engine(
        ReporterConfig::test(),
        vec![MetricDefinition::counter("job.run.count")],
        &bus,
        transport.clone(),
    )
    .unwrap();

    for _ in 0..3 {
        bus.execute(&["job", "run"], &Measurements::new(), &Metadata::new());
        tokio::time::sleep(WINDOW * 2).await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.pending_entries, 0);
        assert!(!stats.window_armed);
    }

    // Nothing is carried over from a failed window into the next one
    for batch in transport.batches() {
        assert_eq!(batch.records[0].value, MetricValue::Integer(1));
    }
}

// ============================================================================
// Per-Metric Isolation Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_keep_predicate_and_failing_sibling() {
    let bus = EventBus::new();
    let transport = InMemoryTransport::new();
    let (engine, _task) = spawn_engine(
        ReporterConfig::test(),
        vec![
            MetricDefinition::counter("http.request.errors")
                .keep_if(|meta| Ok(meta.get("status").and_then(MetricValue::as_f64).unwrap_or(0.0) >= 500.0)),
            MetricDefinition::sum("http.request.broken")
                .with_measurement(|_| Err(MetricError::Extractor("no such field".to_string()))),
            MetricDefinition::average("http.request.latency"),
        ],
        &bus,
        transport.clone(),
    )
    .unwrap();

    bus.execute(&["http", "request"], &value_map([("latency", 10)]), &value_map([("status", 200)]));
    bus.execute(&["http", "request"], &value_map([("latency", 20)]), &value_map([("status", 503)]));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.extraction_failures, 2);
    assert_eq!(stats.filtered, 1);

    tokio::time::sleep(WINDOW * 2).await;
    assert_eq!(
        values(&transport.batches()[0]),
        vec![
            ("http.request.errors".to_string(), MetricValue::Integer(1)),
            ("http.request.latency".to_string(), MetricValue::Float(15.0)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_tagged_series_and_raw_samples() {
    let bus = EventBus::new();
    let transport = InMemoryTransport::new();
    let clock = ManualClock::new(1_000);
    let (_engine, _task) = spawn_engine_with_clock(
        ReporterConfig::test(),
        vec![
            MetricDefinition::counter("http.request.count").with_tags(["method", "host"]),
            MetricDefinition::raw_list("vm.memory.total").with_tags(["device"]),
        ],
        &bus,
        transport.clone(),
        clock.clone(),
    )
    .unwrap();

    let get = value_map([("host", "localhost"), ("method", "GET")]);
    bus.execute(&["http", "request"], &Measurements::new(), &get);
    bus.execute(&["http", "request"], &Measurements::new(), &get);
    bus.execute(&["vm", "memory"], &value_map([("total", 123)]), &value_map([("device", "dev1")]));
    tokio::time::sleep(Duration::from_millis(1)).await;
    clock.advance(Duration::from_secs(5));
    bus.execute(&["vm", "memory"], &value_map([("total", 54)]), &value_map([("device", "dev1")]));
    tokio::time::sleep(WINDOW * 2).await;

    let batch = &transport.batches()[0];
    let records: Vec<(&str, &MetricValue, Option<u64>)> = batch
        .records
        .iter()
        .map(|r| (r.key.as_str(), &r.value, r.timestamp))
        .collect();
    assert_eq!(
        records,
        vec![
            (r#"http.request.count["localhost","GET"]"#, &MetricValue::Integer(2), Some(1_005)),
            (r#"vm.memory.total["dev1"]"#, &MetricValue::Integer(54), Some(1_005)),
            (r#"vm.memory.total["dev1"]"#, &MetricValue::Integer(123), Some(1_000)),
        ]
    );
}

// ============================================================================
// Instance Isolation Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engines_share_bus_independently() {
    let bus = EventBus::new();
    let first = InMemoryTransport::new();
    let second = InMemoryTransport::new();
    let metrics = || vec![MetricDefinition::counter("http.request.count")];

    let (first_engine, _t1) = spawn_engine(ReporterConfig::test(), metrics(), &bus, first.clone()).unwrap();
    let (second_engine, _t2) = spawn_engine(ReporterConfig::test(), metrics(), &bus, second.clone()).unwrap();
    assert_ne!(first_engine.id(), second_engine.id());
    assert_eq!(bus.handler_count(), 2);

    bus.execute(&["http", "request"], &Measurements::new(), &Metadata::new());
    first_engine.shutdown().await;
    bus.execute(&["http", "request"], &Measurements::new(), &Metadata::new());
    tokio::time::sleep(WINDOW * 2).await;

    assert_eq!(bus.handler_count(), 1);
    assert_eq!(first.batch_count(), 0, "shutdown abandons the pending window");
    assert_eq!(second.batches()[0].records[0].value, MetricValue::Integer(2));
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[tokio::test]
async fn test_delivery_over_sender_protocol() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let collector = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, ZabbixCodec);
        let request = framed.next().await.unwrap().unwrap();
        framed
            .send(bytes::Bytes::from_static(
                br#"{"response":"success","info":"processed: 1; failed: 0; total: 1; seconds spent: 0.00002"}"#,
            ))
            .await
            .unwrap();
        serde_json::from_slice::<serde_json::Value>(&request).unwrap()
    });

    let config = ReporterConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        hostname: "web01".to_string(),
        timestamping: false,
        batch_window: WINDOW,
    };
    let bus = EventBus::new();
    let sender = ZabbixSender::from_config(&config);
    let (engine, task) = spawn_engine(
        config,
        vec![MetricDefinition::sum("http.request.bytes")],
        &bus,
        sender,
    )
    .unwrap();

    bus.execute(&["http", "request"], &value_map([("bytes", 512)]), &Metadata::new());
    bus.execute(&["http", "request"], &value_map([("bytes", 0.5)]), &Metadata::new());

    let request = tokio::time::timeout(Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request["request"], "sender data");
    assert!(request.get("clock").is_none());
    assert_eq!(request["data"][0]["host"], "web01");
    assert_eq!(request["data"][0]["key"], "http.request.bytes");
    assert_eq!(request["data"][0]["value"], 512.5);

    engine.shutdown().await;
    task.await.unwrap();
}
