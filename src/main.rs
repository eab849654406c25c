//! Demo reporter
//!
//! Aggregates a few synthetic HTTP and VM metrics and ships them to the
//! collector configured through `ZABBIX_*` environment variables.
//! Set `LOG_FORMAT=json` for JSON logs.

use std::time::Duration;
use telemetry_batcher::engine::{spawn_engine, EventBus};
use telemetry_batcher::metrics::{value_map, Metadata, MetricDefinition, MetricValue};
use telemetry_batcher::{ReporterConfig, ZabbixSender};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

const METHODS: [&str; 3] = ["GET", "POST", "DELETE"];

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn demo_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::counter("http.request.count").with_tags(["method"]),
        MetricDefinition::average("http.request.latency").with_tags(["method"]),
        MetricDefinition::sum("http.request.bytes")
            .drop_if(|meta| Ok(meta.get("method") == Some(&MetricValue::from("DELETE")))),
        MetricDefinition::raw_list("vm.memory.total"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = ReporterConfig::from_env();
    let sender = ZabbixSender::from_config(&config);
    info!(
        "Reporting to {} as {:?} every {:?}",
        sender.address(),
        config.hostname,
        config.batch_window
    );

    let bus = EventBus::new();
    let (engine, task) = spawn_engine(config, demo_metrics(), &bus, sender)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick += 1;
                let method = METHODS[(tick % METHODS.len() as u64) as usize];
                let metadata: Metadata = value_map([("method", method)]);
                let latency = 5 + (tick * 7) % 40;
                bus.execute(
                    &["http", "request"],
                    &value_map([("latency", latency as i64), ("bytes", (tick % 512) as i64)]),
                    &metadata,
                );
                if tick % 10 == 0 {
                    bus.execute(
                        &["vm", "memory"],
                        &value_map([("total", 1_048_576 + (tick % 1024) as i64)]),
                        &Metadata::new(),
                    );
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    engine.shutdown().await;
    let _ = task.await;
    info!("Reporter stopped");
    Ok(())
}
