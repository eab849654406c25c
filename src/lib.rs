pub mod clock;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ReporterConfig};
pub use engine::{spawn_engine, spawn_engine_with_clock, EngineHandle, EngineStats, EventBus};
pub use metrics::{AggregationKind, MetricDefinition, MetricError, MetricValue};
pub use transport::{InMemoryTransport, Transport, TransportError, ZabbixSender};
