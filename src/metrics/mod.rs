//! Metric Definitions and Aggregation Strategies
//!
//! This module holds everything that is independent of the engine's runtime:
//!
//! - **Definitions** describing which event feeds a metric and how it is tagged
//! - **Key encoding** turning a name and tag values into an emission key
//! - **Collectors** folding samples into counters, sums, averages or raw lists

mod types;
mod definition;
mod key_encoder;
mod collector;

pub use types::{value_map, AggregationKind, Measurements, Metadata, MetricError, MetricValue};
pub use definition::{Measurement, MetricDefinition};
pub use key_encoder::MetricKeyEncoder;
pub use collector::{Accumulator, Extracted, Timestamp};
