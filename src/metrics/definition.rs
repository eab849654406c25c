//! Metric definitions
//!
//! A `MetricDefinition` describes one aggregation target: which event feeds it,
//! how to pull the value out of the event, which tags identify a series and
//! whether a given event should be considered at all.
//!
//! Names follow the dotted convention: `http.request.latency` listens on the
//! `http.request` event and reads the `latency` measurement unless told otherwise.

use super::types::{AggregationKind, Measurements, Metadata, MetricError, MetricValue};
use crate::config::ConfigError;
use std::fmt;
use std::sync::Arc;

pub type MeasurementFn =
    Arc<dyn Fn(&Measurements) -> Result<MetricValue, MetricError> + Send + Sync>;
pub type MeasurementWithMetadataFn =
    Arc<dyn Fn(&Measurements, &Metadata) -> Result<MetricValue, MetricError> + Send + Sync>;
pub type TagValuesFn = Arc<dyn Fn(&Metadata) -> Result<Metadata, MetricError> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&Metadata) -> Result<bool, MetricError> + Send + Sync>;

/// How the value of a metric is read from an event
#[derive(Clone)]
pub enum Measurement {
    /// Look the value up in the event's measurements
    Key(String),
    /// Compute the value from the measurements
    Function(MeasurementFn),
    /// Compute the value from the measurements and the metadata
    WithMetadata(MeasurementWithMetadataFn),
}

impl Measurement {
    pub fn extract(
        &self,
        measurements: &Measurements,
        metadata: &Metadata,
    ) -> Result<Option<MetricValue>, MetricError> {
        match self {
            Measurement::Key(key) => Ok(measurements.get(key).cloned()),
            Measurement::Function(f) => f(measurements).map(Some),
            Measurement::WithMetadata(f) => f(measurements, metadata).map(Some),
        }
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Key(key) => write!(f, "Key({:?})", key),
            Measurement::Function(_) => f.write_str("Function(..)"),
            Measurement::WithMetadata(_) => f.write_str("WithMetadata(..)"),
        }
    }
}

/// Immutable description of one aggregated metric
#[derive(Clone)]
pub struct MetricDefinition {
    name: Vec<String>,
    event_name: Vec<String>,
    kind: AggregationKind,
    measurement: Measurement,
    tags: Vec<String>,
    tag_values: TagValuesFn,
    keep: Option<PredicateFn>,
}

impl MetricDefinition {
    /// Create a definition from a dotted name.
    ///
    /// The event name defaults to every segment but the last and the
    /// measurement defaults to the last segment.
    pub fn new(kind: AggregationKind, name: &str) -> Self {
        let name: Vec<String> = name.split('.').map(str::to_string).collect();
        let split = name.len().saturating_sub(1);
        let event_name = name[..split].to_vec();
        let measurement = Measurement::Key(name.last().cloned().unwrap_or_default());

        MetricDefinition {
            name,
            event_name,
            kind,
            measurement,
            tags: Vec::new(),
            tag_values: Arc::new(|metadata: &Metadata| Ok(metadata.clone())),
            keep: None,
        }
    }

    pub fn counter(name: &str) -> Self {
        Self::new(AggregationKind::Counter, name)
    }

    pub fn sum(name: &str) -> Self {
        Self::new(AggregationKind::Sum, name)
    }

    pub fn average(name: &str) -> Self {
        Self::new(AggregationKind::Average, name)
    }

    pub fn raw_list(name: &str) -> Self {
        Self::new(AggregationKind::RawList, name)
    }

    /// Listen on a different event than the one implied by the name
    pub fn with_event_name(mut self, event_name: &str) -> Self {
        self.event_name = event_name.split('.').map(str::to_string).collect();
        self
    }

    pub fn with_measurement_key(mut self, key: &str) -> Self {
        self.measurement = Measurement::Key(key.to_string());
        self
    }

    pub fn with_measurement<F>(mut self, f: F) -> Self
    where
        F: Fn(&Measurements) -> Result<MetricValue, MetricError> + Send + Sync + 'static,
    {
        self.measurement = Measurement::Function(Arc::new(f));
        self
    }

    pub fn with_measurement_and_metadata<F>(mut self, f: F) -> Self
    where
        F: Fn(&Measurements, &Metadata) -> Result<MetricValue, MetricError>
            + Send
            + Sync
            + 'static,
    {
        self.measurement = Measurement::WithMetadata(Arc::new(f));
        self
    }

    /// Declare the tag names that identify a series of this metric
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Derive tag values from event metadata (default: the metadata itself)
    pub fn with_tag_values<F>(mut self, f: F) -> Self
    where
        F: Fn(&Metadata) -> Result<Metadata, MetricError> + Send + Sync + 'static,
    {
        self.tag_values = Arc::new(f);
        self
    }

    /// Only aggregate events whose metadata satisfies `f`
    pub fn keep_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Metadata) -> Result<bool, MetricError> + Send + Sync + 'static,
    {
        self.keep = Some(Arc::new(f));
        self
    }

    /// Skip events whose metadata satisfies `f`
    pub fn drop_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&Metadata) -> Result<bool, MetricError> + Send + Sync + 'static,
    {
        self.keep = Some(Arc::new(move |metadata: &Metadata| f(metadata).map(|d| !d)));
        self
    }

    pub fn name(&self) -> &[String] {
        &self.name
    }

    pub fn dotted_name(&self) -> String {
        self.name.join(".")
    }

    pub fn event_name(&self) -> &[String] {
        &self.event_name
    }

    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Check that every name segment matches `^[a-zA-Z0-9_]+$`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.iter().all(|s| s.is_empty()) {
            return Err(ConfigError::EmptyMetricName);
        }
        for segment in &self.name {
            if !is_valid_segment(segment) {
                return Err(ConfigError::InvalidMetricName {
                    name: self.dotted_name(),
                    segment: segment.clone(),
                });
            }
        }
        if self.event_name.is_empty() || self.event_name.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::InvalidEventName {
                metric: self.dotted_name(),
            });
        }
        Ok(())
    }

    /// Evaluate the keep/drop predicate (always keep when none is set)
    pub fn should_keep(&self, metadata: &Metadata) -> Result<bool, MetricError> {
        match &self.keep {
            Some(f) => f(metadata),
            None => Ok(true),
        }
    }

    /// Read the value of this metric from an event. A measurement key absent
    /// from the event yields `None`.
    pub fn extract_value(
        &self,
        measurements: &Measurements,
        metadata: &Metadata,
    ) -> Result<Option<MetricValue>, MetricError> {
        self.measurement.extract(measurements, metadata)
    }

    /// Resolve tag values, restricted to the declared tags and sorted by tag name.
    /// Declared tags the resolver does not produce are left out.
    pub fn resolve_tags(&self, metadata: &Metadata) -> Result<Vec<(String, MetricValue)>, MetricError> {
        if self.tags.is_empty() {
            return Ok(Vec::new());
        }
        let resolved = (self.tag_values)(metadata)?;
        let mut pairs: Vec<(String, MetricValue)> = self
            .tags
            .iter()
            .filter_map(|tag| resolved.get(tag).map(|v| (tag.clone(), v.clone())))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        pairs.dedup_by(|a, b| a.0 == b.0);
        Ok(pairs)
    }
}

impl fmt::Debug for MetricDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricDefinition")
            .field("name", &self.dotted_name())
            .field("event_name", &self.event_name.join("."))
            .field("kind", &self.kind)
            .field("measurement", &self.measurement)
            .field("tags", &self.tags)
            .field("keep", &self.keep.is_some())
            .finish()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
