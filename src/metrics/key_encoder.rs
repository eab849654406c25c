//! Key encoding for emitted series
//!
//! Encodes a metric name and its resolved tag values into the item key the
//! collector stores values under.
//!
//! Key format: `seg1.seg2...segN["v1","v2",...]`, values ordered by tag name.
//!
//! Examples:
//! - `vm.memory.total` (no tags)
//! - `http.request.latency["localhost","GET"]` (tags `host`, `method`)

use super::definition::MetricDefinition;
use super::types::{Metadata, MetricError, MetricValue};

/// Encodes emission keys
pub struct MetricKeyEncoder;

impl MetricKeyEncoder {
    /// Encode a name and tag pairs already sorted by tag name
    pub fn encode(name: &[String], tags: &[(String, MetricValue)]) -> String {
        let mut key = name.join(".");
        if tags.is_empty() {
            return key;
        }

        key.push('[');
        for (i, (_, value)) in tags.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push('"');
            key.push_str(&Self::escape(&value.to_string()));
            key.push('"');
        }
        key.push(']');
        key
    }

    /// Resolve the definition's tags from `metadata` and encode the key
    pub fn build_key(definition: &MetricDefinition, metadata: &Metadata) -> Result<String, MetricError> {
        let tags = definition.resolve_tags(metadata)?;
        Ok(Self::encode(definition.name(), &tags))
    }

    /// Escape double quotes inside a tag value
    pub fn escape(value: &str) -> String {
        value.replace('"', "\\\"")
    }
}
