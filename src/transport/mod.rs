//! Transport to the Remote Collector
//!
//! The engine hands every flushed batch to a `Transport` and only looks at the
//! outcome. Implementations:
//!
//! - `ZabbixSender`: TCP sender protocol (production)
//! - `InMemoryTransport`: records batches and replays scripted outcomes (tests)

pub mod protocol;
pub mod sender;

pub use protocol::ZabbixCodec;
pub use sender::ZabbixSender;

use crate::metrics::{MetricValue, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;

/// One value sent to the collector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionRecord {
    pub host: String,
    pub key: String,
    pub value: MetricValue,
    #[serde(rename = "clock", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Everything flushed from one batch window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmissionBatch {
    pub records: Vec<EmissionRecord>,
    /// Flush time, set when timestamping is enabled
    pub timestamp: Option<Timestamp>,
}

impl EmissionBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct emission keys in the batch, sorted
    pub fn keys(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.key.as_str()).collect()
    }
}

/// Counts reported by the collector for an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SendSummary {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub seconds_spent: f64,
}

impl SendSummary {
    /// Summary for a batch the collector took in full
    pub fn all_processed(total: u64) -> Self {
        SendSummary {
            processed: total,
            failed: 0,
            total,
            seconds_spent: 0.0,
        }
    }
}

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Collector refused the connection
    ConnectionRefused(String),
    /// Connect, write or read did not finish in time
    Timeout,
    /// Other I/O failure
    Io(String),
    /// Collector answered with something we cannot interpret
    Protocol(String),
}

impl TransportError {
    /// Short reason code used in logs
    pub fn reason(&self) -> &'static str {
        match self {
            TransportError::ConnectionRefused(_) => "econnrefused",
            TransportError::Timeout => "timeout",
            TransportError::Io(_) => "io",
            TransportError::Protocol(_) => "protocol",
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ConnectionRefused(msg) => write!(f, "connection refused: {}", msg),
            TransportError::Timeout => write!(f, "collector did not answer in time"),
            TransportError::Io(msg) => write!(f, "transport I/O error: {}", msg),
            TransportError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(e.to_string()),
            ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        }
    }
}

pub type SendResult = Result<SendSummary, TransportError>;

/// Batch-send collaborator
pub trait Transport: Send + Sync + 'static {
    /// Deliver one batch. Retries, if any, are the implementation's business.
    fn send<'a>(
        &'a self,
        batch: &'a EmissionBatch,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>>;
}

// ============================================================================
// InMemoryTransport - For tests
// ============================================================================

/// Transport that records batches and answers with scripted outcomes.
/// Once the script runs out every batch is reported fully processed.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    sent: Arc<Mutex<Vec<EmissionBatch>>>,
    script: Arc<Mutex<VecDeque<SendResult>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of a future `send`
    pub fn push_response(&self, response: SendResult) {
        self.script.lock().push_back(response);
    }

    /// Batches received so far
    pub fn batches(&self) -> Vec<EmissionBatch> {
        self.sent.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Transport for InMemoryTransport {
    fn send<'a>(
        &'a self,
        batch: &'a EmissionBatch,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            self.sent.lock().push(batch.clone());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(SendSummary::all_processed(batch.len() as u64)))
        })
    }
}
