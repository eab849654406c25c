//! Dispatch classifier
//!
//! Turns the transport's answer for one flush into an outcome and logs it.
//! Nothing is retried: whatever the outcome, the batch is gone.

use crate::transport::{EmissionBatch, SendResult};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Collector accepted every value
    Delivered { processed: u64, total: u64 },
    /// Collector rejected some values. The protocol does not say which, so
    /// `keys` lists every distinct key that was in the batch.
    PartialFailure {
        failed: u64,
        total: u64,
        keys: Vec<String>,
    },
    /// The batch never reached the collector, or the answer was unusable
    TransportFailure { reason: &'static str, detail: String },
}

impl DispatchOutcome {
    pub fn classify(batch: &EmissionBatch, result: &SendResult) -> Self {
        match result {
            Ok(summary) if summary.failed == 0 => DispatchOutcome::Delivered {
                processed: summary.processed,
                total: summary.total,
            },
            Ok(summary) => DispatchOutcome::PartialFailure {
                failed: summary.failed,
                total: summary.total,
                keys: batch.keys().into_iter().map(str::to_string).collect(),
            },
            Err(e) => DispatchOutcome::TransportFailure {
                reason: e.reason(),
                detail: e.to_string(),
            },
        }
    }

    pub fn log(&self) {
        match self {
            DispatchOutcome::Delivered { processed, total } => {
                debug!("Collector processed {} of {} values", processed, total);
            }
            DispatchOutcome::PartialFailure { failed, total, keys } => {
                warn!(
                    "Collector failed {} of {} values; dropped batch contained keys: {}",
                    failed,
                    total,
                    keys.join(", ")
                );
            }
            DispatchOutcome::TransportFailure { reason, detail } => {
                warn!("Failed to send batch to collector ({}): {}", reason, detail);
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}
