//! Aggregation store and batch window state machine
//!
//! `BatchState` is plain data with no runtime attached: the actor feeds it
//! events and asks it for a batch when the window timer fires. Keeping it
//! synchronous means every property of the window can be unit-tested without
//! a runtime.
//!
//! ```text
//!   Idle ──(event, store gains an entry)──► Accumulating ──(flush)──► Idle
//!                                           │        ▲
//!                                           └─event──┘  (window untouched)
//! ```

use crate::metrics::{
    Accumulator, Measurements, Metadata, MetricDefinition, MetricError, MetricKeyEncoder,
    MetricValue, Timestamp,
};
use crate::transport::{EmissionBatch, EmissionRecord};
use ahash::AHashMap;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Window phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Empty store, no window
    Idle,
    /// Non-empty store, one window armed at `opened_at`
    Accumulating { opened_at: Timestamp },
}

/// What an ingest did to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Store went from empty to non-empty; caller must arm the window timer
    WindowOpened,
    /// Window already armed or store still empty
    Unchanged,
}

/// Definition plus its accumulator, keyed by emission key in the store
#[derive(Debug, Clone)]
pub struct AggregationEntry {
    pub definition: Arc<MetricDefinition>,
    pub accumulator: Accumulator,
}

/// Counters kept across windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounters {
    pub windows_opened: u64,
    pub flushes: u64,
    pub extraction_failures: u64,
    pub filtered: u64,
}

#[derive(Debug)]
pub struct BatchState {
    store: AHashMap<String, AggregationEntry>,
    phase: BatchPhase,
    counters: StateCounters,
}

/// Result of evaluating one definition against one event, before touching the store
struct Evaluated {
    key: String,
    value: Option<MetricValue>,
}

impl BatchState {
    pub fn new() -> Self {
        BatchState {
            store: AHashMap::new(),
            phase: BatchPhase::Idle,
            counters: StateCounters::default(),
        }
    }

    /// Aggregate one event into every definition subscribed to it.
    ///
    /// Each definition is evaluated in isolation: an error or panic in its
    /// predicate, extractor or tag resolver skips that definition only.
    pub fn ingest(
        &mut self,
        definitions: &[Arc<MetricDefinition>],
        measurements: &Measurements,
        metadata: &Metadata,
        now: Timestamp,
    ) -> Transition {
        let was_empty = self.store.is_empty();

        for definition in definitions {
            match evaluate(definition, measurements, metadata) {
                Ok(Some(evaluated)) => {
                    if let Err(e) = self.apply(definition, evaluated, now) {
                        self.record_failure(definition, &e.to_string());
                    }
                }
                Ok(None) => {
                    self.counters.filtered += 1;
                    trace!("Event filtered out for {}", definition.dotted_name());
                }
                Err(reason) => self.record_failure(definition, &reason),
            }
        }

        self.transition_after_ingest(was_empty, now)
    }

    fn apply(
        &mut self,
        definition: &Arc<MetricDefinition>,
        evaluated: Evaluated,
        now: Timestamp,
    ) -> Result<(), MetricError> {
        let Evaluated { key, value } = evaluated;
        match self.store.get_mut(&key) {
            Some(entry) => entry.accumulator.update(value, now),
            None => {
                let accumulator = Accumulator::init(definition.kind(), value, now)?;
                self.store.insert(
                    key,
                    AggregationEntry {
                        definition: definition.clone(),
                        accumulator,
                    },
                );
                Ok(())
            }
        }
    }

    fn record_failure(&mut self, definition: &MetricDefinition, reason: &str) {
        self.counters.extraction_failures += 1;
        error!("Failed to aggregate {:?}: {}", definition, reason);
    }

    fn transition_after_ingest(&mut self, was_empty: bool, now: Timestamp) -> Transition {
        match self.phase {
            BatchPhase::Idle if was_empty && !self.store.is_empty() => {
                self.phase = BatchPhase::Accumulating { opened_at: now };
                self.counters.windows_opened += 1;
                Transition::WindowOpened
            }
            _ => Transition::Unchanged,
        }
    }

    /// Drain the store into an emission batch and return to `Idle`.
    ///
    /// With timestamping on, raw samples carry their own observation time and
    /// scalar kinds carry `now`. Records are ordered by key.
    pub fn take_batch(&mut self, hostname: &str, timestamping: bool, now: Timestamp) -> EmissionBatch {
        let mut entries: Vec<(String, AggregationEntry)> = self.store.drain().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            for extracted in entry.accumulator.extract() {
                let timestamp = timestamping.then(|| extracted.timestamp.unwrap_or(now));
                records.push(EmissionRecord {
                    host: hostname.to_string(),
                    key: key.clone(),
                    value: extracted.value,
                    timestamp,
                });
            }
        }

        self.phase = BatchPhase::Idle;
        self.counters.flushes += 1;

        EmissionBatch {
            records,
            timestamp: timestamping.then_some(now),
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn is_window_open(&self) -> bool {
        matches!(self.phase, BatchPhase::Accumulating { .. })
    }

    pub fn pending_entries(&self) -> usize {
        self.store.len()
    }

    pub fn entry(&self, key: &str) -> Option<&AggregationEntry> {
        self.store.get(key)
    }

    pub fn counters(&self) -> StateCounters {
        self.counters
    }
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the user-supplied parts of a definition. `Ok(None)` means the
/// predicate rejected the event.
fn evaluate(
    definition: &MetricDefinition,
    measurements: &Measurements,
    metadata: &Metadata,
) -> Result<Option<Evaluated>, String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<Evaluated>, MetricError> {
        if !definition.should_keep(metadata)? {
            return Ok(None);
        }
        let value = if definition.kind().needs_value() {
            definition.extract_value(measurements, metadata)?
        } else {
            None
        };
        let key = MetricKeyEncoder::build_key(definition, metadata)?;
        Ok(Some(Evaluated { key, value }))
    }));

    match outcome {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
