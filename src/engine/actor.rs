//! Batch Engine actor
//!
//! One task owns the aggregation store and the batch window. Event handlers on
//! the bus only enqueue messages, so producers never wait on the network.
//!
//! ```text
//! EventBus ──┐
//! ingest() ──┤──► BatchActor ──► BatchState ──(window elapses)──► Transport
//! stats()  ──┘
//! ```
//!
//! The window is a single `Sleep`, armed when the store goes from empty to
//! non-empty and dropped on flush. The flush awaits the transport inline, so
//! events arriving meanwhile queue up behind it.

use super::dispatch::DispatchOutcome;
use super::events::{EngineId, EventBus, Handler, HandlerId};
use super::state::{BatchState, Transition};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, ReporterConfig};
use crate::metrics::{Measurements, Metadata, MetricDefinition};
use crate::transport::Transport;
use ahash::AHashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, info, trace, warn};

/// Owner label used in every handler id this crate registers
pub const ENGINE_NAME: &str = "telemetry_batcher";

/// Messages for the batch actor
pub enum EngineMessage {
    /// An event to aggregate
    Event {
        event_name: Vec<String>,
        measurements: Measurements,
        metadata: Metadata,
    },
    /// Snapshot of the engine's counters
    Stats {
        response_tx: oneshot::Sender<EngineStats>,
    },
    /// Detach from the bus and stop. The pending window is abandoned.
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Point-in-time view of an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub engine_id: EngineId,
    /// Entries in the aggregation store
    pub pending_entries: usize,
    /// Whether a window timer is pending
    pub window_armed: bool,
    pub windows_opened: u64,
    pub flushes: u64,
    pub extraction_failures: u64,
    /// Events a keep/drop predicate rejected
    pub filtered: u64,
    pub subscribed_events: usize,
}

type Routes = AHashMap<Vec<String>, Vec<Arc<MetricDefinition>>>;

pub struct BatchActor<T: Transport, C: Clock> {
    id: EngineId,
    config: ReporterConfig,
    routes: Routes,
    state: BatchState,
    window: Option<Pin<Box<Sleep>>>,
    transport: T,
    clock: C,
    bus: EventBus,
    handler_ids: Vec<HandlerId>,
    rx: mpsc::UnboundedReceiver<EngineMessage>,
}

impl<T: Transport, C: Clock> BatchActor<T, C> {
    /// Run the actor loop
    pub async fn run(mut self) {
        info!(
            "Engine {} started: {} events subscribed, window {:?}",
            self.id,
            self.routes.len(),
            self.config.batch_window
        );

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        EngineMessage::Event { event_name, measurements, metadata } => {
                            self.handle_event(&event_name, &measurements, &metadata);
                        }
                        EngineMessage::Stats { response_tx } => {
                            let _ = response_tx.send(self.stats());
                        }
                        EngineMessage::Shutdown { response_tx } => {
                            self.detach();
                            info!(
                                "Engine {} shutting down, abandoning {} pending entries",
                                self.id,
                                self.state.pending_entries()
                            );
                            let _ = response_tx.send(());
                            return;
                        }
                    }
                }
                _ = window_elapsed(&mut self.window) => {
                    self.flush().await;
                }
            }
        }

        self.detach();
        info!("Engine {} stopped: all handles dropped", self.id);
    }

    fn handle_event(&mut self, event_name: &[String], measurements: &Measurements, metadata: &Metadata) {
        let Some(definitions) = self.routes.get(event_name) else {
            trace!("Engine {} ignoring event {}", self.id, event_name.join("."));
            return;
        };

        let now = self.clock.now();
        if self.state.ingest(definitions, measurements, metadata, now) == Transition::WindowOpened {
            debug_assert!(self.window.is_none(), "window armed twice");
            self.window = Some(Box::pin(tokio::time::sleep(self.config.batch_window)));
        }
    }

    async fn flush(&mut self) {
        self.window = None;
        let batch = self.state.take_batch(
            &self.config.hostname,
            self.config.timestamping,
            self.clock.now(),
        );
        if batch.is_empty() {
            return;
        }

        debug!("Engine {} flushing {} values", self.id, batch.len());
        let result = self.transport.send(&batch).await;
        DispatchOutcome::classify(&batch, &result).log();
    }

    fn stats(&self) -> EngineStats {
        let counters = self.state.counters();
        EngineStats {
            engine_id: self.id,
            pending_entries: self.state.pending_entries(),
            window_armed: self.window.is_some(),
            windows_opened: counters.windows_opened,
            flushes: counters.flushes,
            extraction_failures: counters.extraction_failures,
            filtered: counters.filtered,
            subscribed_events: self.routes.len(),
        }
    }

    fn detach(&mut self) {
        for id in self.handler_ids.drain(..) {
            if !self.bus.detach(&id) {
                warn!("Handler {:?} was already detached", id);
            }
        }
    }
}

/// Resolves when the armed window elapses; never resolves when none is armed
async fn window_elapsed(window: &mut Option<Pin<Box<Sleep>>>) {
    match window {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// EngineHandle - public interface for interacting with the engine
// ============================================================================

/// Handle for sending messages to the batch actor
#[derive(Clone)]
pub struct EngineHandle {
    id: EngineId,
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl EngineHandle {
    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Feed an event directly, bypassing the bus
    pub fn ingest(&self, event_name: &[&str], measurements: Measurements, metadata: Metadata) {
        let _ = self.tx.send(EngineMessage::Event {
            event_name: event_name.iter().map(|s| s.to_string()).collect(),
            measurements,
            metadata,
        });
    }

    /// Counters from the actor, or `None` if it has stopped
    pub async fn stats(&self) -> Option<EngineStats> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(EngineMessage::Stats { response_tx }).ok()?;
        response_rx.await.ok()
    }

    /// Detach from the bus and stop the actor. Pending aggregates are dropped.
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(EngineMessage::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        }
    }
}

/// Spawn an engine on the system clock
pub fn spawn_engine<T: Transport>(
    config: ReporterConfig,
    metrics: Vec<MetricDefinition>,
    bus: &EventBus,
    transport: T,
) -> Result<(EngineHandle, tokio::task::JoinHandle<()>), ConfigError> {
    spawn_engine_with_clock(config, metrics, bus, transport, SystemClock)
}

/// Validate the configuration and metrics, subscribe one handler per distinct
/// event name and spawn the actor.
pub fn spawn_engine_with_clock<T: Transport, C: Clock>(
    config: ReporterConfig,
    metrics: Vec<MetricDefinition>,
    bus: &EventBus,
    transport: T,
    clock: C,
) -> Result<(EngineHandle, tokio::task::JoinHandle<()>), ConfigError> {
    config.validate()?;
    for metric in &metrics {
        metric.validate()?;
    }

    let mut routes: Routes = AHashMap::new();
    for metric in metrics {
        routes
            .entry(metric.event_name().to_vec())
            .or_default()
            .push(Arc::new(metric));
    }

    let id = EngineId::next();
    let (tx, rx) = mpsc::unbounded_channel();

    let mut handler_ids = Vec::with_capacity(routes.len());
    for event_name in routes.keys() {
        let handler_id = HandlerId {
            owner: ENGINE_NAME,
            event_name: event_name.clone(),
            instance: id,
        };
        // Only handles keep the actor alive; once they are gone the queue closes
        let event_tx = tx.downgrade();
        let handler: Handler = Arc::new(move |name: &[String], measurements: &Measurements, metadata: &Metadata| {
            let Some(event_tx) = event_tx.upgrade() else {
                return;
            };
            let _ = event_tx.send(EngineMessage::Event {
                event_name: name.to_vec(),
                measurements: measurements.clone(),
                metadata: metadata.clone(),
            });
        });
        if bus.attach(handler_id.clone(), handler) {
            handler_ids.push(handler_id);
        }
    }

    let actor = BatchActor {
        id,
        config,
        routes,
        state: BatchState::new(),
        window: None,
        transport,
        clock,
        bus: bus.clone(),
        handler_ids,
        rx,
    };

    let task = tokio::spawn(actor.run());
    Ok((EngineHandle { id, tx }, task))
}
