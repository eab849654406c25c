//! In-process event bus
//!
//! Producers call `execute` with an event name, measurements and metadata.
//! Every handler attached to that event name is invoked synchronously on the
//! caller's thread. Handlers are registered under a `HandlerId` so several
//! engines can listen on the same event without stepping on each other.

use crate::metrics::{Measurements, Metadata};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub type Handler = Arc<dyn Fn(&[String], &Measurements, &Metadata) + Send + Sync>;

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one engine instance within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(u64);

impl EngineId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        EngineId(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// Registration key: (owner, event name, instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    pub owner: &'static str,
    pub event_name: Vec<String>,
    pub instance: EngineId,
}

struct Registration {
    id: HandlerId,
    handler: Handler,
}

/// Shared registry of event handlers. Clones refer to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<Vec<String>, Vec<Registration>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to `event_name`. Returns false if `id` is already attached.
    pub fn attach(&self, id: HandlerId, handler: Handler) -> bool {
        let mut handlers = self.handlers.write();
        let registrations = handlers.entry(id.event_name.clone()).or_default();
        if registrations.iter().any(|r| r.id == id) {
            return false;
        }
        debug!("Attached handler {:?}", id);
        registrations.push(Registration { id, handler });
        true
    }

    /// Remove a handler. Returns false if it was not attached.
    pub fn detach(&self, id: &HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(registrations) = handlers.get_mut(&id.event_name) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| &r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            handlers.remove(&id.event_name);
        }
        if removed {
            debug!("Detached handler {:?}", id);
        }
        removed
    }

    /// Emit an event to every handler attached to `event_name`
    pub fn execute(&self, event_name: &[&str], measurements: &Measurements, metadata: &Metadata) {
        let event_name: Vec<String> = event_name.iter().map(|s| s.to_string()).collect();
        // Handlers run without the lock held so they may attach or detach
        let targets: Vec<Handler> = match self.handlers.read().get(&event_name) {
            Some(registrations) => registrations.iter().map(|r| r.handler.clone()).collect(),
            None => return,
        };
        for handler in targets {
            handler(&event_name, measurements, metadata);
        }
    }

    /// Handler ids currently attached for one engine instance
    pub fn handlers_for(&self, instance: EngineId) -> Vec<HandlerId> {
        self.handlers
            .read()
            .values()
            .flatten()
            .filter(|r| r.id.instance == instance)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
