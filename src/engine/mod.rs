//! Batch Engine
//!
//! Subscribes to events, aggregates them per emission key for one batch
//! window, then hands the whole window to a `Transport` in one batch.
//!
//! ## Architecture
//!
//! ```text
//! EventBus ──► BatchActor ──► BatchState (store + window)
//!                   │
//!                   └──(window elapses)──► Transport ──► DispatchOutcome
//! ```

pub mod actor;
pub mod dispatch;
pub mod events;
pub mod state;

pub use actor::{
    spawn_engine, spawn_engine_with_clock, BatchActor, EngineHandle, EngineMessage, EngineStats,
    ENGINE_NAME,
};
pub use dispatch::DispatchOutcome;
pub use events::{EngineId, EventBus, Handler, HandlerId};
pub use state::{AggregationEntry, BatchPhase, BatchState, StateCounters, Transition};
