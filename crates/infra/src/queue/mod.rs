//! Durable priority event queue and its dispatcher.
//!
//! ## Components
//!
//! - `EventQueue`: SQLite persistence (enqueue, dequeue, mark, purge)
//! - `QueueManager`: single consumer loop routing events to handlers by type
//! - `GameEvent`: the stored record and its status lifecycle

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{CycleReport, DispatchOutcome, EventHandler, QueueManager, QueueManagerConfig};
pub use store::EventQueue;
pub use types::{event_types, EventId, EventStatus, GameEvent, QueueStats};
