//! Infrastructure layer: SQLite storage, the event queue and background workers.

pub mod db;
pub mod queue;
pub mod storage;
pub mod workers;
