//! Background polling workers.
//!
//! Every worker is a [`PollingTask`] driven by a [`PollingWorker`], which owns
//! the start/stop lifecycle, the sleep schedule and the run statistics.

mod polling_worker;

pub use polling_worker::{BackgroundWorker, PollingTask, PollingWorker, WorkerSchedule, WorkerStats};
