//! Queue manager: the single background dispatch loop.
//!
//! Each cycle fills a bounded hand-off buffer with pending events in dispatch
//! order, then drains it, routing every event to the handler registered for its
//! type and recording the outcome. Events whose type has no handler are logged
//! and left pending; they are parked in memory so they do not hold up the rest
//! of the queue.
//!
//! Fetching does not claim events, so only one manager may consume a queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::EventQueue;
use super::types::{EventId, GameEvent};
use crate::storage::StorageError;

/// Event handler function type.
pub type EventHandler = Box<dyn Fn(&GameEvent) -> anyhow::Result<()> + Send + Sync>;

/// Queue manager configuration.
#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    /// Idle sleep between cycles.
    pub poll_interval: Duration,
    /// Sleep after a cycle failed in the fetch/dispatch machinery.
    pub error_backoff: Duration,
    /// Capacity of the hand-off buffer.
    pub handoff_capacity: usize,
    /// How long `stop()` waits for buffered events to be handled.
    pub drain_timeout: Duration,
    /// How long `stop()` waits for the loop to exit.
    pub join_timeout: Duration,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            handoff_capacity: 16,
            drain_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// What happened to one event during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed,
    /// No handler is registered for the type; the event stays pending.
    Unhandled,
}

/// Counters for one [`QueueManager::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub completed: usize,
    pub failed: usize,
    pub unhandled: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0 && self.completed == 0 && self.failed == 0 && self.unhandled == 0
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Completed => self.completed += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Unhandled => self.unhandled += 1,
        }
    }
}

struct Dispatcher {
    queue: EventQueue,
    handlers: HashMap<String, EventHandler>,
    buffer: VecDeque<GameEvent>,
    capacity: usize,
    parked: HashSet<EventId>,
}

impl Dispatcher {
    async fn fill(&mut self) -> Result<usize, StorageError> {
        if !self.parked.is_empty() {
            // Forget parked events that were purged or handled elsewhere.
            let parked: Vec<EventId> = self.parked.iter().copied().collect();
            self.parked = self.queue.still_pending(&parked).await?;
        }

        let mut fetched = 0;
        while self.buffer.len() < self.capacity {
            let exclude: Vec<EventId> = self
                .parked
                .iter()
                .copied()
                .chain(self.buffer.iter().map(|event| event.id))
                .collect();

            match self.queue.dequeue_next_excluding(&exclude).await? {
                Some(event) => {
                    self.buffer.push_back(event);
                    fetched += 1;
                }
                None => break,
            }
        }
        Ok(fetched)
    }

    async fn drain(&mut self, report: &mut CycleReport) -> Result<(), StorageError> {
        while let Some(event) = self.buffer.pop_front() {
            let outcome = self.dispatch(&event);
            report.record(outcome);
            match outcome {
                DispatchOutcome::Completed => self.queue.mark_processed(event.id, true).await?,
                DispatchOutcome::Failed => self.queue.mark_processed(event.id, false).await?,
                DispatchOutcome::Unhandled => {
                    self.parked.insert(event.id);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, event: &GameEvent) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&event.event_type) else {
            error!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no handler registered for event type; leaving event pending"
            );
            return DispatchOutcome::Unhandled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {
                debug!(event_id = %event.id, event_type = %event.event_type, "event handled");
                DispatchOutcome::Completed
            }
            Ok(Err(err)) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = ?err,
                    "event handler failed"
                );
                DispatchOutcome::Failed
            }
            Err(_) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "event handler panicked"
                );
                DispatchOutcome::Failed
            }
        }
    }
}

struct RunningLoop {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Owns the handler registry and the dispatch loop of one event queue.
///
/// Construct it once at startup, register handlers, then `start()`. Dropping a
/// running manager without `stop()` leaves the loop running until the runtime
/// shuts down.
pub struct QueueManager {
    config: QueueManagerConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    running: Mutex<Option<RunningLoop>>,
}

impl QueueManager {
    pub fn new(queue: EventQueue, config: QueueManagerConfig) -> Self {
        let dispatcher = Dispatcher {
            queue,
            handlers: HashMap::new(),
            buffer: VecDeque::with_capacity(config.handoff_capacity),
            capacity: config.handoff_capacity.max(1),
            parked: HashSet::new(),
        };
        Self {
            config,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            running: Mutex::new(None),
        }
    }

    /// Register the handler for an event type, replacing any previous one.
    pub async fn register_handler<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&GameEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher
            .handlers
            .insert(event_type.clone(), Box::new(handler))
            .is_some()
        {
            warn!(event_type = %event_type, "replaced existing event handler");
        }
        // A newly handled type may unblock parked events.
        dispatcher.parked.clear();
    }

    pub async fn registered_types(&self) -> Vec<String> {
        let dispatcher = self.dispatcher.lock().await;
        let mut types: Vec<String> = dispatcher.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Fill the hand-off buffer and handle everything in it.
    ///
    /// The background loop calls this repeatedly; tests and tools may call it
    /// directly. Calls never interleave with the loop.
    pub async fn run_cycle(&self) -> Result<CycleReport, StorageError> {
        run_cycle(&self.dispatcher).await
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    /// Start the dispatch loop. Starting a running manager is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.join.is_finished() {
                warn!("queue manager is already running");
                return;
            }
            warn!("queue manager loop had exited; restarting");
        }

        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(dispatch_loop(
            self.dispatcher.clone(),
            self.config.clone(),
            shutdown.clone(),
        ));
        *running = Some(RunningLoop { shutdown, join });
        info!("queue manager started");
    }

    /// Stop the dispatch loop. Stopping a stopped manager is a no-op.
    ///
    /// Buffered events get a bounded chance to be handled, then the loop is
    /// joined with a bounded wait and abandoned if it does not exit in time.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(RunningLoop { shutdown, join }) = running.take() else {
            warn!("queue manager is not running");
            return;
        };
        shutdown.notify_one();

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            let mut dispatcher = self.dispatcher.lock().await;
            let mut report = CycleReport::default();
            let result = dispatcher.drain(&mut report).await;
            (report, result)
        })
        .await;
        match drained {
            Ok((report, Ok(()))) => {
                if !report.is_idle() {
                    info!(?report, "drained hand-off buffer on shutdown");
                }
            }
            Ok((_, Err(err))) => error!(error = ?err, "failed to drain hand-off buffer on shutdown"),
            Err(_) => warn!(
                timeout = ?self.config.drain_timeout,
                "timed out draining hand-off buffer on shutdown"
            ),
        }

        match tokio::time::timeout(self.config.join_timeout, join).await {
            Ok(Ok(())) => info!("queue manager stopped"),
            Ok(Err(err)) => error!(error = ?err, "queue manager loop panicked"),
            Err(_) => warn!(
                timeout = ?self.config.join_timeout,
                "queue manager loop did not stop in time; abandoning it"
            ),
        }
    }
}

async fn run_cycle(dispatcher: &Mutex<Dispatcher>) -> Result<CycleReport, StorageError> {
    let mut dispatcher = dispatcher.lock().await;
    let mut report = CycleReport {
        fetched: dispatcher.fill().await?,
        ..CycleReport::default()
    };
    dispatcher.drain(&mut report).await?;
    Ok(report)
}

async fn dispatch_loop(
    dispatcher: Arc<Mutex<Dispatcher>>,
    config: QueueManagerConfig,
    shutdown: Arc<Notify>,
) {
    info!("dispatch loop started");

    loop {
        let pause = match run_cycle(&dispatcher).await {
            Ok(report) => {
                if !report.is_idle() {
                    debug!(?report, "dispatch cycle finished");
                }
                config.poll_interval
            }
            Err(err) => {
                error!(error = ?err, "dispatch cycle failed");
                config.error_backoff
            }
        };

        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use serde_json::json;

    use super::*;
    use crate::queue::EventStatus;
    use crate::storage::{Storage, StorageConfig};

    async fn setup(dir: &tempfile::TempDir) -> (EventQueue, QueueManager) {
        let storage = Storage::new(StorageConfig::in_dir(dir.path()));
        let queue = EventQueue::open(storage).await.unwrap();
        let config = QueueManagerConfig {
            poll_interval: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            ..QueueManagerConfig::default()
        };
        let manager = QueueManager::new(queue.clone(), config);
        (queue, manager)
    }

    fn recorder(calls: &Arc<StdMutex<Vec<String>>>, label: &'static str) -> EventHandler {
        let calls = calls.clone();
        Box::new(move |event: &GameEvent| {
            calls
                .lock()
                .unwrap()
                .push(format!("{label}:{}", event.payload["n"]));
            Ok(())
        })
    }

    #[tokio::test]
    async fn one_cycle_dispatches_in_priority_then_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;
        let calls = Arc::new(StdMutex::new(Vec::new()));
        manager.register_handler("a", recorder(&calls, "a")).await;
        manager.register_handler("b", recorder(&calls, "b")).await;

        let a1 = queue.enqueue_with_priority("a", json!({ "n": 1 }), 5).await.unwrap();
        let b = queue.enqueue_with_priority("b", json!({ "n": 2 }), 1).await.unwrap();
        let a2 = queue.enqueue_with_priority("a", json!({ "n": 3 }), 5).await.unwrap();

        let report = manager.run_cycle().await.unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(*calls.lock().unwrap(), vec!["a:1", "a:3", "b:2"]);
        for id in [a1, b, a2] {
            let event = queue.get(id).await.unwrap().unwrap();
            assert_eq!(event.status, EventStatus::Completed);
        }
    }

    #[tokio::test]
    async fn handler_errors_mark_the_event_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;
        manager
            .register_handler("explode", |_event: &GameEvent| anyhow::bail!("boom"))
            .await;
        manager
            .register_handler("panic", |_event: &GameEvent| panic!("handler bug"))
            .await;

        let exploded = queue.enqueue("explode", json!({})).await.unwrap();
        let panicked = queue.enqueue("panic", json!({})).await.unwrap();
        let report = manager.run_cycle().await.unwrap();

        assert_eq!(report.failed, 2);
        for id in [exploded, panicked] {
            assert_eq!(
                queue.get(id).await.unwrap().unwrap().status,
                EventStatus::Failed
            );
        }
    }

    #[tokio::test]
    async fn unhandled_types_stay_pending_without_blocking_others() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;
        let calls = Arc::new(StdMutex::new(Vec::new()));
        manager.register_handler("known", recorder(&calls, "known")).await;

        let mystery = queue
            .enqueue_with_priority("mystery", json!({ "n": 0 }), 10)
            .await
            .unwrap();
        queue.enqueue("known", json!({ "n": 1 })).await.unwrap();

        let first = manager.run_cycle().await.unwrap();
        assert_eq!(first.unhandled, 1);
        assert_eq!(first.completed, 1);

        let second = manager.run_cycle().await.unwrap();
        assert!(second.is_idle());

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, mystery);

        // Registering the type later lets the parked event through.
        manager.register_handler("mystery", recorder(&calls, "mystery")).await;
        let third = manager.run_cycle().await.unwrap();
        assert_eq!(third.completed, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["known:1", "mystery:0"]);
    }

    #[tokio::test]
    async fn parked_events_are_forgotten_once_purged() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;

        let mystery = queue.enqueue("mystery", json!({})).await.unwrap();
        manager.run_cycle().await.unwrap();
        assert!(manager.dispatcher.lock().await.parked.contains(&mystery));

        let later = chrono::Utc::now() + chrono::TimeDelta::seconds(1);
        assert_eq!(queue.purge_before(later).await.unwrap(), 1);
        assert!(manager.run_cycle().await.unwrap().is_idle());
        assert!(manager.dispatcher.lock().await.parked.is_empty());
    }

    #[tokio::test]
    async fn stop_handles_events_left_in_the_handoff_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;
        let calls = Arc::new(StdMutex::new(Vec::new()));
        manager.register_handler("a", recorder(&calls, "a")).await;

        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(queue.enqueue("a", json!({ "n": n })).await.unwrap());
        }
        assert_eq!(manager.dispatcher.lock().await.fill().await.unwrap(), 3);

        // A loop that has already exited, so only stop() can handle the buffer.
        *manager.running.lock().await = Some(RunningLoop {
            shutdown: Arc::new(Notify::new()),
            join: tokio::spawn(async {}),
        });
        manager.stop().await;

        assert_eq!(*calls.lock().unwrap(), vec!["a:0", "a:1", "a:2"]);
        assert!(manager.dispatcher.lock().await.buffer.is_empty());
        for id in ids {
            assert_eq!(
                queue.get(id).await.unwrap().unwrap().status,
                EventStatus::Completed
            );
        }
    }

    #[tokio::test]
    async fn background_loop_processes_events_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, manager) = setup(&dir).await;
        let calls = Arc::new(StdMutex::new(Vec::new()));
        manager.register_handler("a", recorder(&calls, "a")).await;

        manager.start().await;
        assert!(manager.is_running().await);
        let id = queue.enqueue("a", json!({ "n": 7 })).await.unwrap();

        let mut handled = false;
        for _ in 0..100 {
            if queue.get(id).await.unwrap().unwrap().status == EventStatus::Completed {
                handled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handled, "event was not handled by the background loop");

        manager.stop().await;
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_queue, manager) = setup(&dir).await;

        manager.stop().await;
        manager.start().await;
        manager.start().await;
        assert!(manager.is_running().await);

        manager.stop().await;
        manager.stop().await;
        assert!(!manager.is_running().await);

        manager.start().await;
        assert!(manager.is_running().await);
        manager.stop().await;
    }
}
