use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One unit of periodic background work.
#[async_trait]
pub trait PollingTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Perform one wake-up's worth of work.
    async fn run_cycle(&self) -> anyhow::Result<()>;
}

/// Timing of a polling worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSchedule {
    /// Wait after a successful cycle.
    pub interval: Duration,
    /// Wait after a failed or panicked cycle.
    pub recovery_delay: Duration,
    /// How long `stop()` waits for the loop to exit.
    pub join_timeout: Duration,
}

impl WorkerSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            recovery_delay: Duration::from_secs(60),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn every_minutes(minutes: u64) -> Self {
        Self::every(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn with_recovery_delay(mut self, delay: Duration) -> Self {
        self.recovery_delay = delay;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Object-safe control surface shared by every worker.
#[async_trait]
pub trait BackgroundWorker: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self);
    async fn stop(&self);
    async fn is_running(&self) -> bool;
    fn stats(&self) -> WorkerStats;
}

struct RunningWorker {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

/// Runs a [`PollingTask`] on its own tokio task until stopped.
///
/// `start()` on a running worker and `stop()` on a stopped one are logged
/// no-ops. A failing cycle never ends the loop, and a loop that died anyway
/// (e.g. the runtime cancelled it) is restarted by the next `start()`.
pub struct PollingWorker<T: PollingTask> {
    task: Arc<T>,
    schedule: WorkerSchedule,
    stats: Arc<Mutex<WorkerStats>>,
    running: tokio::sync::Mutex<Option<RunningWorker>>,
}

impl<T: PollingTask> PollingWorker<T> {
    pub fn new(task: T, schedule: WorkerSchedule) -> Self {
        Self::from_arc(Arc::new(task), schedule)
    }

    pub fn from_arc(task: Arc<T>, schedule: WorkerSchedule) -> Self {
        Self {
            task,
            schedule,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Spawn the loop and return immediately.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.join.is_finished() {
                warn!(worker = self.task.name(), "worker is already running");
                return;
            }
            warn!(worker = self.task.name(), "worker loop had exited; restarting");
        }

        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(worker_loop(
            self.task.clone(),
            self.schedule.clone(),
            self.stats.clone(),
            shutdown.clone(),
        ));
        *running = Some(RunningWorker { shutdown, join });
    }

    /// Signal the loop and wait (bounded) for it to exit.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(RunningWorker { shutdown, join }) = running.take() else {
            warn!(worker = self.task.name(), "worker is not running");
            return;
        };
        shutdown.notify_one();

        match tokio::time::timeout(self.schedule.join_timeout, join).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(worker = self.task.name(), error = ?err, "worker loop ended abnormally"),
            Err(_) => warn!(
                worker = self.task.name(),
                timeout = ?self.schedule.join_timeout,
                "worker did not stop in time; abandoning it"
            ),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl<T: PollingTask> BackgroundWorker for PollingWorker<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn start(&self) {
        PollingWorker::start(self).await
    }

    async fn stop(&self) {
        PollingWorker::stop(self).await
    }

    async fn is_running(&self) -> bool {
        PollingWorker::is_running(self).await
    }

    fn stats(&self) -> WorkerStats {
        PollingWorker::stats(self)
    }
}

async fn worker_loop<T: PollingTask>(
    task: Arc<T>,
    schedule: WorkerSchedule,
    stats: Arc<Mutex<WorkerStats>>,
    shutdown: Arc<Notify>,
) {
    let name = task.name().to_owned();
    info!(worker = %name, interval = ?schedule.interval, "worker started");

    loop {
        let outcome = AssertUnwindSafe(task.run_cycle()).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                error!(worker = %name, error = ?err, "worker cycle failed");
                Some(format!("{err:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker = %name, panic = %message, "worker cycle panicked");
                Some(message)
            }
        };

        let pause = {
            let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.cycles += 1;
            match failure {
                None => {
                    stats.consecutive_failures = 0;
                    stats.last_success = Some(Utc::now());
                    schedule.interval
                }
                Some(message) => {
                    stats.failures += 1;
                    stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
                    stats.last_error = Some(message);
                    schedule.recovery_delay
                }
            }
        };

        tokio::select! {
            _ = shutdown.notified() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!(worker = %name, "worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
