//! Task progress poller.
//!
//! One spawned loop per tracked task. Each tick awaits a single status call
//! before the next tick is scheduled, so there is never more than one
//! outstanding request per task. The loop ends on the first terminal status,
//! on a transport failure, on timeout, or when its handle is dropped.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use vmask_client::{TaskRepository, TaskService};
use vmask_models::{SessionId, TaskId, TaskProgress};

use crate::metrics;

/// Receiver of poll results.
#[async_trait]
pub trait PollSink: Send + Sync {
    async fn on_progress(&self, session_id: &SessionId, progress: &TaskProgress);

    /// First terminal observation for the task.
    async fn on_terminal(&self, session_id: &SessionId, progress: TaskProgress);

    /// The status endpoint itself failed, or polling timed out.
    async fn on_transport_failure(&self, session_id: &SessionId, task_id: &TaskId, message: String);
}

/// Remembers which tasks already had their terminal transition.
#[derive(Debug, Default, Clone)]
pub struct TerminalGuard {
    settled: HashSet<TaskId>,
}

impl TerminalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once per task id.
    pub fn settle(&mut self, task_id: &TaskId) -> bool {
        self.settled.insert(task_id.clone())
    }

    pub fn is_settled(&self, task_id: &TaskId) -> bool {
        self.settled.contains(task_id)
    }

    /// Forget every settled task. Only safe once nothing can still deliver
    /// a status for them, i.e. when the session changes.
    pub fn clear(&mut self) {
        self.settled.clear();
    }

    pub fn len(&self) -> usize {
        self.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settled.is_empty()
    }
}

/// Polling loop configuration and collaborators.
#[derive(Clone)]
pub struct TaskPoller {
    tasks: Arc<dyn TaskService>,
    repo: Arc<dyn TaskRepository>,
    interval: Duration,
    timeout: Duration,
}

impl TaskPoller {
    pub fn new(
        tasks: Arc<dyn TaskService>,
        repo: Arc<dyn TaskRepository>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            repo,
            interval,
            timeout,
        }
    }

    /// Start polling `task_id` on the current runtime.
    pub fn spawn(self, session_id: SessionId, task_id: TaskId, sink: Weak<dyn PollSink>) -> PollerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(session_id, task_id, sink, stop_rx));
        PollerHandle {
            stop: stop_tx,
            handle: Some(handle),
        }
    }

    async fn run(
        self,
        session_id: SessionId,
        task_id: TaskId,
        sink: Weak<dyn PollSink>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task_id = %task_id, session_id = %session_id, interval_ms = self.interval.as_millis() as u64, "Polling task");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }
            if *stop_rx.borrow() {
                break;
            }
            let Some(sink) = sink.upgrade() else {
                break;
            };

            if started.elapsed() >= self.timeout {
                warn!(task_id = %task_id, "Polling timed out");
                sink.on_transport_failure(
                    &session_id,
                    &task_id,
                    format!("no terminal status after {}s", self.timeout.as_secs()),
                )
                .await;
                break;
            }

            let update = match self.tasks.status(&task_id).await {
                Ok(update) => update,
                Err(e) => {
                    metrics::record_poll_tick(false);
                    warn!(task_id = %task_id, error = %e, "Status poll failed");
                    sink.on_transport_failure(&session_id, &task_id, e.to_string()).await;
                    break;
                }
            };
            metrics::record_poll_tick(true);

            let progress = match self.repo.apply(&task_id, &update).await {
                Ok(progress) => progress,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Could not record task progress");
                    sink.on_transport_failure(&session_id, &task_id, e.to_string()).await;
                    break;
                }
            };

            if progress.is_terminal() {
                debug!(task_id = %task_id, status = %progress.status, "Task reached terminal status");
                sink.on_terminal(&session_id, progress).await;
                break;
            }
            sink.on_progress(&session_id, &progress).await;
        }
        debug!(task_id = %task_id, "Poller stopped");
    }
}

/// Owner of a running poll loop. Dropping it stops the loop.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Release the loop without aborting it. Used from inside the loop's
    /// own callbacks, where the loop is about to return anyway.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop.send(true);
            handle.abort();
        }
    }
}
