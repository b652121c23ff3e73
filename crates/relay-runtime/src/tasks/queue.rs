//! Worker pool for queued tasks
//!
//! A single dispatch loop pulls envelopes off an mpsc channel and runs each
//! on its own tokio task, bounded by a semaphore. Retries sleep outside the
//! pool so a backing-off task never holds a worker slot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use relay_core::{RelayError, RelayResult};

use super::{RetryPolicy, TaskEnvelope, TaskKind, TaskOutcome, TaskRunner};
use crate::batch::BatchRegistry;

/// Counters since the queue started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

struct Shared {
    runner: Arc<dyn TaskRunner>,
    tx: mpsc::UnboundedSender<TaskEnvelope>,
    batches: Arc<BatchRegistry>,
    counters: Counters,
    /// Tasks enqueued and not yet finished, backoff included
    in_flight: AtomicUsize,
    idle: Notify,
}

pub struct TaskQueue {
    shared: Arc<Shared>,
    default_policy: RetryPolicy,
    dispatcher: JoinHandle<()>,
}

impl TaskQueue {
    /// Start the dispatch loop on the current tokio runtime
    pub fn start(runner: Arc<dyn TaskRunner>, max_concurrent: usize, policy: RetryPolicy) -> Self {
        Self::with_batches(runner, max_concurrent, policy, Arc::new(BatchRegistry::new()))
    }

    pub fn with_batches(
        runner: Arc<dyn TaskRunner>,
        max_concurrent: usize,
        policy: RetryPolicy,
        batches: Arc<BatchRegistry>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            runner,
            tx,
            batches,
            counters: Counters::default(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let dispatcher = tokio::spawn(dispatch_loop(shared.clone(), rx, semaphore));
        info!("Task queue started with {} worker(s)", max_concurrent.max(1));

        Self {
            shared,
            default_policy: policy,
            dispatcher,
        }
    }

    pub fn batches(&self) -> &Arc<BatchRegistry> {
        &self.shared.batches
    }

    /// Enqueue with the default retry policy; returns the task id
    pub fn enqueue(&self, kind: TaskKind) -> RelayResult<String> {
        self.enqueue_envelope(TaskEnvelope::new(kind, self.default_policy))
    }

    pub fn enqueue_with(&self, kind: TaskKind, policy: RetryPolicy) -> RelayResult<String> {
        self.enqueue_envelope(TaskEnvelope::new(kind, policy))
    }

    /// Enqueue as a member of a batch created with `batches().create(..)`
    pub fn enqueue_in_batch(&self, kind: TaskKind, batch_id: &str) -> RelayResult<String> {
        let envelope = TaskEnvelope::new(kind, self.default_policy).in_batch(batch_id);
        if !self.shared.batches.add(batch_id, envelope.id.clone()) {
            return Err(RelayError::not_found("batch", batch_id));
        }
        self.enqueue_envelope(envelope)
    }

    pub fn enqueue_envelope(&self, envelope: TaskEnvelope) -> RelayResult<String> {
        let id = envelope.id.clone();
        debug!("Enqueued {} task {}", envelope.kind.label(), id);
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        if self.shared.tx.send(envelope).is_err() {
            self.shared.finish_one();
            return Err(RelayError::store("task queue is shut down"));
        }
        Ok(id)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued task, retries included, has finished
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work; running tasks are not interrupted
    pub fn shutdown(&self) {
        self.dispatcher.abort();
        info!("Task queue stopped");
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

impl Shared {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn process(self: Arc<Self>, task: TaskEnvelope) {
        if let Some(batch_id) = task.batch_id.as_deref() {
            if self.batches.is_cancelled(batch_id) {
                debug!("Skipping task {}: batch {} cancelled", task.id, batch_id);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                self.finish_one();
                return;
            }
        }

        let outcome = self.runner.run(&task).await;
        match outcome {
            TaskOutcome::Success => {
                debug!("Task {} ({}) succeeded", task.id, task.kind.label());
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                self.finish_one();
            }
            TaskOutcome::Retry(e) if !task.is_final_attempt() => {
                warn!(
                    "Task {} ({}) attempt {}/{} failed, retrying in {:?}: {}",
                    task.id,
                    task.kind.label(),
                    task.attempt,
                    task.policy.max_attempts,
                    task.policy.backoff,
                    e
                );
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                let shared = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(task.policy.backoff).await;
                    if shared.tx.send(task.next_attempt()).is_err() {
                        shared.finish_one();
                    }
                });
            }
            TaskOutcome::Retry(e) | TaskOutcome::Fail(e) => {
                error!(
                    "Task {} ({}) failed after {} attempt(s): {}",
                    task.id,
                    task.kind.label(),
                    task.attempt,
                    e
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.runner.on_failure(&task, &e).await;
                self.finish_one();
            }
        }
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<TaskEnvelope>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(task) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            shared.process(task).await;
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Fails with a retryable error until `succeed_on`
    struct Flaky {
        succeed_on: u32,
        attempts: Mutex<Vec<u32>>,
        failures: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(succeed_on: u32) -> Arc<Self> {
            Arc::new(Self {
                succeed_on,
                attempts: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskRunner for Flaky {
        async fn run(&self, task: &TaskEnvelope) -> TaskOutcome {
            self.attempts.lock().push(task.attempt);
            if task.attempt >= self.succeed_on {
                TaskOutcome::Success
            } else {
                TaskOutcome::Retry(RelayError::execution("flaky"))
            }
        }

        async fn on_failure(&self, task: &TaskEnvelope, error: &RelayError) {
            self.failures
                .lock()
                .push(format!("{}: {}", task.kind.label(), error));
        }
    }

    fn step_task() -> TaskKind {
        TaskKind::ExecuteStep {
            execution_id: "exec-1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let runner = Flaky::new(3);
        let queue = TaskQueue::start(runner.clone(), 2, RetryPolicy::default());
        let started = tokio::time::Instant::now();

        queue.enqueue(step_task()).unwrap();
        queue.wait_idle().await;

        assert_eq!(*runner.attempts.lock(), vec![1, 2, 3]);
        assert!(runner.failures.lock().is_empty());
        assert!(started.elapsed() >= Duration::from_secs(120));
        let stats = queue.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retried, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_failure_invokes_handler_once() {
        let runner = Flaky::new(u32::MAX);
        let queue = TaskQueue::start(runner.clone(), 2, RetryPolicy::default());

        queue.enqueue(step_task()).unwrap();
        queue.wait_idle().await;

        assert_eq!(*runner.attempts.lock(), vec![1, 2, 3]);
        let failures = runner.failures.lock().clone();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("execute_step"));
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        struct Broken;

        #[async_trait]
        impl TaskRunner for Broken {
            async fn run(&self, _task: &TaskEnvelope) -> TaskOutcome {
                TaskOutcome::Fail(RelayError::config("no such chain"))
            }
        }

        let queue = TaskQueue::start(Arc::new(Broken), 1, RetryPolicy::default());
        queue.enqueue(step_task()).unwrap();
        queue.wait_idle().await;
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);
    }

    #[tokio::test]
    async fn test_cancelled_batch_is_skipped() {
        let runner = Flaky::new(1);
        let queue = TaskQueue::start(runner.clone(), 1, RetryPolicy::default());
        let batch = queue.batches().create(None);
        batch.cancel();

        queue.enqueue_in_batch(step_task(), batch.id()).unwrap();
        queue.enqueue(step_task()).unwrap();
        queue.wait_idle().await;

        assert_eq!(runner.attempts.lock().len(), 1);
        assert_eq!(queue.stats().skipped, 1);
        assert_eq!(batch.members().len(), 1);
        assert!(queue.enqueue_in_batch(step_task(), "missing").is_err());
    }
}
