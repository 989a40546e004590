//! Background task runner
//!
//! Jobs are delivered at least once. A handler answers each delivery with a
//! [`TaskVerdict`]; `RetryAfter` re-enqueues the same task id with its
//! attempt count incremented, so handlers always see how often a job ran.
//!
//! [`TokioTaskRunner`] is a bounded worker pool over an `mpsc` queue.
//! [`DeferredTaskRunner`] only records what was enqueued and runs it when
//! drained, for tests and the CLI.

use crate::error::EngineError;
use crate::extraction::{AttemptOutcome, ExtractionWorker};
use crate::retention::RetentionPurger;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use specmatrix_model::DocumentId;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Work the engine hands to the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Extract one uploaded document
    Extract {
        /// Document to extract
        document_id: DocumentId,
    },
    /// Hard-delete projects past the retention window
    PurgeExpired,
}

/// One delivery of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-chosen id, stable across redeliveries
    pub id: String,
    /// Payload
    pub job: Job,
    /// 1 on first delivery
    pub attempt: u32,
}

impl Task {
    /// First delivery of `job`
    #[must_use]
    pub fn new(id: impl Into<String>, job: Job) -> Self {
        Self {
            id: id.into(),
            job,
            attempt: 1,
        }
    }

    fn redelivery(&self) -> Self {
        Self {
            id: self.id.clone(),
            job: self.job,
            attempt: self.attempt + 1,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.attempt)
    }
}

/// Handler answer for one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskVerdict {
    /// Finished
    Done,
    /// Deliver again after the delay
    RetryAfter(Duration),
    /// Give up
    Failed(String),
}

/// Executes deliveries
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one delivery
    async fn handle(&self, task: &Task) -> TaskVerdict;
}

/// Queue contract used by the engine
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Deliver `job` at least once
    async fn enqueue(&self, task_id: String, job: Job) -> Result<(), EngineError>;

    /// Deliver `job` every `interval`
    async fn schedule(&self, periodic_id: String, interval: Duration, job: Job) -> Result<(), EngineError>;
}

fn closed() -> EngineError {
    EngineError::Internal("task queue closed".into())
}

/// Worker pool on the tokio runtime
pub struct TokioTaskRunner {
    sender: mpsc::Sender<Task>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioTaskRunner {
    /// Spawn `workers` workers sharing a queue of `capacity`
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(handler: Arc<dyn TaskHandler>, workers: usize, capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Task>(capacity.max(1));
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let sender = sender.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(task) = next else { break };
                        Self::deliver(worker, handler.as_ref(), &sender, task).await;
                    }
                    tracing::debug!(worker, "task worker stopped");
                })
            })
            .collect();

        Arc::new(Self {
            sender,
            handles: Mutex::new(handles),
        })
    }

    async fn deliver(worker: usize, handler: &dyn TaskHandler, sender: &mpsc::Sender<Task>, task: Task) {
        tracing::debug!(worker, task = %task, "task delivered");
        match handler.handle(&task).await {
            TaskVerdict::Done => {}
            TaskVerdict::RetryAfter(delay) => {
                let sender = sender.clone();
                let next = task.redelivery();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if sender.send(next).await.is_err() {
                        tracing::warn!("task queue closed before redelivery");
                    }
                });
            }
            TaskVerdict::Failed(reason) => {
                tracing::error!(task = %task, %reason, "task failed");
            }
        }
    }

    /// Stop workers and periodic schedules
    pub fn shutdown(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TokioTaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl TaskRunner for TokioTaskRunner {
    async fn enqueue(&self, task_id: String, job: Job) -> Result<(), EngineError> {
        self.sender
            .send(Task::new(task_id, job))
            .await
            .map_err(|_| closed())
    }

    async fn schedule(&self, periodic_id: String, interval: Duration, job: Job) -> Result<(), EngineError> {
        if interval.is_zero() {
            return Err(EngineError::InvalidInput("schedule interval must be positive".into()));
        }
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let mut run = 0_u64;
            loop {
                ticker.tick().await;
                run += 1;
                if sender.send(Task::new(format!("{periodic_id}-{run}"), job)).await.is_err() {
                    break;
                }
            }
        });
        self.handles.lock().push(handle);
        Ok(())
    }
}

/// Records tasks and runs them on demand
#[derive(Debug, Default)]
pub struct DeferredTaskRunner {
    queue: Mutex<VecDeque<Task>>,
    schedules: Mutex<Vec<(String, Duration, Job)>>,
}

impl DeferredTaskRunner {
    /// Empty runner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting to run
    #[must_use]
    pub fn pending(&self) -> Vec<Task> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Registered periodic jobs
    #[must_use]
    pub fn schedules(&self) -> Vec<(String, Duration, Job)> {
        self.schedules.lock().clone()
    }

    /// Run queued tasks, including redeliveries, until the queue is empty
    ///
    /// Returns every delivery with its verdict, in order.
    pub async fn drain(&self, handler: &dyn TaskHandler) -> Vec<(Task, TaskVerdict)> {
        let mut log = Vec::new();
        loop {
            let next = self.queue.lock().pop_front();
            let Some(task) = next else { break };
            let verdict = handler.handle(&task).await;
            if let TaskVerdict::RetryAfter(delay) = &verdict {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                self.queue.lock().push_back(task.redelivery());
            }
            log.push((task, verdict));
        }
        log
    }

    /// Fire every periodic job once
    pub async fn tick(&self, handler: &dyn TaskHandler) -> Vec<(Task, TaskVerdict)> {
        let due: Vec<Task> = self
            .schedules
            .lock()
            .iter()
            .map(|(id, _, job)| Task::new(id.clone(), *job))
            .collect();
        self.queue.lock().extend(due);
        self.drain(handler).await
    }
}

#[async_trait]
impl TaskRunner for DeferredTaskRunner {
    async fn enqueue(&self, task_id: String, job: Job) -> Result<(), EngineError> {
        self.queue.lock().push_back(Task::new(task_id, job));
        Ok(())
    }

    async fn schedule(&self, periodic_id: String, interval: Duration, job: Job) -> Result<(), EngineError> {
        self.schedules.lock().push((periodic_id, interval, job));
        Ok(())
    }
}

/// Handler for the engine's own jobs
pub struct BackgroundJobs {
    worker: Arc<ExtractionWorker>,
    purger: RetentionPurger,
}

impl BackgroundJobs {
    pub(crate) fn new(worker: Arc<ExtractionWorker>, purger: RetentionPurger) -> Self {
        Self { worker, purger }
    }

    async fn extract(&self, task: &Task, document_id: DocumentId) -> TaskVerdict {
        let backoff = self.worker.config().backoff();
        match self.worker.redeliver(document_id, task.attempt).await {
            Ok(AttemptOutcome::Completed { .. } | AttemptOutcome::Skipped { .. }) => TaskVerdict::Done,
            Ok(AttemptOutcome::Failed {
                will_retry: true, ..
            }) => TaskVerdict::RetryAfter(backoff),
            Ok(AttemptOutcome::Failed {
                attempts, error, ..
            }) => {
                let err = EngineError::RetryExhausted {
                    document_id,
                    attempts,
                    last_error: error,
                };
                TaskVerdict::Failed(err.to_string())
            }
            Err(err) if err.is_retryable() && task.attempt <= self.worker.config().max_attempts => {
                tracing::warn!(task = %task, error = %err, "extraction bookkeeping failed, redelivering");
                TaskVerdict::RetryAfter(backoff)
            }
            Err(err) => TaskVerdict::Failed(err.to_string()),
        }
    }
}

#[async_trait]
impl TaskHandler for BackgroundJobs {
    async fn handle(&self, task: &Task) -> TaskVerdict {
        match task.job {
            Job::Extract { document_id } => self.extract(task, document_id).await,
            Job::PurgeExpired => {
                let report = self.purger.run(Utc::now());
                if report.failed.is_empty() {
                    TaskVerdict::Done
                } else {
                    TaskVerdict::Failed(format!("{} project purges failed", report.failed.len()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailTwice {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FailTwice {
        async fn handle(&self, task: &Task) -> TaskVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task.attempt < 3 {
                TaskVerdict::RetryAfter(Duration::ZERO)
            } else {
                TaskVerdict::Done
            }
        }
    }

    #[test]
    fn deferred_runner_redelivers_with_attempt_count() {
        let runner = DeferredTaskRunner::new();
        tokio_test::block_on(runner.enqueue("t".into(), Job::PurgeExpired)).unwrap();
        let handler = FailTwice {
            calls: AtomicU32::new(0),
        };

        let log = tokio_test::block_on(runner.drain(&handler));
        let attempts: Vec<u32> = log.iter().map(|(t, _)| t.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(log[2].1, TaskVerdict::Done);
        assert!(runner.pending().is_empty());
    }

    #[tokio::test]
    async fn tokio_runner_delivers_until_done() {
        let handler = Arc::new(FailTwice {
            calls: AtomicU32::new(0),
        });
        let runner = TokioTaskRunner::start(Arc::clone(&handler) as Arc<dyn TaskHandler>, 2, 8);
        runner.enqueue("t".into(), Job::PurgeExpired).await.unwrap();

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        runner.shutdown();
    }

    #[tokio::test]
    async fn zero_interval_schedule_is_rejected() {
        let handler = Arc::new(FailTwice {
            calls: AtomicU32::new(0),
        });
        let runner = TokioTaskRunner::start(handler, 1, 1);
        let err = runner
            .schedule("purge".into(), Duration::ZERO, Job::PurgeExpired)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
