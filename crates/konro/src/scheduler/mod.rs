//! # Admission Scheduler
//!
//! The heart of the gateway: accepts completion requests, enforces the
//! concurrency bound and queue capacity, assigns execution slots fairly,
//! and applies timeouts.
//!
//! ## Key components
//!
//! * [`Scheduler`] - the admission front end: `submit` and `cancel`.
//! * [`JobHandle`] - the caller's view of an admitted job.
//! * A dispatch coordinator (internal) that owns every scheduling
//!   decision; see the `dispatch` module.
//!
//! ## Scheduling model
//!
//! Admission is FIFO with fail-fast overflow: a request either enters the
//! tail of the wait queue immediately or is rejected with
//! [`AdmissionError::QueueFull`]. No priority reordering - simplicity and
//! fairness over throughput. The dispatch coordinator leases at most `C`
//! execution slots; among jobs still waiting when a slot frees, start
//! order equals arrival order.
//!
//! Cancellation and queue timeouts take effect no later than the next
//! scheduling decision point. Cancelling a queued job is immediate and
//! free; cancelling a running job stops fragment delivery at the next
//! fragment boundary and returns the slot once the adapter's stream is
//! dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

mod dispatch;
pub(crate) mod job;
mod worker;

pub use job::{JobHandle, JobState};

use crate::config::SchedulerConfig;
use crate::engine::Generator;
use crate::error::{AdmissionError, JobError};
use crate::request::ChatRequest;
use crate::stream::{JobEvent, JobStream};
use dispatch::{DispatchContext, dispatch_loop};
use job::{JobShared, QueuedJob};
use worker::WorkerHandle;

/// Admission front end over the dispatch coordinator.
///
/// `submit`, `cancel`, and the introspection methods are safe to call from
/// arbitrarily many tasks concurrently; all queue and slot mutation is
/// serialized behind the coordinator's locks. Dropping the scheduler shuts
/// the coordinator down.
pub struct Scheduler {
    queue: Arc<Mutex<VecDeque<QueuedJob>>>,
    /// Shared state of every non-terminal job, for cancel-by-id. Pruned
    /// lazily on submit.
    registry: Arc<Mutex<HashMap<Uuid, Arc<JobShared>>>>,
    active_count: Arc<Mutex<usize>>,
    config: SchedulerConfig,
    worker: WorkerHandle,
}

impl Scheduler {
    pub fn new(engine: Arc<dyn Generator>, config: SchedulerConfig) -> Self {
        let queue: Arc<Mutex<VecDeque<QueuedJob>>> = Arc::new(Mutex::new(VecDeque::new()));
        let active_count = Arc::new(Mutex::new(0));

        let worker = WorkerHandle::new({
            let ctx = DispatchContext {
                engine,
                queue: queue.clone(),
                active_count: active_count.clone(),
                max_concurrency: config.max_concurrency,
                execution_ceiling: config.execution_ceiling,
            };
            move |running, notifier| tokio::spawn(dispatch_loop(ctx, running, notifier))
        });

        Self {
            queue,
            registry: Arc::new(Mutex::new(HashMap::new())),
            active_count,
            config,
            worker,
        }
    }

    /// Validates and admits a request.
    ///
    /// On success the job sits at the tail of the FIFO wait queue and the
    /// coordinator is notified; the returned handle is the only way to
    /// retrieve output.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidRequest`] for malformed input,
    /// [`AdmissionError::QueueFull`] when the pending queue already holds
    /// its configured capacity.
    pub async fn submit(&self, request: ChatRequest) -> Result<JobHandle, AdmissionError> {
        let params = request.validate(&self.config.defaults)?;
        let prompt = request.to_prompt();

        let id = Uuid::new_v4();
        let shared = Arc::new(JobShared::new());
        let (events, receiver) = mpsc::unbounded_channel();

        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.config.queue_capacity {
                return Err(AdmissionError::QueueFull);
            }
            let now = Instant::now();
            queue.push_back(QueuedJob {
                id,
                prompt,
                params,
                enqueued_at: now,
                deadline: now + self.config.queue_timeout,
                shared: shared.clone(),
                events,
            });
        }

        {
            let mut registry = self.registry.lock().await;
            registry.retain(|_, entry| !entry.state().is_terminal());
            registry.insert(id, shared.clone());
        }

        self.worker.notify();
        debug!(job_id = %id, "job admitted");
        Ok(JobHandle::new(id, shared, JobStream::new(receiver)))
    }

    /// Requests cancellation of a job.
    ///
    /// A still-queued job is removed immediately without ever leasing a
    /// slot. A running job has its cancellation flag set; delivery stops at
    /// the next fragment and the slot is reclaimed at the next scheduling
    /// decision point. Returns `false` for unknown or already-terminal
    /// jobs.
    pub async fn cancel(&self, id: Uuid) -> bool {
        {
            let mut queue = self.queue.lock().await;
            if let Some(position) = queue.iter().position(|job| job.id == id) {
                if let Some(job) = queue.remove(position) {
                    job.shared.request_cancel();
                    if job.shared.finish(JobState::Cancelled) {
                        let _ = job.events.send(JobEvent::Failed(JobError::Cancelled));
                    }
                    debug!(job_id = %id, "queued job cancelled");
                    return true;
                }
            }
        }

        let registry = self.registry.lock().await;
        match registry.get(&id) {
            Some(shared) if !shared.state().is_terminal() => {
                shared.request_cancel();
                debug!(job_id = %id, "running job flagged for cancellation");
                true
            }
            _ => false,
        }
    }

    /// Number of jobs waiting for a slot.
    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Number of currently leased execution slots.
    pub async fn running(&self) -> usize {
        *self.active_count.lock().await
    }
}
