//! The dispatch coordinator.
//!
//! One logical loop owns every scheduling decision: expiring overdue queued
//! jobs, leasing free execution slots to queue heads in FIFO order, and
//! reclaiming slots as delegated executions finish. Execution itself runs
//! on spawned tasks, so a generation blocking for minutes never stalls the
//! coordinator's ability to admit, cancel, or expire other jobs.
//!
//! Slot accounting has a single owner: the coordinator is the only place
//! slots are leased, and releases come back through a shared counter plus a
//! notify.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::job::{JobState, QueuedJob};
use crate::engine::Generator;
use crate::error::JobError;
use crate::stream::{JobEvent, relay};

/// How long the coordinator sleeps when idle before re-checking deadlines.
const IDLE_RECHECK: Duration = Duration::from_millis(100);

/// Everything the dispatch loop shares with the scheduler front end.
pub(crate) struct DispatchContext {
    pub engine: Arc<dyn Generator>,
    pub queue: Arc<Mutex<VecDeque<QueuedJob>>>,
    /// Number of currently leased execution slots. Never exceeds
    /// `max_concurrency`.
    pub active_count: Arc<Mutex<usize>>,
    pub max_concurrency: usize,
    pub execution_ceiling: Duration,
}

pub(crate) async fn dispatch_loop(
    ctx: DispatchContext,
    running: Arc<AtomicBool>,
    notifier: Arc<Notify>,
) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        sweep_expired(&ctx.queue).await;

        let leased = lease_ready(ctx.max_concurrency, &ctx.queue, &ctx.active_count).await;
        if leased.is_empty() {
            // No free slot or nothing waiting; wake on arrival/release or
            // re-check deadlines after a short idle period.
            let _ = tokio::time::timeout(IDLE_RECHECK, notifier.notified()).await;
            continue;
        }

        for job in leased {
            spawn_execution(
                job,
                ctx.engine.clone(),
                ctx.execution_ceiling,
                ctx.active_count.clone(),
                notifier.clone(),
            );
        }
    }
}

/// Removes queued jobs that can no longer usefully run: past their
/// deadline, already terminal (cancelled between sweeps), or with no
/// subscriber left to deliver to.
async fn sweep_expired(queue: &Mutex<VecDeque<QueuedJob>>) {
    let now = Instant::now();
    let mut queue = queue.lock().await;
    if queue.is_empty() {
        return;
    }

    let mut kept = VecDeque::with_capacity(queue.len());
    for job in queue.drain(..) {
        if job.shared.state().is_terminal() {
            continue;
        }
        if job.events.is_closed() {
            // Client went away while the job was still waiting.
            job.shared.request_cancel();
            job.shared.finish(JobState::Cancelled);
            debug!(job_id = %job.id, "queued job dropped by its client");
            continue;
        }
        if now >= job.deadline {
            if job.shared.finish(JobState::TimedOut) {
                let _ = job.events.send(JobEvent::Failed(JobError::TimedOut));
            }
            warn!(
                job_id = %job.id,
                waited_ms = now.duration_since(job.enqueued_at).as_millis() as u64,
                "queued job timed out before a slot freed"
            );
            continue;
        }
        kept.push_back(job);
    }
    *queue = kept;
}

/// Leases free slots to the queue heads, FIFO. The queue and slot count
/// are taken under one critical section so the running-job bound holds
/// under concurrent submits and releases.
async fn lease_ready(
    max_concurrency: usize,
    queue: &Mutex<VecDeque<QueuedJob>>,
    active_count: &Mutex<usize>,
) -> Vec<QueuedJob> {
    let mut queue = queue.lock().await;
    let mut active = active_count.lock().await;

    let available = max_concurrency.saturating_sub(*active);
    if available == 0 || queue.is_empty() {
        return Vec::new();
    }

    let take = available.min(queue.len());
    let leased: Vec<QueuedJob> = queue.drain(0..take).collect();
    *active += leased.len();
    leased
}

/// Runs one leased job on its own task and returns the slot when done.
fn spawn_execution(
    job: QueuedJob,
    engine: Arc<dyn Generator>,
    ceiling: Duration,
    active_count: Arc<Mutex<usize>>,
    notifier: Arc<Notify>,
) {
    tokio::spawn(async move {
        execute(job, engine, ceiling).await;

        let mut active = active_count.lock().await;
        *active = active.saturating_sub(1);
        drop(active);
        // A slot freed; the coordinator may lease again.
        notifier.notify_one();
    });
}

async fn execute(job: QueuedJob, engine: Arc<dyn Generator>, ceiling: Duration) {
    let QueuedJob {
        id,
        prompt,
        params,
        shared,
        events,
        ..
    } = job;

    if !shared.start() {
        // Cancelled or expired between lease and start; the slot goes
        // straight back without touching the engine.
        return;
    }

    let started = Instant::now();
    debug!(job_id = %id, "execution started");

    let run = async {
        match engine.generate(prompt, params).await {
            Ok(generation) => relay(&shared, &events, generation, started).await,
            Err(err) => {
                warn!(job_id = %id, error = %err, "engine rejected generation");
                if shared.finish(JobState::Failed) {
                    let _ = events.send(JobEvent::Failed(JobError::Engine(err)));
                }
            }
        }
    };

    if tokio::time::timeout(ceiling, run).await.is_err() {
        // Hard ceiling: the generation future (and with it the adapter's
        // fragment stream) is dropped where it stands.
        warn!(job_id = %id, ceiling_secs = ceiling.as_secs(), "execution exceeded hard ceiling");
        if shared.finish(JobState::Failed) {
            let _ = events.send(JobEvent::Failed(JobError::TimedOut));
        }
    } else {
        debug!(job_id = %id, state = ?shared.state(), "execution finished");
    }
}
