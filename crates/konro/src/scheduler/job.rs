//! Job lifecycle primitives: the state machine, the scheduler-owned queue
//! entry, and the caller-facing handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::request::GenerationParams;
use crate::stream::{JobEvent, JobStream};

/// Lifecycle states of a job.
///
/// `Queued -> Running -> {Completed, Failed, TimedOut, Cancelled}`. The
/// four right-hand states are terminal and mutually exclusive; exactly one
/// is reached, and no state is revisited. A queued job may also move
/// directly to `TimedOut` or `Cancelled` without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Queued | JobState::Running)
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => JobState::Queued,
            1 => JobState::Running,
            2 => JobState::Completed,
            3 => JobState::Failed,
            4 => JobState::TimedOut,
            _ => JobState::Cancelled,
        }
    }

    fn code(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Running => 1,
            JobState::Completed => 2,
            JobState::Failed => 3,
            JobState::TimedOut => 4,
            JobState::Cancelled => 5,
        }
    }
}

/// State shared between the scheduler, the executing task, and the caller's
/// handle.
///
/// Transitions go through compare-and-swap so concurrent finishers (relay
/// completion, execution ceiling, cancellation) race safely: exactly one
/// terminal transition wins, and the loser's event is suppressed.
#[derive(Debug)]
pub struct JobShared {
    state: AtomicU8,
    cancel_requested: AtomicBool,
}

impl JobShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(JobState::Queued.code()),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_code(self.state.load(Ordering::SeqCst))
    }

    /// Attempts the `Queued -> Running` transition. Fails if the job
    /// already left the queue state (cancelled or timed out first).
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(
                JobState::Queued.code(),
                JobState::Running.code(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Attempts the transition into `terminal`. Returns `true` only for
    /// the single caller that performs the job's terminal transition.
    pub(crate) fn finish(&self, terminal: JobState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if JobState::from_code(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                terminal.code(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// A job as held by the scheduler while it waits for a slot.
///
/// Exclusively owned by the scheduler for its queued lifetime; the caller
/// holds only a [`JobHandle`].
pub(crate) struct QueuedJob {
    pub id: Uuid,
    pub prompt: String,
    pub params: GenerationParams,
    pub enqueued_at: Instant,
    /// Latest moment at which the job may still be waiting for a slot.
    pub deadline: Instant,
    pub shared: Arc<JobShared>,
    pub events: UnboundedSender<JobEvent>,
}

/// The caller's view of a submitted job: its id, its current state, and
/// the event stream carrying its output.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    shared: Arc<JobShared>,
    stream: JobStream,
}

impl JobHandle {
    pub(crate) fn new(id: Uuid, shared: Arc<JobShared>, stream: JobStream) -> Self {
        Self { id, shared, stream }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    /// Consumes the handle, exposing the raw event stream for incremental
    /// delivery.
    pub fn into_stream(self) -> JobStream {
        self.stream
    }

    /// Buffered consumption; see [`JobStream::collect_buffered`].
    pub async fn collect_buffered(
        self,
    ) -> Result<crate::stream::CompletedChat, crate::error::JobError> {
        self.stream.collect_buffered().await
    }
}
