//! Error taxonomy for the serving gateway.
//!
//! Every failure a caller can observe maps to exactly one variant here, so
//! that the API layer (and automated clients behind it) can branch on the
//! failure kind instead of parsing message text. The scheduler never retries
//! on its own: generation is expensive and non-idempotent with respect to
//! accelerator time, so retry policy belongs to the caller.

use thiserror::Error;

/// Rejections produced at admission time, before a job enters the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The wait queue already holds its configured capacity of pending jobs.
    ///
    /// This is a transient overload signal: clients should back off and
    /// retry. Nothing about the request itself is wrong.
    #[error("wait queue is full")]
    QueueFull,

    /// The request is malformed or carries out-of-range parameters.
    ///
    /// Never retried by the server; the client must fix the request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failures reported by (or about) the inference engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine's state could not be determined at all.
    ///
    /// Distinct from "model not yet loaded", which is a valid, reportable
    /// condition rather than an error.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine reported an error while generating.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Terminal failures of a job that was admitted to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job spent longer than its deadline waiting for a slot, or
    /// execution exceeded the hard ceiling.
    #[error("job timed out before completion")]
    TimedOut,

    /// The caller (or a client disconnect) cancelled the job.
    #[error("job was cancelled")]
    Cancelled,

    /// The engine failed mid-generation; any buffered partial output is
    /// discarded rather than delivered.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The job's event channel closed without a terminal event. Indicates a
    /// scheduler bug or an aborted runtime, never normal operation.
    #[error("job ended without a terminal event")]
    Dropped,
}
