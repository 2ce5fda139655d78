//! # Stream Multiplexer
//!
//! Converts the engine's lazy fragment sequence into per-client delivery.
//! Each job gets an unbounded event channel: the execution task pushes
//! [`JobEvent`]s as fragments arrive, and the subscriber consumes them
//! either incrementally (streaming mode) or collected into one buffered
//! response (non-streaming mode).
//!
//! Delivery guarantees:
//!
//! - Fragments are forwarded in arrival order with no buffering beyond the
//!   channel itself.
//! - Fragment indices are checked for continuity as they pass through; a
//!   gap or regression from the adapter fails the job rather than
//!   delivering a corrupted sequence.
//! - Exactly one terminal event ([`JobEvent::Completed`] or
//!   [`JobEvent::Failed`]) follows the fragments.
//! - In buffered mode a failure discards the accumulated partial text; in
//!   streaming mode fragments already sent are not retracted, but nothing
//!   further follows the failure event.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::engine::Generation;
use crate::error::{EngineError, JobError};
use crate::request::{TokenFragment, UsageSummary};
use crate::scheduler::job::{JobShared, JobState};

/// One delivery to a job's subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// An incremental piece of generated text, including the terminal
    /// marker fragment.
    Fragment(TokenFragment),
    /// Generation finished normally; accounting is final.
    Completed(UsageSummary),
    /// Generation ended abnormally; no further events follow.
    Failed(JobError),
}

/// An asynchronous stream of [`JobEvent`]s for a single job.
///
/// Wraps the job's channel receiver in the `futures` [`Stream`] interface
/// so it composes with stream combinators and the SSE layer. Returns
/// `None` once the sender side is dropped.
#[derive(Debug)]
pub struct JobStream {
    receiver: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<JobEvent>) -> Self {
        Self { receiver }
    }

    /// Buffered (non-streaming) consumption: concatenates every
    /// non-terminal fragment into the full response text.
    ///
    /// # Errors
    ///
    /// Propagates the job's terminal failure. Partial text accumulated
    /// before a failure is discarded, never returned. [`JobError::Dropped`]
    /// is returned if the channel closes without a terminal event.
    pub async fn collect_buffered(mut self) -> Result<CompletedChat, JobError> {
        let mut text = String::new();
        while let Some(event) = self.next().await {
            match event {
                JobEvent::Fragment(fragment) => {
                    if !fragment.is_final {
                        text.push_str(&fragment.text);
                    }
                }
                JobEvent::Completed(usage) => return Ok(CompletedChat { text, usage }),
                JobEvent::Failed(err) => return Err(err),
            }
        }
        Err(JobError::Dropped)
    }
}

impl Stream for JobStream {
    type Item = JobEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}

/// Fully buffered result of one completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedChat {
    pub text: String,
    pub usage: UsageSummary,
}

/// Drives one engine fragment stream to the job's subscriber.
///
/// This is the multiplexing step proper: it forwards fragments in order,
/// counts completion tokens, watches the cancellation flag between
/// fragments, and performs the job's single terminal transition. Every
/// event is emitted only if the corresponding state transition won, so a
/// racing timeout or cancel can never produce a second terminal event.
pub(crate) async fn relay(
    shared: &JobShared,
    events: &mpsc::UnboundedSender<JobEvent>,
    generation: Generation,
    started: Instant,
) {
    let Generation {
        prompt_tokens,
        mut fragments,
    } = generation;
    let mut completion_tokens: usize = 0;
    let mut next_index: u64 = 0;

    while let Some(item) = fragments.next().await {
        // Cancellation takes effect at fragment granularity: stop
        // delivering, release happens at the caller's decision point.
        if shared.is_cancelled() {
            if shared.finish(JobState::Cancelled) {
                let _ = events.send(JobEvent::Failed(JobError::Cancelled));
            }
            return;
        }

        match item {
            Ok(fragment) => {
                if fragment.index != next_index {
                    let reason = format!(
                        "adapter emitted fragment index {} (expected {})",
                        fragment.index, next_index
                    );
                    if shared.finish(JobState::Failed) {
                        let _ = events.send(JobEvent::Failed(JobError::Engine(
                            EngineError::Generation(reason),
                        )));
                    }
                    return;
                }
                next_index += 1;

                if fragment.is_final {
                    let usage = UsageSummary::new(
                        prompt_tokens,
                        completion_tokens,
                        started.elapsed().as_secs_f64(),
                    );
                    if shared.finish(JobState::Completed) {
                        let _ = events.send(JobEvent::Fragment(fragment));
                        let _ = events.send(JobEvent::Completed(usage));
                    }
                    return;
                }

                completion_tokens += 1;
                if events.send(JobEvent::Fragment(fragment)).is_err() {
                    // Subscriber dropped its stream: a client disconnect.
                    shared.request_cancel();
                    shared.finish(JobState::Cancelled);
                    return;
                }
            }
            Err(err) => {
                if shared.finish(JobState::Failed) {
                    let _ = events.send(JobEvent::Failed(JobError::Engine(err)));
                }
                return;
            }
        }
    }

    // The adapter's stream ended without a terminal fragment.
    if shared.finish(JobState::Failed) {
        let _ = events.send(JobEvent::Failed(JobError::Engine(EngineError::Generation(
            "fragment stream ended without a terminal fragment".into(),
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TokenFragment;
    use std::sync::Arc;
    use std::time::Duration;

    fn fragment_stream(
        items: Vec<Result<TokenFragment, EngineError>>,
    ) -> crate::engine::FragmentStream {
        Box::pin(futures::stream::iter(items))
    }

    fn running_job() -> (Arc<JobShared>, mpsc::UnboundedSender<JobEvent>, JobStream) {
        let shared = Arc::new(JobShared::new());
        assert!(shared.start());
        let (tx, rx) = mpsc::unbounded_channel();
        (shared, tx, JobStream::new(rx))
    }

    #[tokio::test]
    async fn relay_delivers_fragments_and_completes() {
        let (shared, tx, stream) = running_job();
        let generation = Generation {
            prompt_tokens: 3,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "hello")),
                Ok(TokenFragment::text(1, " world")),
                Ok(TokenFragment::terminal(2)),
            ]),
        };

        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        let result = stream.collect_buffered().await.unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.usage.prompt_tokens, 3);
        assert_eq!(result.usage.completion_tokens, 2);
        assert_eq!(result.usage.total_tokens, 5);
        assert_eq!(shared.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn streamed_indices_are_gapless() {
        let (shared, tx, stream) = running_job();
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "a")),
                Ok(TokenFragment::text(1, "b")),
                Ok(TokenFragment::text(2, "c")),
                Ok(TokenFragment::terminal(3)),
            ]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        let events: Vec<_> = stream.collect::<Vec<_>>().await;
        let indices: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Fragment(f) => Some(f.index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn relay_fails_job_on_index_gap() {
        let (shared, tx, stream) = running_job();
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "a")),
                Ok(TokenFragment::text(2, "c")),
            ]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        assert!(matches!(
            stream.collect_buffered().await,
            Err(JobError::Engine(EngineError::Generation(_)))
        ));
        assert_eq!(shared.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn buffered_mode_discards_partial_text_on_failure() {
        let (shared, tx, stream) = running_job();
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "partial")),
                Err(EngineError::Generation("device lost".into())),
            ]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        let err = stream.collect_buffered().await.unwrap_err();
        assert!(matches!(err, JobError::Engine(_)));
        assert_eq!(shared.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn relay_stops_delivering_after_cancellation() {
        let (shared, tx, mut stream) = running_job();
        shared.request_cancel();
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "never")),
                Ok(TokenFragment::terminal(1)),
            ]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        assert_eq!(
            stream.next().await,
            Some(JobEvent::Failed(JobError::Cancelled))
        );
        assert_eq!(stream.next().await, None);
        assert_eq!(shared.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn dropped_subscriber_cancels_the_job() {
        let (shared, tx, stream) = running_job();
        drop(stream);
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![
                Ok(TokenFragment::text(0, "a")),
                Ok(TokenFragment::text(1, "b")),
                Ok(TokenFragment::terminal(2)),
            ]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        assert_eq!(shared.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn missing_terminal_fragment_fails_the_job() {
        let (shared, tx, stream) = running_job();
        let generation = Generation {
            prompt_tokens: 1,
            fragments: fragment_stream(vec![Ok(TokenFragment::text(0, "a"))]),
        };
        relay(&shared, &tx, generation, Instant::now()).await;
        drop(tx);

        assert!(matches!(stream.collect_buffered().await, Err(JobError::Engine(_))));
        assert_eq!(shared.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn collect_reports_dropped_channel() {
        let (_shared, tx, stream) = running_job();
        drop(tx);
        assert!(matches!(stream.collect_buffered().await, Err(JobError::Dropped)));
    }

    #[tokio::test]
    async fn processing_time_reflects_elapsed_wall_clock() {
        let (shared, tx, stream) = running_job();
        let started = Instant::now() - Duration::from_millis(50);
        let generation = Generation {
            prompt_tokens: 0,
            fragments: fragment_stream(vec![Ok(TokenFragment::terminal(0))]),
        };
        relay(&shared, &tx, generation, started).await;
        drop(tx);

        let result = stream.collect_buffered().await.unwrap();
        assert!(result.usage.processing_time >= 0.05);
    }
}
