//! Server-sent-event framing for streaming completions.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::request::UsageSummary;
use crate::stream::{JobEvent, JobStream};

#[derive(Serialize)]
struct StreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Serialize)]
struct StreamChoice {
    index: usize,
    delta: StreamDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ChatStreamChunk {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageSummary>,
}

impl ChatStreamChunk {
    fn delta(id: &str, created: i64, model: &str, content: String) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    content: Some(content),
                },
                finish_reason: None,
            }],
            usage: None,
        }
    }

    fn finish(
        id: &str,
        created: i64,
        model: &str,
        reason: &'static str,
        usage: Option<UsageSummary>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta { content: None },
                finish_reason: Some(reason),
            }],
            usage,
        }
    }

    fn into_event(self) -> Event {
        Event::default().data(serde_json::to_string(&self).unwrap_or_default())
    }
}

/// Frames a job's event stream as SSE chunks.
///
/// Fragments become delta chunks in arrival order. Normal completion emits
/// a final chunk carrying `finish_reason: "stop"` plus the usage record,
/// then the `[DONE]` marker. A failure emits a chunk with `finish_reason:
/// "error"` and ends the stream without `[DONE]`, signalling the abnormal
/// end; fragments already sent are not retracted.
pub fn chat_stream_sse(
    id: Uuid,
    model: String,
    events: JobStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let id = format!("chatcmpl-{id}");
        let created = chrono::Utc::now().timestamp();
        let mut events = events;

        while let Some(event) = events.next().await {
            match event {
                JobEvent::Fragment(fragment) => {
                    // The terminal marker carries no text; the usage chunk
                    // that follows closes the stream.
                    if !fragment.is_final {
                        yield Ok(ChatStreamChunk::delta(&id, created, &model, fragment.text)
                            .into_event());
                    }
                }
                JobEvent::Completed(usage) => {
                    yield Ok(ChatStreamChunk::finish(&id, created, &model, "stop", Some(usage))
                        .into_event());
                    yield Ok(Event::default().data("[DONE]"));
                    return;
                }
                JobEvent::Failed(_) => {
                    yield Ok(ChatStreamChunk::finish(&id, created, &model, "error", None)
                        .into_event());
                    return;
                }
            }
        }
    };

    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::request::TokenFragment;
    use tokio::sync::mpsc;

    async fn rendered(events: Vec<JobEvent>) -> String {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);

        let sse = chat_stream_sse(Uuid::new_v4(), "test-model".into(), JobStream::new(rx));
        let response = axum::response::IntoResponse::into_response(sse);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn completion_ends_with_stop_and_done() {
        let body = rendered(vec![
            JobEvent::Fragment(TokenFragment::text(0, "hi")),
            JobEvent::Fragment(TokenFragment::terminal(1)),
            JobEvent::Completed(UsageSummary::new(2, 1, 0.1)),
        ])
        .await;

        assert!(body.contains(r#""content":"hi""#));
        assert!(body.contains(r#""finish_reason":"stop""#));
        assert!(body.contains(r#""completion_tokens":1"#));
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn failure_signals_abnormal_end_without_done() {
        let body = rendered(vec![
            JobEvent::Fragment(TokenFragment::text(0, "partial")),
            JobEvent::Failed(JobError::TimedOut),
        ])
        .await;

        assert!(body.contains(r#""content":"partial""#));
        assert!(body.contains(r#""finish_reason":"error""#));
        assert!(!body.contains("[DONE]"));
    }

    #[tokio::test]
    async fn terminal_marker_emits_no_delta_chunk() {
        let body = rendered(vec![
            JobEvent::Fragment(TokenFragment::terminal(0)),
            JobEvent::Completed(UsageSummary::new(0, 0, 0.0)),
        ])
        .await;

        assert!(!body.contains(r#""content":"#));
        assert!(body.contains(r#""finish_reason":"stop""#));
    }
}
