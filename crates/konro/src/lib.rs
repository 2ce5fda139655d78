//! # Konro
//!
//! A chat-completion serving gateway for a single large-language-model
//! inference engine running on one or a few accelerators with a fixed,
//! large memory footprint.
//!
//! ## Overview
//!
//! The hard problem this crate solves is not model math - an external
//! engine performs tokenization, generation, and detokenization - but the
//! serving path in front of it: admitting, queueing, executing, and
//! streaming results for many concurrent chat requests against a resource
//! that can only run a bounded number of generations at once, while still
//! answering health probes promptly and failing predictably under
//! overload.
//!
//! Key components include:
//!
//! - An admission scheduler with a FIFO wait queue, fail-fast capacity
//!   limits, and a bounded pool of execution slots
//! - A stream multiplexer delivering token fragments incrementally or as
//!   one buffered response, with usage accounting
//! - A TTL-cached health monitor that stays responsive under load
//! - An axum HTTP gateway mapping each failure kind to a distinct status
//!
//! ## Architecture
//!
//! ```text
//! HTTP API -> Admission Scheduler -> Engine Adapter -> Stream Multiplexer -> HTTP API
//!                    |                                        ^
//!                    +--- dispatch coordinator (slots, FIFO) --+
//! ```
//!
//! One logical dispatch coordinator owns every scheduling decision; engine
//! executions run on delegated tasks so a generation blocking for minutes
//! never stalls admission, cancellation, or health queries. The number of
//! concurrently running generations never exceeds the configured slot
//! count, which is the single serialization point guarding accelerator
//! memory.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use konro::config::SchedulerConfig;
//! use konro::engine::echo::EchoEngine;
//! use konro::request::{ChatRequest, Message, Role};
//! use konro::scheduler::Scheduler;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let engine = Arc::new(EchoEngine::new());
//!     let scheduler = Scheduler::new(engine, SchedulerConfig::default());
//!
//!     let handle = scheduler
//!         .submit(ChatRequest {
//!             messages: vec![Message {
//!                 role: Role::User,
//!                 content: "hello there".into(),
//!             }],
//!             max_tokens: None,
//!             temperature: None,
//!             top_p: None,
//!             stream: false,
//!         })
//!         .await
//!         .expect("admitted");
//!
//!     let done = handle.collect_buffered().await.expect("completed");
//!     assert_eq!(done.text, "hello there");
//! }
//! ```
//!
//! ## Durability
//!
//! The gateway is stateless across restarts: all jobs are in-memory and
//! lost when the process exits. Clients are expected to retry.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod request;
pub mod scheduler;
pub mod stream;
