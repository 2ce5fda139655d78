//! # Engine Adapter Interface
//!
//! The inference engine itself (model loading, tokenization, forward-pass
//! generation, detokenization) is an external collaborator. This module
//! defines the seam the gateway talks through, so the scheduling and
//! streaming logic stays independent of any particular engine.
//!
//! ## Key abstractions
//!
//! * [`Generator`] - starts one generation and returns a lazy stream of
//!   [`TokenFragment`]s.
//! * [`ResourceProbe`] - answers the health monitor's questions about
//!   model state and accelerator memory.
//!
//! ## Concurrency contract
//!
//! The engine is assumed to support at most `C` concurrent generations
//! without exhausting accelerator memory. The gateway never calls
//! [`Generator::generate`] outside a leased execution slot; the engine does
//! not need to defend against over-admission itself.
//!
//! ## Cancellation
//!
//! Cancellation is drop-based: when a job is cancelled the scheduler stops
//! polling and drops the fragment stream. An adapter that runs generation
//! on a detached task will keep computing with its output discarded; that
//! compute cannot be reclaimed early. Adapters that generate lazily inside
//! the stream stop at the next fragment boundary.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;

use crate::error::EngineError;
use crate::request::{GenerationParams, TokenFragment};

pub mod echo;

#[cfg(test)]
pub(crate) mod mock;

/// Lazy sequence of token fragments produced by one generation.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = Result<TokenFragment, EngineError>> + Send + 'static>>;

/// One admitted generation: the prompt's token count plus the fragment
/// stream that yields completion tokens as they are produced.
pub struct Generation {
    pub prompt_tokens: usize,
    pub fragments: FragmentStream,
}

/// A model engine capable of autoregressive text generation.
///
/// Implementations may block internally for seconds to minutes per call;
/// the scheduler always drives them from delegated tasks so the dispatch
/// coordinator stays responsive.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Starts a generation for `prompt` under the given sampling
    /// parameters.
    ///
    /// Returns immediately with the prompt token count and a stream that
    /// yields fragments with per-job indices `0, 1, 2, ...` and a terminal
    /// fragment (`is_final`) after the last token. Generation stops on EOS
    /// or after `params.max_tokens` fragments.
    async fn generate(
        &self,
        prompt: String,
        params: GenerationParams,
    ) -> Result<Generation, EngineError>;

    /// Identifier of the loaded model, reported in responses.
    fn model_id(&self) -> &str;
}

/// Memory figures for one accelerator device, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpuMemory {
    pub used_mb: f64,
    pub total_mb: f64,
    /// Fraction of device memory in use, as a percentage.
    pub utilization: f64,
}

/// Read-only view of engine and host resource state.
///
/// All methods must answer in O(1) relative to serving load; the health
/// monitor calls them on every (uncached) probe.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Whether the model has finished loading.
    ///
    /// # Errors
    ///
    /// [`EngineError::Unavailable`] only when the loaded state cannot be
    /// determined at all. "Not loaded yet" is a valid `Ok(false)`.
    async fn model_loaded(&self) -> Result<bool, EngineError>;

    /// Per-device accelerator memory usage, keyed by device id.
    async fn gpu_memory(&self) -> Result<BTreeMap<String, GpuMemory>, EngineError>;

    /// Host memory in use, as a percentage.
    async fn system_memory_percent(&self) -> Result<f64, EngineError>;
}
