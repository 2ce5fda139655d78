//! Scripted engine and probe used by scheduler, stream, and gateway tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{FragmentStream, Generation, Generator, GpuMemory, ResourceProbe};
use crate::error::EngineError;
use crate::request::{GenerationParams, TokenFragment};

/// Decrements the active-generation counter when the fragment stream is
/// dropped, whether it ran to completion or was cancelled.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A deterministic [`Generator`] that emits a scripted word sequence.
///
/// Tests use it to observe exactly what the scheduler did: which prompts
/// started, in what order, and how many generations ran at once.
pub(crate) struct MockEngine {
    words: Vec<String>,
    fragment_delay: Duration,
    /// When set, generation blocks until the watch value flips to `true`.
    gate: Option<watch::Receiver<bool>>,
    /// Yield an engine error after this many text fragments.
    fail_after: Option<usize>,
    /// Skip an index to simulate a misbehaving adapter.
    corrupt_indices: bool,
    started: Mutex<Vec<String>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
            fragment_delay: Duration::ZERO,
            gate: None,
            fail_after: None,
            corrupt_indices: false,
            started: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    /// Holds every generation until `release` is sent through the returned
    /// sender's channel.
    pub fn gated(mut self) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        self.gate = Some(rx);
        (self, tx)
    }

    pub fn failing_after(mut self, fragments: usize) -> Self {
        self.fail_after = Some(fragments);
        self
    }

    pub fn with_corrupt_indices(mut self) -> Self {
        self.corrupt_indices = true;
        self
    }

    /// Prompts passed to `generate`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Highest number of concurrently live generations observed so far.
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockEngine {
    async fn generate(
        &self,
        prompt: String,
        _params: GenerationParams,
    ) -> Result<Generation, EngineError> {
        let prompt_tokens = prompt.split_whitespace().count();
        self.started.lock().unwrap().push(prompt);

        let live = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(live, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());

        let words = self.words.clone();
        let delay = self.fragment_delay;
        let mut gate = self.gate.clone();
        let fail_after = self.fail_after;
        let corrupt = self.corrupt_indices;

        let fragments: FragmentStream = Box::pin(async_stream::stream! {
            let _guard = guard;
            if let Some(gate) = gate.as_mut() {
                while !*gate.borrow() {
                    if gate.changed().await.is_err() {
                        break;
                    }
                }
            }
            let mut index = 0u64;
            for (position, word) in words.iter().enumerate() {
                if let Some(limit) = fail_after {
                    if position == limit {
                        yield Err(EngineError::Generation("injected failure".into()));
                        return;
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let text = if position == 0 {
                    word.clone()
                } else {
                    format!(" {word}")
                };
                yield Ok(TokenFragment::text(index, text));
                index += 1;
                if corrupt {
                    index += 1;
                }
            }
            yield Ok(TokenFragment::terminal(index));
        });

        Ok(Generation {
            prompt_tokens,
            fragments,
        })
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// A [`ResourceProbe`] with scripted answers and a call counter.
pub(crate) struct MockProbe {
    pub loaded: bool,
    pub unavailable: bool,
    pub calls: AtomicUsize,
}

impl MockProbe {
    pub fn loaded() -> Self {
        Self {
            loaded: true,
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn loading() -> Self {
        Self {
            loaded: false,
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            loaded: false,
            unavailable: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProbe for MockProbe {
    async fn model_loaded(&self) -> Result<bool, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(EngineError::Unavailable("probe offline".into()));
        }
        Ok(self.loaded)
    }

    async fn gpu_memory(&self) -> Result<BTreeMap<String, GpuMemory>, EngineError> {
        let mut devices = BTreeMap::new();
        devices.insert(
            "gpu_0".to_string(),
            GpuMemory {
                used_mb: 20480.0,
                total_mb: 40960.0,
                utilization: 50.0,
            },
        );
        Ok(devices)
    }

    async fn system_memory_percent(&self) -> Result<f64, EngineError> {
        Ok(42.5)
    }
}
