//! Development engine that echoes the request back.
//!
//! The real model engine is deployed as a separate artifact and injected
//! where this stub sits. `EchoEngine` keeps the binary runnable end to end:
//! it streams the final user turn back word by word with a small delay, so
//! streaming, scheduling, and accounting behavior can be exercised without
//! an accelerator.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{FragmentStream, Generation, Generator, GpuMemory, ResourceProbe};
use crate::error::EngineError;
use crate::request::{GenerationParams, TokenFragment};

pub struct EchoEngine {
    model_id: String,
    fragment_delay: Duration,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self {
            model_id: "echo".into(),
            fragment_delay: Duration::from_millis(20),
        }
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }
}

impl Default for EchoEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts the text of the last user turn from the rendered prompt.
///
/// The prompt template closes every turn with `<|im_end|>` and leaves the
/// trailing assistant turn open, so the last closed `user` block is the
/// text to echo.
fn last_user_turn(prompt: &str) -> String {
    prompt
        .split("<|im_start|>user\n")
        .last()
        .and_then(|tail| tail.split("<|im_end|>").next())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[async_trait]
impl Generator for EchoEngine {
    async fn generate(
        &self,
        prompt: String,
        params: GenerationParams,
    ) -> Result<Generation, EngineError> {
        let prompt_tokens = prompt.split_whitespace().count();
        let text = last_user_turn(&prompt);
        let words: Vec<String> = text
            .split_whitespace()
            .take(params.max_tokens as usize)
            .map(|w| w.to_string())
            .collect();
        let delay = self.fragment_delay;

        let fragments: FragmentStream = Box::pin(async_stream::stream! {
            let mut index = 0u64;
            for (position, word) in words.iter().enumerate() {
                if position > 0 {
                    tokio::time::sleep(delay).await;
                    yield Ok(TokenFragment::text(index, format!(" {word}")));
                } else {
                    yield Ok(TokenFragment::text(index, word.clone()));
                }
                index += 1;
            }
            yield Ok(TokenFragment::terminal(index));
        });

        Ok(Generation {
            prompt_tokens,
            fragments,
        })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl ResourceProbe for EchoEngine {
    async fn model_loaded(&self) -> Result<bool, EngineError> {
        Ok(true)
    }

    async fn gpu_memory(&self) -> Result<BTreeMap<String, GpuMemory>, EngineError> {
        Ok(BTreeMap::new())
    }

    async fn system_memory_percent(&self) -> Result<f64, EngineError> {
        Ok(0.0)
    }
}
