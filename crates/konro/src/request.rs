//! Shared data model: chat requests, generation parameters, token
//! fragments, and usage accounting.
//!
//! A [`ChatRequest`] arrives over the wire with optional sampling fields;
//! admission validates it against configured defaults and freezes it into a
//! [`GenerationParams`] plus a rendered prompt. Everything downstream of
//! admission works with the validated form only.

use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;

/// Speaker role of a single conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// A chat-completion request as received from a client.
///
/// Sampling fields are optional on the wire; [`ChatRequest::validate`]
/// resolves them against server defaults. The request is immutable once
/// accepted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

/// Validated sampling parameters handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Upper bound on generated tokens. Always positive.
    pub max_tokens: u32,
    /// Sampling temperature, `>= 0`.
    pub temperature: f32,
    /// Nucleus sampling mass, in `(0, 1]`.
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl ChatRequest {
    /// Checks the request against declared ranges and resolves optional
    /// sampling fields from `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidRequest`] when the message list is
    /// empty, a message has empty content, or any parameter falls outside
    /// its declared range.
    pub fn validate(
        &self,
        defaults: &GenerationParams,
    ) -> Result<GenerationParams, AdmissionError> {
        if self.messages.is_empty() {
            return Err(AdmissionError::InvalidRequest(
                "messages must not be empty".into(),
            ));
        }
        if self.messages.iter().any(|m| m.content.trim().is_empty()) {
            return Err(AdmissionError::InvalidRequest(
                "message content must not be empty".into(),
            ));
        }

        let max_tokens = self.max_tokens.unwrap_or(defaults.max_tokens);
        if max_tokens == 0 {
            return Err(AdmissionError::InvalidRequest(
                "max_tokens must be positive".into(),
            ));
        }

        let temperature = self.temperature.unwrap_or(defaults.temperature);
        if !(temperature >= 0.0) || !temperature.is_finite() {
            return Err(AdmissionError::InvalidRequest(
                "temperature must be a finite value >= 0".into(),
            ));
        }

        let top_p = self.top_p.unwrap_or(defaults.top_p);
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(AdmissionError::InvalidRequest(
                "top_p must be in (0, 1]".into(),
            ));
        }

        Ok(GenerationParams {
            max_tokens,
            temperature,
            top_p,
        })
    }

    /// Renders the conversation into the chat prompt template the engine
    /// consumes, ending with an open assistant turn.
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::new();
        for message in &self.messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            prompt.push_str("<|im_start|>");
            prompt.push_str(role);
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str("<|im_end|>\n");
        }
        prompt.push_str("<|im_start|>assistant\n");
        prompt
    }
}

/// One incremental piece of generated text.
///
/// Produced by the engine adapter, consumed by the stream layer, never
/// mutated after emission. Indices are per-job, strictly increasing, and
/// gapless; the terminal fragment carries no billable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenFragment {
    /// Position of this fragment within its job's stream, starting at 0.
    pub index: u64,
    pub text: String,
    /// Marks the end of generation for this job.
    pub is_final: bool,
}

impl TokenFragment {
    pub fn text(index: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            is_final: false,
        }
    }

    pub fn terminal(index: u64) -> Self {
        Self {
            index,
            text: String::new(),
            is_final: true,
        }
    }
}

/// Token accounting for one completed job, computed exactly once when the
/// job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    /// Wall-clock seconds between slot lease and terminal event.
    pub processing_time: f64,
}

impl UsageSummary {
    pub fn new(prompt_tokens: usize, completion_tokens: usize, processing_time: f64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            processing_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_request(content: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![Message {
                role: Role::User,
                content: content.into(),
            }],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: false,
        }
    }

    #[test]
    fn validate_fills_defaults() {
        let defaults = GenerationParams::default();
        let params = user_request("hello").validate(&defaults).unwrap();
        assert_eq!(params, defaults);
    }

    #[test]
    fn validate_rejects_empty_messages() {
        let request = ChatRequest {
            messages: vec![],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: false,
        };
        assert!(matches!(
            request.validate(&GenerationParams::default()),
            Err(AdmissionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_rejects_blank_content() {
        let request = user_request("   ");
        assert!(matches!(
            request.validate(&GenerationParams::default()),
            Err(AdmissionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_parameters() {
        let defaults = GenerationParams::default();

        let mut request = user_request("hi");
        request.max_tokens = Some(0);
        assert!(request.validate(&defaults).is_err());

        let mut request = user_request("hi");
        request.temperature = Some(-0.1);
        assert!(request.validate(&defaults).is_err());

        let mut request = user_request("hi");
        request.temperature = Some(f32::NAN);
        assert!(request.validate(&defaults).is_err());

        let mut request = user_request("hi");
        request.top_p = Some(0.0);
        assert!(request.validate(&defaults).is_err());

        let mut request = user_request("hi");
        request.top_p = Some(1.5);
        assert!(request.validate(&defaults).is_err());
    }

    #[test]
    fn validate_accepts_boundary_values() {
        let defaults = GenerationParams::default();
        let mut request = user_request("hi");
        request.temperature = Some(0.0);
        request.top_p = Some(1.0);
        request.max_tokens = Some(1);
        let params = request.validate(&defaults).unwrap();
        assert_eq!(params.max_tokens, 1);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 1.0);
    }

    #[test]
    fn prompt_preserves_conversation_order() {
        let request = ChatRequest {
            messages: vec![
                Message {
                    role: Role::System,
                    content: "be brief".into(),
                },
                Message {
                    role: Role::User,
                    content: "hello".into(),
                },
                Message {
                    role: Role::Assistant,
                    content: "hi".into(),
                },
            ],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: false,
        };
        let prompt = request.to_prompt();
        assert_eq!(
            prompt,
            "<|im_start|>system\nbe brief<|im_end|>\n\
             <|im_start|>user\nhello<|im_end|>\n\
             <|im_start|>assistant\nhi<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn request_deserializes_with_optional_fields() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"temperature":0.2}"#,
        )
        .unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, None);
        assert!(!request.stream);
    }

    #[test]
    fn usage_totals_tokens() {
        let usage = UsageSummary::new(10, 5, 0.25);
        assert_eq!(usage.total_tokens, 15);
    }
}
