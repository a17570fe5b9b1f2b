//! Collaborator contracts: the agent under evaluation and the LLM it calls.
//!
//! Both are opaque to agentprobe. Instrumentation decorates them through
//! these traits (see [`crate::instrument`]) instead of touching their
//! internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error;

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// What an agent reports back for one goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    /// The agent's own verdict; agentprobe does not grade it.
    pub success: bool,
    pub output: String,
}

impl ReasoningResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    /// The output cut to at most `max_chars` characters, with an ellipsis
    /// when truncated.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.output, max_chars)
    }
}

impl std::fmt::Display for ReasoningResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.output)
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// A reasoning agent: plan/execute/reflect loops are its own business.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "unversioned"
    }

    async fn solve(&self, goal: &str) -> error::Result<ReasoningResult>;

    /// Marker set by instrumentation decorators so wrapping is idempotent.
    fn is_observed(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Saturates rather than wrapping on absurd provider counts.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Absent when the provider did not report usage.
    pub usage: Option<Usage>,
}

/// An LLM completion endpoint.
#[async_trait]
pub trait Llm: Send + Sync {
    fn model(&self) -> &str;

    async fn completion(&self, request: CompletionRequest) -> error::Result<Completion>;

    /// Marker set by instrumentation decorators so wrapping is idempotent.
    fn is_observed(&self) -> bool {
        false
    }
}
