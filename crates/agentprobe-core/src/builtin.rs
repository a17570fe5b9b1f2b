//! Built-in agent profiles, so the CLI can run a dataset end to end.
//!
//! | Profile  | Behaviour |
//! |----------|-----------|
//! | `direct` | Sends the goal (plus optional instructions) to an OpenAI-compatible chat endpoint, one call per goal |
//! | `echo`   | Returns the goal unchanged without calling any LLM; for smoke-testing a pipeline offline |

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, ChatMessage, Completion, CompletionRequest, Llm, ReasoningResult, Usage};
use crate::config::RunConfig;
use crate::error::{self, ProbeError};
use crate::instrument::Instrumentation;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const PROFILES: &[&str] = &["direct", "echo"];

// ---------------------------------------------------------------------------
// Chat completions LLM
// ---------------------------------------------------------------------------

/// Any endpoint speaking the OpenAI `/chat/completions` protocol.
pub struct ChatCompletionsLlm {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl ChatCompletionsLlm {
    pub fn new(model: impl Into<String>, base_url: impl Into<String>) -> error::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProbeError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature: None,
            max_tokens: None,
        })
    }

    /// Model, endpoint, key and sampling parameters from a run configuration.
    pub fn from_config(config: &RunConfig) -> error::Result<Self> {
        let base_url = config
            .base_url()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        url::Url::parse(&base_url)
            .map_err(|e| ProbeError::config(format!("base_url: invalid URL '{base_url}': {e}")))?;

        let mut llm = Self::new(config.model().unwrap_or(DEFAULT_MODEL), base_url)?;
        llm.api_key = config.api_key();
        llm.temperature = config.temperature();
        llm.max_tokens = config.max_tokens();
        Ok(llm)
    }

    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
        });
        if let Some(t) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(m);
        }
        body
    }

    fn parse_response(body: &Value) -> error::Result<Completion> {
        let choice = body["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProbeError::llm("No choices in response"))?;
        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let usage_data = &body["usage"];
        let usage = match (
            usage_data["prompt_tokens"].as_u64(),
            usage_data["completion_tokens"].as_u64(),
        ) {
            (Some(p), Some(c)) => Some(Usage::new(p, c)),
            _ => None,
        };
        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl Llm for ChatCompletionsLlm {
    fn model(&self) -> &str {
        &self.model
    }

    async fn completion(&self, request: CompletionRequest) -> error::Result<Completion> {
        let body = self.build_request_body(&request);
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.json(&body).send().await.map_err(|e| ProbeError::Llm {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        })?;

        let status = resp.status();
        let resp_body: Value = resp.json().await.map_err(|e| ProbeError::Llm {
            message: format!("Failed to parse response: {e}"),
            status: Some(status.as_u16()),
        })?;

        if !status.is_success() {
            let message = resp_body["error"]["message"]
                .as_str()
                .unwrap_or("Unknown error");
            return Err(ProbeError::Llm {
                message: message.to_string(),
                status: Some(status.as_u16()),
            });
        }

        Self::parse_response(&resp_body)
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// One LLM call per goal; succeeds when the model answers with any text.
pub struct DirectAgent {
    name: String,
    version: String,
    instructions: Option<String>,
    llm: Arc<dyn Llm>,
}

impl DirectAgent {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            name: "direct".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            llm,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[async_trait]
impl Agent for DirectAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn solve(&self, goal: &str) -> error::Result<ReasoningResult> {
        let mut messages = Vec::with_capacity(2);
        if let Some(instructions) = &self.instructions {
            messages.push(ChatMessage::system(instructions.clone()));
        }
        messages.push(ChatMessage::user(goal));

        let completion = self.llm.completion(CompletionRequest::new(messages)).await?;
        Ok(ReasoningResult {
            success: !completion.text.trim().is_empty(),
            output: completion.text,
        })
    }
}

/// Answers every goal with the goal itself.
#[derive(Debug, Clone, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn solve(&self, goal: &str) -> error::Result<ReasoningResult> {
        Ok(ReasoningResult::success(goal))
    }
}

/// Build the agent for `profile`, with its LLM already instrumented.
pub fn build_agent(
    profile: &str,
    config: &RunConfig,
    instrumentation: &Instrumentation,
) -> error::Result<Arc<dyn Agent>> {
    match profile.trim().to_ascii_lowercase().as_str() {
        "direct" => {
            let llm = instrumentation.llm(Arc::new(ChatCompletionsLlm::from_config(config)?));
            let mut agent = DirectAgent::new(llm).with_name(config.name().unwrap_or("direct"));
            if let Some(version) = config.version() {
                agent = agent.with_version(version);
            }
            if let Some(instructions) = config.instructions() {
                agent = agent.with_instructions(instructions);
            }
            Ok(Arc::new(agent))
        }
        "echo" => Ok(Arc::new(EchoAgent)),
        other => Err(ProbeError::config(format!(
            "Unknown agent profile '{other}' (expected one of: {})",
            PROFILES.join(", ")
        ))),
    }
}
