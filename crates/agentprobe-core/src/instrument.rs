//! Non-invasive instrumentation of agents and LLMs.
//!
//! [`observe`] wraps any fallible future in a span bound to the current run
//! (creating the run if none is active). [`ObservedAgent`] and
//! [`ObservedLlm`] decorate one agent / LLM instance through their traits,
//! leaving every other instance untouched. Results and errors pass through
//! unchanged; instrumentation only watches.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::agent::{Agent, Completion, CompletionRequest, Llm, ReasoningResult, truncate_chars};
use crate::context::{RunContext, get_current, run_within};
use crate::error;
use crate::span::{Attributes, Span};
use crate::tracer::Tracer;

pub const AGENT_SPAN: &str = "agent.solve";
pub const LLM_SPAN: &str = "llm.completion";

const GOAL_PREVIEW_CHARS: usize = 500;
const RESULT_PREVIEW_CHARS: usize = 1000;

/// Where an observation sits in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    /// Entry point of a run (`agent.solve`). Owns the run's root span and
    /// duration unless a root already exists, in which case it nests.
    Run,
    /// Work inside a run (`llm.completion`). Never starts a new run id.
    Nested,
}

/// Wrap `fut` in a span named `name`.
///
/// `extract` runs on success with the result, the active run and the open
/// span; use it to set result attributes or fold metrics into the run. On
/// error the span is closed with status ERROR and the error's description,
/// and the error is returned unmodified.
pub async fn observe<T, E, Fut, X>(
    tracer: &Tracer,
    name: &str,
    kind: ObservationKind,
    attributes: Attributes,
    extract: X,
    fut: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    X: FnOnce(&T, &RunContext, &mut Span),
{
    match get_current() {
        Some(ctx) => observe_in(ctx, tracer, name, kind, attributes, extract, fut).await,
        None => {
            let ctx = Arc::new(RunContext::new());
            run_within(
                ctx.clone(),
                observe_in(ctx, tracer, name, kind, attributes, extract, fut),
            )
            .await
        }
    }
}

async fn observe_in<T, E, Fut, X>(
    ctx: Arc<RunContext>,
    tracer: &Tracer,
    name: &str,
    kind: ObservationKind,
    mut attributes: Attributes,
    extract: X,
    fut: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    X: FnOnce(&T, &RunContext, &mut Span),
{
    let owns_root = kind == ObservationKind::Run && ctx.claim_root();
    attributes.set("run_id", ctx.run_id());

    let mut span = if owns_root {
        for (key, value) in ctx.metadata().entries() {
            attributes.set(key, value);
        }
        let span = tracer.start_span(name, attributes);
        ctx.set_root_span(span.context());
        span
    } else {
        match ctx.root_span() {
            Some(parent) => tracer.start_child_span(name, parent, attributes),
            None => tracer.start_span(name, attributes),
        }
    };

    let started = Instant::now();
    let outcome = fut.await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    if owns_root {
        ctx.finish_root(elapsed_ms);
    }
    span.set_attribute("duration_ms", elapsed_ms);

    match outcome {
        Ok(value) => {
            extract(&value, &ctx, &mut span);
            span.end();
            Ok(value)
        }
        Err(err) => {
            span.set_attribute("error", true);
            span.end_with_error(err.to_string());
            Err(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Agent decorator
// ---------------------------------------------------------------------------

/// Root-call instrumentation for one agent instance.
pub struct ObservedAgent {
    inner: Arc<dyn Agent>,
    tracer: Tracer,
}

impl ObservedAgent {
    pub fn new(inner: Arc<dyn Agent>, tracer: Tracer) -> Self {
        Self { inner, tracer }
    }
}

#[async_trait]
impl Agent for ObservedAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn solve(&self, goal: &str) -> error::Result<ReasoningResult> {
        let attributes = Attributes::new()
            .with("agent_name", self.inner.name())
            .with("goal", truncate_chars(goal, GOAL_PREVIEW_CHARS))
            .with("goal_length", goal.chars().count());
        observe(
            &self.tracer,
            AGENT_SPAN,
            ObservationKind::Run,
            attributes,
            record_solve,
            self.inner.solve(goal),
        )
        .await
    }

    fn is_observed(&self) -> bool {
        true
    }
}

fn record_solve(result: &ReasoningResult, ctx: &RunContext, span: &mut Span) {
    span.set_attribute("success", result.success);
    span.set_attribute("result_preview", result.preview(RESULT_PREVIEW_CHARS));
    let metrics = ctx.metrics();
    if let (Some(p), Some(c), Some(t)) = (
        metrics.tokens_prompt,
        metrics.tokens_completion,
        metrics.tokens_total,
    ) {
        span.set_attribute("tokens_prompt", p);
        span.set_attribute("tokens_completion", c);
        span.set_attribute("tokens_total", t);
    }
}

// ---------------------------------------------------------------------------
// LLM decorator
// ---------------------------------------------------------------------------

/// Nested-call instrumentation for one LLM instance: opens a child span and
/// folds reported token usage into the active run.
pub struct ObservedLlm {
    inner: Arc<dyn Llm>,
    tracer: Tracer,
}

impl ObservedLlm {
    pub fn new(inner: Arc<dyn Llm>, tracer: Tracer) -> Self {
        Self { inner, tracer }
    }
}

#[async_trait]
impl Llm for ObservedLlm {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn completion(&self, request: CompletionRequest) -> error::Result<Completion> {
        let attributes = Attributes::new()
            .with("model", self.inner.model())
            .with("message_count", request.messages.len());
        observe(
            &self.tracer,
            LLM_SPAN,
            ObservationKind::Nested,
            attributes,
            record_completion,
            self.inner.completion(request),
        )
        .await
    }

    fn is_observed(&self) -> bool {
        true
    }
}

fn record_completion(completion: &Completion, ctx: &RunContext, span: &mut Span) {
    ctx.record_usage(completion.usage);
    span.set_attribute("usage_reported", completion.usage.is_some());
    if let Some(usage) = completion.usage {
        span.set_attribute("prompt_tokens", usage.prompt_tokens);
        span.set_attribute("completion_tokens", usage.completion_tokens);
        span.set_attribute("total_tokens", usage.total_tokens());
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Applies the decorators exactly once per instance.
#[derive(Debug, Clone, Default)]
pub struct Instrumentation {
    tracer: Tracer,
}

impl Instrumentation {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Decorate `agent`; already-observed agents are returned unchanged.
    pub fn agent(&self, agent: Arc<dyn Agent>) -> Arc<dyn Agent> {
        if agent.is_observed() {
            debug!(agent = agent.name(), "Agent already instrumented");
            return agent;
        }
        Arc::new(ObservedAgent::new(agent, self.tracer.clone()))
    }

    /// Decorate `llm`; already-observed LLMs are returned unchanged.
    pub fn llm(&self, llm: Arc<dyn Llm>) -> Arc<dyn Llm> {
        if llm.is_observed() {
            debug!(model = llm.model(), "LLM already instrumented");
            return llm;
        }
        Arc::new(ObservedLlm::new(llm, self.tracer.clone()))
    }
}
