//! Run context store: per-run metrics scoped to a run's dynamic extent.
//!
//! The active [`RunContext`] lives in a Tokio task-local, so it follows the
//! logical task across `.await` points and is invisible to other tasks, even
//! when they are interleaved on the same thread. Nested calls inside
//! [`run_within`] see and mutate the same context without parameter
//! threading.
//!
//! Task-locals are not inherited by `tokio::spawn`; wrap spawned work in
//! [`propagate`] to carry the current run into it.
//!
//! Counters are atomics: nested work running in parallel on several threads
//! against the same context accumulates without races.

use futures::future::Either;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::agent::Usage;
use crate::span::SpanContext;

tokio::task_local! {
    static CURRENT_RUN: Arc<RunContext>;
}

/// Identifying metadata attached to a run by whoever starts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub dataset_id: Option<String>,
    pub item_id: Option<String>,
    pub agent_name: Option<String>,
    pub config_hash: Option<String>,
}

impl RunMetadata {
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("dataset_id", self.dataset_id.as_deref()),
            ("item_id", self.item_id.as_deref()),
            ("agent_name", self.agent_name.as_deref()),
            ("config_hash", self.config_hash.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }
}

/// Accumulator for one end-to-end agent invocation.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    started: Instant,
    metadata: RunMetadata,
    tokens_prompt: AtomicU64,
    tokens_completion: AtomicU64,
    calls_with_usage: AtomicU64,
    calls_without_usage: AtomicU64,
    root_claimed: AtomicBool,
    root_span: OnceLock<SpanContext>,
    root_duration_ms: OnceLock<u64>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::with_metadata(RunMetadata::default())
    }

    pub fn with_metadata(metadata: RunMetadata) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            metadata,
            tokens_prompt: AtomicU64::new(0),
            tokens_completion: AtomicU64::new(0),
            calls_with_usage: AtomicU64::new(0),
            calls_without_usage: AtomicU64::new(0),
            root_claimed: AtomicBool::new(false),
            root_span: OnceLock::new(),
            root_duration_ms: OnceLock::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Fold one LLM call's reported usage into the run. `None` marks the
    /// call as unaccounted, which makes the run's token totals unknown.
    pub fn record_usage(&self, usage: Option<Usage>) {
        match usage {
            Some(u) => {
                self.tokens_prompt.fetch_add(u.prompt_tokens, Ordering::Relaxed);
                self.tokens_completion
                    .fetch_add(u.completion_tokens, Ordering::Relaxed);
                self.calls_with_usage.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.calls_without_usage.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Milliseconds since the context was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// First caller wins; later root-level observations nest under it.
    pub(crate) fn claim_root(&self) -> bool {
        self.root_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_root_span(&self, span: SpanContext) {
        let _ = self.root_span.set(span);
    }

    pub fn root_span(&self) -> Option<&SpanContext> {
        self.root_span.get()
    }

    pub(crate) fn finish_root(&self, duration_ms: u64) {
        let _ = self.root_duration_ms.set(duration_ms);
    }

    /// Snapshot of everything accumulated so far.
    pub fn metrics(&self) -> RunMetrics {
        let with_usage = self.calls_with_usage.load(Ordering::Relaxed);
        let without_usage = self.calls_without_usage.load(Ordering::Relaxed);
        let (tokens_prompt, tokens_completion, tokens_total) = if with_usage > 0 && without_usage == 0
        {
            let p = self.tokens_prompt.load(Ordering::Relaxed);
            let c = self.tokens_completion.load(Ordering::Relaxed);
            (Some(p), Some(c), Some(p.saturating_add(c)))
        } else {
            (None, None, None)
        };

        RunMetrics {
            run_id: self.run_id.clone(),
            duration_ms: self.root_duration_ms.get().copied(),
            tokens_prompt,
            tokens_completion,
            tokens_total,
            llm_calls: with_usage + without_usage,
            trace_id: self
                .root_span
                .get()
                .filter(|s| s.is_valid())
                .map(|s| s.trace_id.clone()),
        }
    }
}

/// Point-in-time view of a run's accumulated metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    /// Wall-clock duration of the root call, once it has returned.
    pub duration_ms: Option<u64>,
    /// `None` when no LLM call reported usage or any call lacked it.
    pub tokens_prompt: Option<u64>,
    pub tokens_completion: Option<u64>,
    pub tokens_total: Option<u64>,
    pub llm_calls: u64,
    pub trace_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Store accessors
// ---------------------------------------------------------------------------

/// The run active in the calling task, if any.
pub fn get_current() -> Option<Arc<RunContext>> {
    CURRENT_RUN.try_with(Arc::clone).ok()
}

/// Run `fut` with `ctx` as the current run. The previous value is restored
/// for the caller once the future completes or is dropped.
pub async fn run_within<F>(ctx: Arc<RunContext>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_RUN.scope(ctx, fut).await
}

/// Synchronous counterpart of [`run_within`].
pub fn run_within_sync<R>(ctx: Arc<RunContext>, f: impl FnOnce() -> R) -> R {
    CURRENT_RUN.sync_scope(ctx, f)
}

/// Bind the current run (if any) to `fut`, for handing work to `tokio::spawn`.
pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    match get_current() {
        Some(ctx) => Either::Left(CURRENT_RUN.scope(ctx, fut)),
        None => Either::Right(fut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unknown_until_usage_is_reported() {
        let ctx = RunContext::new();
        assert_eq!(ctx.metrics().tokens_total, None);
        ctx.record_usage(Some(Usage::new(10, 5)));
        ctx.record_usage(Some(Usage::new(1, 2)));
        let m = ctx.metrics();
        assert_eq!(m.tokens_prompt, Some(11));
        assert_eq!(m.tokens_completion, Some(7));
        assert_eq!(m.tokens_total, Some(18));
        assert_eq!(m.llm_calls, 2);
    }

    #[test]
    fn one_unreported_call_makes_the_run_unknown() {
        let ctx = RunContext::new();
        ctx.record_usage(Some(Usage::new(10, 5)));
        ctx.record_usage(None);
        let m = ctx.metrics();
        assert_eq!(m.tokens_total, None);
        assert_eq!(m.llm_calls, 2);
    }

    #[test]
    fn root_is_claimed_once() {
        let ctx = RunContext::new();
        assert!(ctx.claim_root());
        assert!(!ctx.claim_root());
    }

    #[test]
    fn sync_scope_restores_outer_value() {
        assert!(get_current().is_none());
        let outer = Arc::new(RunContext::new());
        let inner = Arc::new(RunContext::new());
        run_within_sync(outer.clone(), || {
            assert_eq!(get_current().unwrap().run_id(), outer.run_id());
            run_within_sync(inner.clone(), || {
                assert_eq!(get_current().unwrap().run_id(), inner.run_id());
            });
            assert_eq!(get_current().unwrap().run_id(), outer.run_id());
        });
        assert!(get_current().is_none());
    }
}
