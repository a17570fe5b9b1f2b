//! Bounded background delivery for network exporters.
//!
//! Spans are queued on a bounded channel and shipped by a Tokio task in
//! batches. `export` never waits: when the queue is full the span is dropped
//! and the caller gets an export error (which the tracer logs). Every HTTP
//! request carries a timeout, so an unreachable backend costs at most one
//! timeout per batch and never stalls instrumented code.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{self, ProbeError};
use crate::span::SpanData;
use crate::tracer::SpanExporter;

/// Batching and delivery limits.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Spans per request.
    pub max_batch_size: usize,
    /// Deliver a partial batch after this long.
    pub flush_interval: Duration,
    /// Spans that may wait in the queue before new ones are dropped.
    pub queue_capacity: usize,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            flush_interval: Duration::from_secs(2),
            queue_capacity: 1024,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Turns a batch of spans into one HTTP request for a specific backend.
pub trait BatchEncoder: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn request(&self, client: &reqwest::Client, spans: &[SpanData]) -> reqwest::RequestBuilder;
}

enum Command {
    Span(Box<SpanData>),
    Flush(oneshot::Sender<()>),
}

/// A [`SpanExporter`] that hands spans to a background delivery task.
pub struct BatchExporter {
    name: &'static str,
    tx: mpsc::Sender<Command>,
}

impl BatchExporter {
    /// Spawn the delivery worker on the current Tokio runtime.
    pub fn spawn<E: BatchEncoder>(encoder: E, config: BatchConfig) -> error::Result<Self> {
        let name = encoder.name();
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            ProbeError::config(format!("{name} tracer must be created inside a Tokio runtime"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProbeError::config(format!("{name}: failed to build HTTP client: {e}")))?;
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        handle.spawn(run_worker(encoder, client, rx, config));
        Ok(Self { name, tx })
    }
}

#[async_trait]
impl SpanExporter for BatchExporter {
    fn name(&self) -> &str {
        self.name
    }

    fn export(&self, span: &SpanData) -> error::Result<()> {
        self.tx
            .try_send(Command::Span(Box::new(span.clone())))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ProbeError::export(self.name, "queue full, span dropped")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ProbeError::export(self.name, "delivery worker stopped")
                }
            })
    }

    async fn flush(&self) -> error::Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| ProbeError::export(self.name, "delivery worker stopped"))?;
        done.await
            .map_err(|_| ProbeError::export(self.name, "delivery worker stopped"))
    }
}

async fn run_worker<E: BatchEncoder>(
    encoder: E,
    client: reqwest::Client,
    mut rx: mpsc::Receiver<Command>,
    config: BatchConfig,
) {
    let max_batch = config.max_batch_size.max(1);
    let mut buffer: Vec<SpanData> = Vec::with_capacity(max_batch);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Span(span)) => {
                    buffer.push(*span);
                    if buffer.len() >= max_batch {
                        deliver(&encoder, &client, &mut buffer).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    deliver(&encoder, &client, &mut buffer).await;
                    let _ = ack.send(());
                }
                None => {
                    deliver(&encoder, &client, &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => deliver(&encoder, &client, &mut buffer).await,
        }
    }
}

async fn deliver<E: BatchEncoder>(encoder: &E, client: &reqwest::Client, buffer: &mut Vec<SpanData>) {
    if buffer.is_empty() {
        return;
    }
    let spans = std::mem::take(buffer);
    match encoder.request(client, &spans).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!(exporter = encoder.name(), count = spans.len(), "Delivered spans");
        }
        Ok(resp) => {
            warn!(
                exporter = encoder.name(),
                status = resp.status().as_u16(),
                dropped = spans.len(),
                "Backend rejected spans"
            );
        }
        Err(e) => {
            warn!(
                exporter = encoder.name(),
                error = %e,
                dropped = spans.len(),
                "Failed to deliver spans"
            );
        }
    }
}
