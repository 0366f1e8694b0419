//! Per-kind fact buffering with synchronous, retried flushes to sinks.

use crate::config::{DEFAULT_BATCH_SIZE, SINK_MAX_ATTEMPTS, SINK_RETRY_BASE_MS, SINK_RETRY_JITTER_MS};
use crate::error::{PipelineError, SinkError};
use crate::models::{Fact, FactKind};
use crate::sink::{KeyIndex, Sink};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Jittered exponential backoff for transient sink failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per batch, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: SINK_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(SINK_RETRY_BASE_MS),
            max_jitter: Duration::from_millis(SINK_RETRY_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(1 << exp);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Which facts of a route reach its sink.
#[derive(Clone, Default)]
pub enum RouteFilter {
    #[default]
    All,
    /// Edges pass only if both endpoints exist in the index.
    KnownEndpoints(Arc<dyn KeyIndex + Send + Sync>),
}

impl RouteFilter {
    pub fn admits(&self, fact: &Fact) -> bool {
        match (self, fact.endpoints()) {
            (RouteFilter::All, _) | (_, None) => true,
            (RouteFilter::KnownEndpoints(index), Some((kind, source, target))) => {
                index.exists(kind, source) && index.exists(kind, target)
            }
        }
    }
}

impl fmt::Debug for RouteFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteFilter::All => f.write_str("All"),
            RouteFilter::KnownEndpoints(_) => f.write_str("KnownEndpoints"),
        }
    }
}

/// Handle returned by [`BatchCoordinator::add_sink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkId(usize);

#[derive(Debug)]
struct Route {
    sink: SinkId,
    kinds: Vec<FactKind>,
    filter: RouteFilter,
}

/// Accumulates facts per kind and flushes full batches to every route
/// registered for that kind.
pub struct BatchCoordinator {
    batch_size: usize,
    retry: RetryPolicy,
    buffers: BTreeMap<FactKind, Vec<Fact>>,
    sinks: Vec<Box<dyn Sink>>,
    routes: Vec<Route>,
    flushes: u64,
    flushed_items: u64,
    filtered: u64,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchCoordinator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
            buffers: BTreeMap::new(),
            sinks: Vec::new(),
            routes: Vec::new(),
            flushes: 0,
            flushed_items: 0,
            filtered: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) -> SinkId {
        self.sinks.push(sink);
        SinkId(self.sinks.len() - 1)
    }

    /// Sends facts of `kinds` to `sink`, subject to `filter`.
    pub fn route(&mut self, sink: SinkId, kinds: &[FactKind], filter: RouteFilter) {
        self.routes.push(Route {
            sink,
            kinds: kinds.to_vec(),
            filter,
        });
    }

    /// Adds a sink receiving every fact kind unfiltered.
    pub fn add_sink_for_all(&mut self, sink: Box<dyn Sink>) -> SinkId {
        let id = self.add_sink(sink);
        self.route(id, &FactKind::ALL, RouteFilter::All);
        id
    }

    fn is_routed(&self, kind: FactKind) -> bool {
        self.routes.iter().any(|r| r.kinds.contains(&kind))
    }

    /// Buffers `fact`, flushing its kind when the batch is full.
    ///
    /// Facts of a kind no route wants are not buffered.
    pub fn push(&mut self, fact: Fact) -> Result<(), PipelineError> {
        let kind = fact.kind();
        if !self.is_routed(kind) {
            trace!(%kind, "No route for fact kind");
            return Ok(());
        }
        self.buffers.entry(kind).or_default().push(fact);
        self.flush_if_full(kind)?;
        Ok(())
    }

    pub fn push_all(&mut self, facts: impl IntoIterator<Item = Fact>) -> Result<(), PipelineError> {
        for fact in facts {
            self.push(fact)?;
        }
        Ok(())
    }

    /// Flushes `kind` if its buffer reached the batch size.
    pub fn flush_if_full(&mut self, kind: FactKind) -> Result<bool, PipelineError> {
        let full = self
            .buffers
            .get(&kind)
            .is_some_and(|b| b.len() >= self.batch_size);
        if full {
            self.flush(kind)?;
        }
        Ok(full)
    }

    /// Flushes every non-empty buffer.
    pub fn drain(&mut self) -> Result<(), PipelineError> {
        for kind in FactKind::ALL {
            self.flush(kind)?;
        }
        Ok(())
    }

    /// Drains and finishes every sink.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        self.drain()?;
        for sink in &mut self.sinks {
            sink.finish().map_err(|source| PipelineError::SinkFinish {
                sink: sink.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Delivers the buffer of `kind` to its routes. On failure the batch
    /// stays buffered and no counter moves.
    fn flush(&mut self, kind: FactKind) -> Result<(), PipelineError> {
        let batch = match self.buffers.get_mut(&kind) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return Ok(()),
        };
        debug!(%kind, items = batch.len(), "Flushing batch");

        match self.deliver_routes(kind, &batch) {
            Ok(filtered) => {
                self.flushes += 1;
                self.flushed_items += batch.len() as u64;
                self.filtered += filtered;
                Ok(())
            }
            Err(e) => {
                self.buffers.insert(kind, batch);
                Err(e)
            }
        }
    }

    /// Sends `batch` to every route of `kind`; returns how many facts the
    /// route filters held back.
    fn deliver_routes(&mut self, kind: FactKind, batch: &[Fact]) -> Result<u64, PipelineError> {
        let mut filtered = 0u64;
        for route in self.routes.iter().filter(|r| r.kinds.contains(&kind)) {
            let admitted: Vec<Fact>;
            let facts: &[Fact] = match route.filter {
                RouteFilter::All => batch,
                RouteFilter::KnownEndpoints(_) => {
                    admitted = batch
                        .iter()
                        .filter(|f| route.filter.admits(f))
                        .cloned()
                        .collect();
                    filtered += (batch.len() - admitted.len()) as u64;
                    &admitted
                }
            };
            if facts.is_empty() {
                continue;
            }
            let sink = &mut self.sinks[route.sink.0];
            deliver(sink.as_mut(), kind, facts, &self.retry)?;
        }
        Ok(filtered)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Facts currently buffered across all kinds.
    pub fn pending(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn flushed_items(&self) -> u64 {
        self.flushed_items
    }

    /// Facts held back by route filters.
    pub fn filtered(&self) -> u64 {
        self.filtered
    }

    pub fn sink(&self, id: SinkId) -> &dyn Sink {
        self.sinks[id.0].as_ref()
    }
}

fn deliver(
    sink: &mut dyn Sink,
    kind: FactKind,
    facts: &[Fact],
    retry: &RetryPolicy,
) -> Result<(), PipelineError> {
    let mut attempt = 1;
    loop {
        match sink.put_batch(kind, facts) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    sink = sink.name(),
                    %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient sink failure, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(source) => {
                return Err(sink_error(sink, kind, facts.len(), attempt, source));
            }
        }
    }
}

fn sink_error(
    sink: &dyn Sink,
    kind: FactKind,
    items: usize,
    attempts: u32,
    source: SinkError,
) -> PipelineError {
    PipelineError::Sink {
        sink: sink.name().to_string(),
        kind,
        items,
        attempts,
        source,
    }
}
