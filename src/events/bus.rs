//! Priority-aware pub/sub with adaptive batching (spec §4.4).
//!
//! Grounded on the teacher's non-blocking emit pattern
//! (`stream::ToolStreamWriter`, `stream/mod.rs`): publishers never block
//! on delivery. Handler dispatch itself is grounded on the same file's
//! `tokio::spawn`-per-listener idiom, generalized here to a semaphore of
//! `max_concurrent_handlers` (spec §4.4 "Immediate" mode) with a
//! `catch_unwind` around each call so one handler's panic never reaches
//! another subscriber or the publisher (spec §4.4 "Handler isolation").

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, RwLock, Semaphore};

use super::event::{Event, EventKind, Priority};

const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 32;
const BATCH_WINDOW: Duration = Duration::from_millis(50);
/// Spec §6.1 `get_history`: how many past events the bus retains for
/// replay, oldest dropped first once the bound is hit.
const DEFAULT_MAX_HISTORY: usize = 1000;
/// Spec §4.4 "Immediate" mode concurrency ceiling.
const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 32;
/// Window over which `events_per_second` is derived (spec §4.4 metrics).
const RATE_WINDOW: Duration = Duration::from_secs(10);

/// A subscriber's callback: receives one event and reports whether it
/// handled it cleanly. Returning `Err` (or panicking) is recorded as a
/// handler error and never propagates (spec §4.4 "Handler isolation").
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// A live subscription's match criteria plus its callback. Dropping all
/// references to a bus's subscriber list is not how subscriptions end —
/// callers must call [`EventBus::unsubscribe`] explicitly.
struct Subscriber {
    id: u64,
    kind_filter: Option<HashSet<&'static str>>,
    min_priority: Priority,
    /// Spec §4.4 / §8 testable property 4: restrict delivery to a single
    /// stream, when set.
    filter_stream: Option<String>,
    /// Restrict delivery to a single execution, when set.
    filter_execution: Option<String>,
    handler: Handler,
    /// Non-critical events queued for this subscriber under batching,
    /// drained once `target_batch_size` or `BATCH_WINDOW` is reached.
    pending: VecDeque<Event>,
    last_flush: Instant,
    recent_arrivals: VecDeque<Instant>,
}

/// Shared filter-matching logic for both live subscribers and
/// `get_history` replay (spec §8 testable property 4).
fn matches_filter(
    event: &Event,
    kind_filter: &Option<HashSet<&'static str>>,
    min_priority: Priority,
    filter_stream: &Option<String>,
    filter_execution: &Option<String>,
) -> bool {
    if event.priority() < min_priority {
        return false;
    }
    if let Some(kinds) = kind_filter {
        if !kinds.contains(event.kind_name()) {
            return false;
        }
    }
    if let Some(stream) = filter_stream {
        if &event.stream_id != stream {
            return false;
        }
    }
    if let Some(execution) = filter_execution {
        if event.execution_id.as_ref() != Some(execution) {
            return false;
        }
    }
    true
}

impl Subscriber {
    fn matches(&self, event: &Event) -> bool {
        matches_filter(event, &self.kind_filter, self.min_priority, &self.filter_stream, &self.filter_execution)
    }

    /// Adaptive batch size: grows with recent arrival rate (more events
    /// in flight -> larger batches, fewer wakeups) and shrinks back down
    /// when the rate is low (spec §4.4 adaptive batching).
    fn target_batch_size(&mut self, now: Instant) -> usize {
        self.recent_arrivals.retain(|t| now.duration_since(*t) < Duration::from_secs(1));
        let rate = self.recent_arrivals.len();
        (MIN_BATCH_SIZE + rate / 4).min(MAX_BATCH_SIZE)
    }

    /// Sorts pending events highest-priority first, ties broken by
    /// publish order (spec §5 ordering guarantee: higher priority is
    /// delivered first within a batch).
    fn sort_pending(&mut self) {
        self.pending.make_contiguous().sort_by(|a, b| {
            b.priority().cmp(&a.priority()).then_with(|| a.sequence.cmp(&b.sequence))
        });
    }
}

/// Exponential-free running mean (Welford's online update), used for the
/// two moving averages spec §4.4 names: batch size and handler latency.
#[derive(Default)]
struct MovingAverage {
    value: f64,
    count: u64,
}

impl MovingAverage {
    fn sample(&mut self, x: f64) {
        self.count += 1;
        self.value += (x - self.value) / self.count as f64;
    }
}

/// Internal accumulator behind the public, plain-data [`BusMetrics`]
/// snapshot. Kept separate so moving averages and the publish-rate
/// window don't leak into the copyable public type.
#[derive(Default)]
struct MetricsState {
    published: u64,
    delivered: u64,
    handler_errors: u64,
    batches_processed: u64,
    batch_size_avg: MovingAverage,
    handler_latency_avg: MovingAverage,
    recent_publishes: VecDeque<Instant>,
}

#[derive(Debug, Default, Clone)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    pub handler_errors: u64,
    pub batches_processed: u64,
    pub avg_batch_size: f64,
    pub avg_handler_latency_ms: f64,
    pub events_per_second: f64,
}

pub struct EventBus {
    stream_id: String,
    sequence: AtomicU64,
    subscribers: RwLock<Vec<Subscriber>>,
    next_sub_id: AtomicU64,
    metrics: Arc<RwLock<MetricsState>>,
    history: RwLock<VecDeque<Event>>,
    max_history: usize,
    /// Spec §6.1 `start`/`stop`: while stopped, `publish`/`publish_for`
    /// are no-ops (no event created, no subscriber touched, no history
    /// recorded). Independent of subscriber lifecycle.
    running: AtomicBool,
    /// Bounds concurrent handler invocations across every subscriber
    /// (spec §4.4 `max_concurrent_handlers`).
    concurrency: Arc<Semaphore>,
}

/// Filters accepted by `subscribe_filtered` (spec §8 testable property
/// 4: every delivered event matches the subscription's stream/execution
/// filter, when set).
#[derive(Default)]
pub struct SubscribeFilter {
    pub kind_filter: Option<HashSet<&'static str>>,
    pub min_priority: Priority,
    pub stream_id: Option<String>,
    pub execution_id: Option<String>,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Low
    }
}

impl EventBus {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            sequence: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
            next_sub_id: AtomicU64::new(0),
            metrics: Arc::new(RwLock::new(MetricsState::default())),
            history: RwLock::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
            running: AtomicBool::new(true),
            concurrency: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_HANDLERS)),
        }
    }

    /// Same as [`EventBus::new`] but with a caller-chosen history bound
    /// instead of the default (spec §6.1 `get_history`).
    pub fn with_history_limit(stream_id: impl Into<String>, max_history: usize) -> Self {
        Self { max_history, ..Self::new(stream_id) }
    }

    /// Same as [`EventBus::new`] but with a caller-chosen concurrent
    /// handler ceiling instead of the default (spec §4.4
    /// `max_concurrent_handlers`).
    pub fn with_max_concurrent_handlers(stream_id: impl Into<String>, max_concurrent_handlers: usize) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
            ..Self::new(stream_id)
        }
    }

    /// Stops delivery: `publish`/`publish_for` become no-ops until
    /// [`EventBus::start`] is called again (spec §6.1). Existing
    /// subscriptions and recorded history are untouched.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Resumes delivery after [`EventBus::stop`]. A bus starts out
    /// running, so this is only needed to undo an explicit stop.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replays recorded history matching `filter`, most recent first,
    /// capped at `limit` (spec §6.1 `get_history`).
    pub async fn get_history(&self, filter: SubscribeFilter, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|event| {
                matches_filter(
                    event,
                    &filter.kind_filter,
                    filter.min_priority,
                    &filter.stream_id,
                    &filter.execution_id,
                )
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Subscribes `handler` to events of the given kind names (`None` =
    /// all kinds) at or above `min_priority`, with no stream/execution
    /// filtering. Returns the subscription id (spec §6.1 `subscribe`).
    pub async fn subscribe(&self, kind_filter: Option<HashSet<&'static str>>, min_priority: Priority, handler: Handler) -> u64 {
        self.subscribe_filtered(
            SubscribeFilter {
                kind_filter,
                min_priority,
                stream_id: None,
                execution_id: None,
            },
            handler,
        )
        .await
    }

    /// Subscribes with an optional stream and/or execution filter on top
    /// of the kind/priority filters (spec §4.4, §8 testable property 4).
    pub async fn subscribe_filtered(&self, filter: SubscribeFilter, handler: Handler) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.subscribers.write().await;
        subs.push(Subscriber {
            id,
            kind_filter: filter.kind_filter,
            min_priority: filter.min_priority,
            filter_stream: filter.stream_id,
            filter_execution: filter.execution_id,
            handler,
            pending: VecDeque::new(),
            last_flush: Instant::now(),
            recent_arrivals: VecDeque::new(),
        });
        id
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Publishes `kind` on behalf of `execution_id`, assigning the next
    /// sequence number. Critical events are flushed to matching
    /// subscribers immediately; everything else is queued and flushed
    /// per each subscriber's adaptive batch policy (spec §4.4).
    pub async fn publish_for(&self, execution_id: Option<&str>, correlation_id: Option<&str>, kind: EventKind) {
        if !self.is_running() {
            return;
        }
        let event = Event {
            stream_id: self.stream_id.clone(),
            execution_id: execution_id.map(|s| s.to_string()),
            correlation_id: correlation_id.map(|s| s.to_string()),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
        };
        self.publish_event(event).await;
    }

    /// Publishes `kind` with no execution/correlation tagging.
    pub async fn publish(&self, kind: EventKind) {
        self.publish_for(None, None, kind).await;
    }

    /// Invokes `handler(event)` under the bus's concurrency semaphore,
    /// isolating panics and `Err` returns into the handler-error counter
    /// (spec §4.4 "Handler isolation") and sampling latency into the
    /// moving average the `metrics()` snapshot exposes. Runs as a
    /// detached task so the publisher never blocks on a slow handler.
    fn spawn_dispatch(&self, handler: Handler, event: Event) {
        let metrics = self.metrics.clone();
        let semaphore = self.concurrency.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let start = Instant::now();
            let outcome = AssertUnwindSafe(handler(event)).catch_unwind().await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            let mut m = metrics.write().await;
            m.handler_latency_avg.sample(elapsed_ms);
            if !matches!(outcome, Ok(Ok(()))) {
                m.handler_errors += 1;
            }
        });
    }

    async fn publish_event(&self, event: Event) {
        {
            let mut m = self.metrics.write().await;
            m.published += 1;
            let now = Instant::now();
            m.recent_publishes.push_back(now);
            while m.recent_publishes.front().is_some_and(|t| now.duration_since(*t) > RATE_WINDOW) {
                m.recent_publishes.pop_front();
            }
        }

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let critical = event.priority() == Priority::Critical;
        let now = Instant::now();
        let mut subs = self.subscribers.write().await;
        let mut delivered = 0u64;
        let mut batches_processed = 0u64;
        let mut batch_sizes: Vec<f64> = Vec::new();

        for sub in subs.iter_mut() {
            if !sub.matches(&event) {
                continue;
            }
            sub.recent_arrivals.push_back(now);

            if critical {
                self.spawn_dispatch(sub.handler.clone(), event.clone());
                delivered += 1;
                continue;
            }

            sub.pending.push_back(event.clone());
            let target = sub.target_batch_size(now);
            let window_elapsed = now.duration_since(sub.last_flush) >= BATCH_WINDOW;
            if sub.pending.len() >= target || window_elapsed {
                sub.sort_pending();
                let batch: Vec<Event> = sub.pending.drain(..).collect();
                sub.last_flush = now;
                delivered += batch.len() as u64;
                batches_processed += 1;
                batch_sizes.push(batch.len() as f64);
                for evt in batch {
                    self.spawn_dispatch(sub.handler.clone(), evt);
                }
            }
        }
        drop(subs);

        let mut m = self.metrics.write().await;
        m.delivered += delivered;
        m.batches_processed += batches_processed;
        for size in batch_sizes {
            m.batch_size_avg.sample(size);
        }
    }

    /// Flushes every subscriber's pending queue regardless of batch size
    /// or window — called at run end so no event is left stranded.
    pub async fn flush_all(&self) {
        let mut subs = self.subscribers.write().await;
        let mut batches_processed = 0u64;
        let mut delivered = 0u64;
        let mut batch_sizes: Vec<f64> = Vec::new();
        for sub in subs.iter_mut() {
            if sub.pending.is_empty() {
                continue;
            }
            sub.sort_pending();
            let batch: Vec<Event> = sub.pending.drain(..).collect();
            sub.last_flush = Instant::now();
            delivered += batch.len() as u64;
            batches_processed += 1;
            batch_sizes.push(batch.len() as f64);
            for evt in batch {
                self.spawn_dispatch(sub.handler.clone(), evt);
            }
        }
        drop(subs);

        let mut m = self.metrics.write().await;
        m.delivered += delivered;
        m.batches_processed += batches_processed;
        for size in batch_sizes {
            m.batch_size_avg.sample(size);
        }
    }

    /// Snapshot of publish/delivery counters and derived rates (spec
    /// §4.4 "Metrics").
    pub async fn metrics(&self) -> BusMetrics {
        let m = self.metrics.read().await;
        let now = Instant::now();
        let recent = m
            .recent_publishes
            .iter()
            .filter(|t| now.duration_since(**t) <= RATE_WINDOW)
            .count();
        BusMetrics {
            published: m.published,
            delivered: m.delivered,
            handler_errors: m.handler_errors,
            batches_processed: m.batches_processed,
            avg_batch_size: m.batch_size_avg.value,
            avg_handler_latency_ms: m.handler_latency_avg.value,
            events_per_second: recent as f64 / RATE_WINDOW.as_secs_f64(),
        }
    }

    /// Convenience: subscribes, waits for the first event of `kind_name`,
    /// then unsubscribes (spec §4.4 `wait_for`). Returns `None` on
    /// timeout.
    pub async fn wait_for(&self, kind_name: &'static str, timeout: Duration) -> Option<Event> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));
        let mut filter = HashSet::new();
        filter.insert(kind_name);

        let handler: Handler = {
            let tx = tx.clone();
            Arc::new(move |event: Event| {
                let tx = tx.clone();
                async move {
                    if let Some(sender) = tx.lock().await.take() {
                        let _ = sender.send(event);
                    }
                    Ok(())
                }
                .boxed()
            })
        };

        let sub_id = self.subscribe(Some(filter), Priority::Low, handler).await;
        let result = tokio::time::timeout(timeout, rx).await.ok().and_then(|r| r.ok());
        self.unsubscribe(sub_id).await;
        result
    }
}

pub type SharedEventBus = Arc<EventBus>;
