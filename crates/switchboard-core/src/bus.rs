use crate::event::{Event, EventKind};
use crate::SwitchboardResult;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

/// Default number of events the bus buffers before dropping the oldest.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default time one handler may spend on one event.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// A subscriber callback.
///
/// Handlers run on their own task, concurrently with every other handler
/// matching the same event. A returned error, a panic or running past the
/// bus's handler timeout is counted in [`BusStats::handler_failures`] and
/// logged; it never reaches the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: Arc<Event>) -> SwitchboardResult<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SwitchboardResult<()>> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> SwitchboardResult<()> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SwitchboardResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Counters describing what the bus has done since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted by [`EventBus::publish`].
    pub published: u64,
    /// Events taken off the queue and matched against subscriptions.
    pub dispatched: u64,
    /// Events evicted because the queue was full.
    pub dropped: u64,
    /// Handler invocations that completed without error.
    pub deliveries: u64,
    /// Handler invocations that returned an error, panicked or timed out.
    pub handler_failures: u64,
    /// Handler invocations cut off by the handler timeout (also counted in
    /// `handler_failures`).
    pub handler_timeouts: u64,
    /// Events currently waiting in the queue.
    pub queued: usize,
    /// Maximum queue length.
    pub capacity: usize,
    /// Number of live subscriptions.
    pub subscriptions: usize,
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

struct Shared {
    capacity: usize,
    handler_timeout: Duration,
    queue: Mutex<VecDeque<Arc<Event>>>,
    handlers: RwLock<HashMap<String, Vec<Subscription>>>,
    wake: Notify,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    deliveries: AtomicU64,
    handler_failures: AtomicU64,
    handler_timeouts: AtomicU64,
}

/// In-process publish/subscribe bus with topic and wildcard matching.
///
/// Topics are either an exact event kind (`"agent.connected"`), a prefix
/// wildcard (`"agent.*"`) or the global wildcard (`"*"`).
///
/// Publishing only enqueues. A single background loop, bounded by
/// [`start`](Self::start) and [`stop`](Self::stop), drains the queue and fans
/// each event out to its handlers. When the queue is full the oldest queued
/// event is evicted, so consumers always see the most recent state.
///
/// `EventBus` is a cheap handle: clones share the same queue and
/// subscriptions.
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a bus buffering up to [`DEFAULT_CAPACITY`] events.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limits(capacity, DEFAULT_HANDLER_TIMEOUT)
    }

    /// Create a bus buffering up to `capacity` events whose handlers are
    /// each cut off after `handler_timeout`.
    ///
    /// The same timeout is the grace period [`stop`](Self::stop) gives the
    /// dispatch loop before aborting it.
    pub fn with_limits(capacity: usize, handler_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                capacity,
                handler_timeout,
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                handlers: RwLock::new(HashMap::new()),
                wake: Notify::new(),
                running: AtomicBool::new(false),
                worker: Mutex::new(None),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
                handler_timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// Start the dispatch loop. Calling it on a running bus does nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.shared.worker.lock();
        if worker.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        *worker = Some(tokio::spawn(shared.run()));
        debug!(capacity = self.shared.capacity, "Event bus started");
    }

    /// Stop the dispatch loop after the queued events have been dispatched.
    ///
    /// Draining gets one handler timeout of grace. Past that the loop and
    /// its in-flight handlers are aborted and whatever is still queued stays
    /// undispatched.
    ///
    /// Idempotent: stopping a bus that is not running returns immediately.
    pub async fn stop(&self) {
        let handle = self.shared.worker.lock().take();
        let Some(mut handle) = handle else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();

        match tokio::time::timeout(self.shared.handler_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Event bus dispatch loop ended abnormally"),
            Err(_) => {
                handle.abort();
                warn!(
                    grace = ?self.shared.handler_timeout,
                    undispatched = self.shared.queue.lock().len(),
                    "Event bus drain exceeded grace period, dispatch aborted"
                );
            }
        }
        debug!("Event bus stopped");
    }

    /// Whether the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        if topic != "*" && !topic.ends_with(".*") && EventKind::from_topic(topic).is_none() {
            warn!(topic = %topic, "Subscribing to a topic no event kind will ever match");
        }
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.shared
            .handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered
    /// under `topic`.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let Some(subs) = handlers.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    /// Enqueue an event. Never waits for dispatch.
    ///
    /// If the queue is full, the oldest queued event is dropped to make room.
    pub fn publish(&self, event: Event) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                if let Some(evicted) = queue.pop_front() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        event_id = %evicted.id,
                        topic = %evicted.topic(),
                        "Event queue full, dropped oldest event"
                    );
                }
            }
            queue.push_back(Arc::new(event));
        }
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        self.shared.wake.notify_one();
    }

    /// Snapshot of the bus counters.
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            dispatched: self.shared.dispatched.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            deliveries: self.shared.deliveries.load(Ordering::Relaxed),
            handler_failures: self.shared.handler_failures.load(Ordering::Relaxed),
            handler_timeouts: self.shared.handler_timeouts.load(Ordering::Relaxed),
            queued: self.shared.queue.lock().len(),
            capacity: self.shared.capacity,
            subscriptions: self.shared.handlers.read().values().map(Vec::len).sum(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        loop {
            while let Some(event) = self.pop() {
                self.dispatch(event).await;
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.wake.notified().await;
        }
    }

    fn pop(&self) -> Option<Arc<Event>> {
        self.queue.lock().pop_front()
    }

    /// Exact-topic handlers, then prefix wildcard handlers, then global ones.
    fn matching(&self, kind: EventKind) -> Vec<Subscription> {
        let handlers = self.handlers.read();
        let keys = [
            kind.as_str().to_string(),
            format!("{}.*", kind.prefix()),
            "*".to_string(),
        ];
        keys.iter()
            .filter_map(|key| handlers.get(key))
            .flat_map(|subs| subs.iter().cloned())
            .collect()
    }

    /// Fan one event out and wait for every handler, each bounded by the
    /// handler timeout. Dropping this future aborts the handlers still running.
    async fn dispatch(&self, event: Arc<Event>) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let subs = self.matching(event.kind);
        if subs.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for sub in subs {
            let event = event.clone();
            let limit = self.handler_timeout;
            tasks.spawn(async move {
                let outcome = tokio::time::timeout(limit, sub.handler.handle(event)).await;
                (sub.id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Ok(())))) => {
                    self.deliveries.fetch_add(1, Ordering::Relaxed);
                }
                Ok((id, Ok(Err(e)))) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription = %id, topic = %event.topic(), error = %e, "Event handler failed");
                }
                Ok((id, Err(_))) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscription = %id,
                        topic = %event.topic(),
                        timeout = ?self.handler_timeout,
                        "Event handler timed out"
                    );
                }
                Err(e) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(topic = %event.topic(), error = %e, "Event handler panicked");
                }
            }
        }
    }
}
