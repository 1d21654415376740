//! Multi-subscriber event fan-out.
//!
//! Each subscriber owns one bounded inbox and one dedicated worker task, so
//! a slow consumer can never stall the publish path or reorder another
//! subscriber's view. Publish enqueues per subscriber with a short bounded
//! wait; past that the event is dropped for that subscriber only and the
//! others are told via a `SubscriberLag` event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use ad_domain::trace::TraceEvent;
use ad_domain::{AgentEvent, EventKind};

/// Inbox capacity per subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// How long publish will wait on one full inbox before dropping the event
/// for that subscriber.
const WRITE_TIMEOUT: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriber capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A consumer of the event stream. Handlers run on the subscriber's own
/// worker, one event at a time, in publish order; they may suspend freely
/// (network calls, file writes).
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    /// Short name for logs and lag notices.
    fn name(&self) -> &str {
        "subscriber"
    }

    async fn handle_event(&self, event: AgentEvent);
}

/// Opaque handle returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberHandle(u64);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SubscriberEntry {
    name: String,
    tx: mpsc::Sender<AgentEvent>,
    worker: tokio::task::JoinHandle<()>,
    lagging: bool,
    dropped: u64,
}

/// Shared by publishers and workers to track undelivered events for drain.
struct DrainCounter {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl DrainCounter {
    fn incr(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn decr(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Totally ordered publish/subscribe fan-out with at-most-once delivery per
/// subscriber. Cheap to clone; all clones share the same subscriber set.
#[derive(Clone)]
pub struct EventStream {
    subscribers: Arc<Mutex<HashMap<u64, SubscriberEntry>>>,
    counter: Arc<DrainCounter>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStream {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            counter: Arc::new(DrainCounter {
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a subscriber and spawn its worker. Events published from
    /// this point on are delivered to it in publish order.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel::<AgentEvent>(SUBSCRIBER_QUEUE_CAPACITY);
        let name = subscriber.name().to_owned();

        let counter = self.counter.clone();
        let worker_name = name.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // A panicking handler must not take the worker (and the
                // remaining queue) down with it.
                let result = std::panic::AssertUnwindSafe(subscriber.handle_event(event))
                    .catch_unwind()
                    .await;
                if result.is_err() {
                    tracing::error!(subscriber = %worker_name, "subscriber handler panicked");
                }
                counter.decr();
            }
        });

        self.subscribers.lock().insert(
            id,
            SubscriberEntry {
                name,
                tx,
                worker,
                lagging: false,
                dropped: 0,
            },
        );

        SubscriberHandle(id)
    }

    /// Remove a subscriber. Events already queued for it still deliver;
    /// its worker exits once the queue is empty.
    pub fn unsubscribe(&self, handle: SubscriberHandle) -> bool {
        // Dropping the entry drops the sender; the worker drains and exits.
        self.subscribers.lock().remove(&handle.0).is_some()
    }

    /// Enqueue one event for every current subscriber.
    ///
    /// Never fails visibly: after `close` the event is silently discarded,
    /// and a subscriber whose inbox stays full past the write timeout loses
    /// the event (for itself only) and is flagged as lagging.
    pub async fn publish(&self, event: AgentEvent) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(kind = ?event.kind, "publish after close discarded");
            return;
        }

        let targets: Vec<(u64, mpsc::Sender<AgentEvent>, bool)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.tx.clone(), entry.lagging))
            .collect();

        for (id, tx, lagging) in targets {
            self.counter.incr();
            match tx.try_send(event.clone()) {
                Ok(()) => {
                    if lagging {
                        // The inbox has room again; stop penalizing it.
                        if let Some(entry) = self.subscribers.lock().get_mut(&id) {
                            entry.lagging = false;
                        }
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.counter.decr();
                }
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // A subscriber already marked slow gets no bounded wait;
                    // everyone else gets one chance per event.
                    if lagging {
                        self.counter.decr();
                        self.record_lag(id);
                        continue;
                    }
                    match tx.send_timeout(ev, WRITE_TIMEOUT).await {
                        Ok(()) => {}
                        Err(_) => {
                            self.counter.decr();
                            self.record_lag(id);
                        }
                    }
                }
            }
        }
    }

    /// Flag a subscriber as lagging and offer a `SubscriberLag` notice to
    /// all the others (best-effort, no waiting).
    fn record_lag(&self, lagging_id: u64) {
        let notice = {
            let mut subs = self.subscribers.lock();
            let Some(entry) = subs.get_mut(&lagging_id) else {
                return;
            };
            entry.lagging = true;
            entry.dropped += 1;
            TraceEvent::SubscriberLagged {
                subscriber: entry.name.clone(),
                dropped_total: entry.dropped,
            }
            .emit();
            AgentEvent::new(
                EventKind::SubscriberLag,
                serde_json::json!({
                    "subscriber": entry.name,
                    "dropped": entry.dropped,
                }),
            )
        };

        let subs = self.subscribers.lock();
        for (id, entry) in subs.iter() {
            if *id == lagging_id {
                continue;
            }
            self.counter.incr();
            if entry.tx.try_send(notice.clone()).is_err() {
                self.counter.decr();
            }
        }
    }

    /// Block until every enqueued event has been handled by every current
    /// subscriber, or the timeout elapses. Returns `true` on full drain.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.counter.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let notified = self.counter.drained.notified();
            // Re-check after arming the notification to avoid a lost wakeup.
            if self.counter.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.counter.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    /// Refuse further publishes, drain outstanding deliveries, and release
    /// every subscriber. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.drain(Duration::from_secs(5)).await;

        let entries: Vec<SubscriberEntry> = {
            let mut subs = self.subscribers.lock();
            subs.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            // Sender dropped with the entry; give the worker a moment to
            // finish its queue, then let go.
            drop(entry.tx);
            let _ = tokio::time::timeout(Duration::from_secs(1), entry.worker).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ad_domain::EventKind;

    struct Recorder {
        name: String,
        seen: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                seen: Mutex::new(Vec::new()),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle_event(&self, event: AgentEvent) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let label = event.content["text"]
                .as_str()
                .unwrap_or("<none>")
                .to_owned();
            self.seen.lock().push(label);
        }
    }

    fn text_event(i: usize) -> AgentEvent {
        AgentEvent::text(EventKind::AgentResponse, format!("e{i}"))
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let stream = EventStream::new();
        let sub = Recorder::new("a");
        stream.subscribe(sub.clone());

        for i in 0..20 {
            stream.publish(text_event(i)).await;
        }
        assert!(stream.drain(Duration::from_secs(2)).await);

        let seen = sub.seen.lock().clone();
        let expected: Vec<String> = (0..20).map(|i| format!("e{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn all_subscribers_see_all_events() {
        let stream = EventStream::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        stream.subscribe(a.clone());
        stream.subscribe(b.clone());

        for i in 0..5 {
            stream.publish(text_event(i)).await;
        }
        assert!(stream.drain(Duration::from_secs(2)).await);

        assert_eq!(a.seen.lock().len(), 5);
        assert_eq!(b.seen.lock().len(), 5);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let stream = EventStream::new();
        let sub = Recorder::new("a");
        let handle = stream.subscribe(sub.clone());

        stream.publish(text_event(0)).await;
        assert!(stream.drain(Duration::from_secs(2)).await);
        assert!(stream.unsubscribe(handle));

        stream.publish(text_event(1)).await;
        stream.drain(Duration::from_secs(1)).await;
        assert_eq!(sub.seen.lock().clone(), vec!["e0".to_string()]);
        assert!(!stream.unsubscribe(handle));
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated() {
        struct Panicker;

        #[async_trait::async_trait]
        impl Subscriber for Panicker {
            fn name(&self) -> &str {
                "panicker"
            }
            async fn handle_event(&self, _event: AgentEvent) {
                panic!("handler exploded");
            }
        }

        let stream = EventStream::new();
        let healthy = Recorder::new("healthy");
        stream.subscribe(Arc::new(Panicker));
        stream.subscribe(healthy.clone());

        stream.publish(text_event(0)).await;
        stream.publish(text_event(1)).await;
        assert!(stream.drain(Duration::from_secs(2)).await);

        // The healthy subscriber saw everything despite the panics.
        assert_eq!(healthy.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let stream = EventStream::new();
        let slow = Recorder::slow("slow", Duration::from_millis(40));
        let fast = Recorder::new("fast");
        stream.subscribe(slow.clone());
        stream.subscribe(fast.clone());

        // Enough events to overflow the slow inbox would take too long in a
        // unit test; just verify the fast one completes promptly.
        let start = std::time::Instant::now();
        for i in 0..10 {
            stream.publish(text_event(i)).await;
        }
        // Publish itself must not have waited on the slow worker.
        assert!(start.elapsed() < Duration::from_millis(200));

        assert!(stream.drain(Duration::from_secs(5)).await);
        assert_eq!(fast.seen.lock().len(), 10);
        assert_eq!(slow.seen.lock().len(), 10);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_refuses_publish() {
        let stream = EventStream::new();
        let sub = Recorder::new("a");
        stream.subscribe(sub.clone());

        stream.publish(text_event(0)).await;
        stream.close().await;
        stream.close().await;

        assert!(stream.is_closed());
        assert_eq!(stream.subscriber_count(), 0);

        stream.publish(text_event(1)).await;
        assert_eq!(sub.seen.lock().clone(), vec!["e0".to_string()]);
    }

    #[tokio::test]
    async fn drain_on_empty_stream_returns_immediately() {
        let stream = EventStream::new();
        assert!(stream.drain(Duration::from_millis(10)).await);
    }
}
