//! In-process event bus: publish/subscribe keyed by event type.
//!
//! Handlers run synchronously in subscription order. Each call is isolated, so a
//! handler that returns an error or panics is logged and the rest still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use super::event::Event;

/// Subscribing to this type receives every published event.
pub const WILDCARD: &str = "*";

/// Callback invoked with each published event of its type.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that returned Ok.
    pub delivered: usize,
    /// Handlers that returned Err or panicked.
    pub failed: usize,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    by_type: HashMap<String, Vec<(SubscriptionId, Handler)>>,
}

/// Shared event bus. Clones publish to and subscribe on the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `event_type`. Later subscribers run after earlier ones.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut g = self.lock();
        g.next_id += 1;
        let id = SubscriptionId(g.next_id);
        g.by_type
            .entry(event_type.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut g = self.lock();
        let mut removed = false;
        g.by_type.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.lock().by_type.get(event_type).map_or(0, Vec::len)
    }

    /// Invoke every handler currently subscribed to `event_type`, then the
    /// wildcard (`*`) subscribers.
    ///
    /// The handler list is snapshotted before the first call, so handlers may
    /// subscribe or unsubscribe; changes apply from the next publish.
    pub fn publish(&self, event_type: &str, event: &Event) -> PublishReport {
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let g = self.lock();
            let exact = g.by_type.get(event_type).into_iter().flatten();
            let any = match event_type {
                WILDCARD => None,
                _ => g.by_type.get(WILDCARD),
            };
            let snapshot: Vec<_> = exact.chain(any.into_iter().flatten()).cloned().collect();
            snapshot
        };
        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    log::warn!("handler {:?} for {} failed: {:#}", id, event_type, e);
                }
                Err(_) => {
                    report.failed += 1;
                    log::error!("handler {:?} for {} panicked", id, event_type);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn other(event_type: &str) -> Event {
        Event::Other {
            event_type: event_type.to_string(),
            payload: json!({"n": 1}),
        }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<usize>>>,
        n: usize,
    ) -> impl Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(n);
            Ok(())
        }
    }

    #[test]
    fn wildcard_runs_after_exact_subscribers() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(WILDCARD, recorder(&log, 9));
        bus.subscribe("X", recorder(&log, 1));
        assert_eq!(bus.publish("X", &other("X")).delivered, 2);
        assert_eq!(bus.publish("Y", &other("Y")).delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec![1, 9, 9]);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..5 {
            bus.subscribe("X", recorder(&log, n));
        }
        let report = bus.publish("X", &other("X"));
        assert_eq!(report, PublishReport { delivered: 5, failed: 0 });
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("X", recorder(&log, 0));
        bus.subscribe("X", |_| anyhow::bail!("boom"));
        bus.subscribe("X", recorder(&log, 2));
        bus.subscribe("X", |_| panic!("handler panic"));
        bus.subscribe("X", recorder(&log, 4));
        let report = bus.publish("X", &other("X"));
        assert_eq!(report, PublishReport { delivered: 3, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec![0, 2, 4]);

        // Bus is still usable after a panic.
        let report = bus.publish("X", &other("X"));
        assert_eq!(report.delivered, 3);
    }

    #[test]
    fn publish_only_reaches_matching_type() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("A", recorder(&log, 1));
        bus.subscribe("B", recorder(&log, 2));
        bus.publish("B", &other("B"));
        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert_eq!(bus.publish("C", &other("C")), PublishReport::default());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = bus.subscribe("X", recorder(&log, 1));
        bus.subscribe("X", recorder(&log, 2));
        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        bus.publish("X", &other("X"));
        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert_eq!(bus.subscriber_count("X"), 1);
    }

    #[test]
    fn late_subscriber_misses_earlier_publish() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.publish("X", &other("X"));
        bus.subscribe("X", recorder(&log, 1));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_may_subscribe_during_publish() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner_bus = bus.clone();
        let inner_log = log.clone();
        bus.subscribe("X", move |_| {
            inner_bus.subscribe("X", recorder(&inner_log, 9));
            Ok(())
        });
        let first = bus.publish("X", &other("X"));
        assert_eq!(first.delivered, 1);
        assert!(log.lock().unwrap().is_empty());
        bus.publish("X", &other("X"));
        assert_eq!(*log.lock().unwrap(), vec![9]);
    }
}
