//! Single fan-out point for supervisor, poller and collector events.
//!
//! Handlers run synchronously on the publishing task, in subscription order.
//! Each invocation is isolated: an `Err` or a panic is logged and delivery
//! moves on to the next handler.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use llamactl_shared::HubEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Error;

type Handler = dyn Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync;

/// Handle returned by [`BroadcastHub::subscribe`], only good for unsubscribing.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
}

#[derive(Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Arc<Handler>)>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every event kind.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&HubEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers().push((id, Arc::new(handler)));
        debug!(subscription = id, "Subscriber registered");
        Subscription { id }
    }

    /// Forward every event into an unbounded channel.
    ///
    /// This is what a push transport hooks into: it drains the receiver on its
    /// own task and unsubscribes once its peer is gone.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<HubEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            tx.send(event.clone())
                .map_err(|_| anyhow!("event receiver dropped"))
        });
        (subscription, rx)
    }

    /// Remove a handler. Safe to call from inside a handler: the removed
    /// handler sees neither the event being dispatched nor any later one.
    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription.id);
        before != subscribers.len()
    }

    /// Deliver `event` to every registered handler. Returns how many handlers
    /// accepted it.
    pub fn publish(&self, event: &HubEvent) -> usize {
        // snapshot so handlers can (un)subscribe without deadlocking
        let snapshot: Vec<(u64, Arc<Handler>)> = self.subscribers().clone();
        let mut delivered = 0;

        for (id, handler) in snapshot {
            if !self.is_subscribed(id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    let error = Error::SubscriberFailure(e.to_string());
                    warn!(subscription = id, "{error}");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    let error = Error::SubscriberFailure(reason);
                    warn!(subscription = id, "{error}");
                }
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    fn is_subscribed(&self, id: u64) -> bool {
        self.subscribers().iter().any(|(sid, _)| *sid == id)
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(u64, Arc<Handler>)>> {
        // handlers never run under this lock, poisoning only means a panic in Vec ops
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llamactl_shared::ModelStatus;
    use std::sync::atomic::AtomicUsize;

    fn counter(hub: &BroadcastHub) -> (Subscription, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = hub.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (sub, count)
    }

    fn event() -> HubEvent {
        HubEvent::status_change("m1", ModelStatus::Running)
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let hub = BroadcastHub::new();
        let (_a, count_a) = counter(&hub);
        let (_b, count_b) = counter(&hub);

        assert_eq!(hub.publish(&event()), 2);
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let hub = BroadcastHub::new();
        let _bad = hub.subscribe(|_| Err(anyhow!("boom")));
        let _panics = hub.subscribe(|_| panic!("handler exploded"));
        let (_good, count) = counter(&hub);

        assert_eq!(hub.publish(&event()), 1);
        assert_eq!(hub.publish(&event()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_during_publish() {
        let hub = BroadcastHub::new();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let hub_ref = hub.clone();
        let victim_ref = victim.clone();
        let _remover = hub.subscribe(move |_| {
            if let Some(sub) = victim_ref.lock().unwrap().take() {
                hub_ref.unsubscribe(&sub);
            }
            Ok(())
        });
        let (victim_sub, victim_count) = counter(&hub);
        *victim.lock().unwrap() = Some(victim_sub);
        let (_other, other_count) = counter(&hub);

        hub.publish(&event());
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
        assert_eq!(other_count.load(Ordering::SeqCst), 1);

        hub.publish(&event());
        assert_eq!(victim_count.load(Ordering::SeqCst), 0);
        assert_eq!(other_count.load(Ordering::SeqCst), 2);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new();
        let (sub, count) = counter(&hub);
        assert!(hub.unsubscribe(&sub));
        assert!(!hub.unsubscribe(&sub));
        hub.publish(&event());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription() {
        let hub = BroadcastHub::new();
        let (sub, mut rx) = hub.subscribe_channel();
        let sent = event();
        hub.publish(&sent);
        assert_eq!(rx.recv().await, Some(sent));

        drop(rx);
        // dropped receiver is reported, not propagated
        assert_eq!(hub.publish(&event()), 0);
        assert!(hub.unsubscribe(&sub));
    }
}
