//! Event fan-out to subscribed clients.
//!
//! Subscribers register a callback and receive every subsequent event until
//! they cancel. Events are delivered only to currently registered callbacks;
//! there is no buffering for late subscribers.

use std::sync::{Arc, Mutex};

use crate::event::Event;

/// Callback invoked for every emitted event.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Subscriber slots, shared between the bus and its subscription handles.
type SubscriberList = Arc<Mutex<Vec<Option<EventCallback>>>>;

/// Registry of event subscribers.
///
/// Subscriptions are identified by their slot index. Cancellation nils the
/// slot instead of compacting the vector, so indices stay stable for the
/// lifetime of the bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: SubscriberList,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and return its cancellation handle.
    pub fn subscribe(&self, callback: EventCallback) -> Subscription {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push(Some(callback));
        Subscription {
            subscribers: Arc::clone(&self.subscribers),
            index: subscribers.len() - 1,
        }
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Callbacks are snapshotted before invocation so the registry lock is
    /// never held across a callback.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<EventCallback> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers.iter().filter_map(Clone::clone).collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }

    /// Number of live (non-cancelled) subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle to a registered subscription.
///
/// Cancelling is idempotent and safe from any thread. The subscription is
/// also cancelled when the handle is dropped.
pub struct Subscription {
    subscribers: SubscriberList,
    index: usize,
}

impl Subscription {
    /// Unregister the callback. Later events no longer reach it.
    pub fn cancel(&self) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(slot) = subscribers.get_mut(self.index) {
            *slot = None;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_callback() -> (EventCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: EventCallback = Arc::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (cb1, count1) = counting_callback();
        let (cb2, count2) = counting_callback();
        let _sub1 = bus.subscribe(cb1);
        let _sub2 = bus.subscribe(cb2);

        bus.emit(&Event::stdout("proc-1", "x\n"));

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_stops_delivery_and_is_idempotent() {
        let bus = EventBus::new();
        let (callback, count) = counting_callback();
        let sub = bus.subscribe(callback);

        bus.emit(&Event::stdout("proc-1", "a\n"));
        sub.cancel();
        sub.cancel();
        bus.emit(&Event::stdout("proc-1", "b\n"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_cancellation_keeps_other_indices_stable() {
        let bus = EventBus::new();
        let (cb1, count1) = counting_callback();
        let (cb2, count2) = counting_callback();
        let sub1 = bus.subscribe(cb1);
        let _sub2 = bus.subscribe(cb2);

        sub1.cancel();
        bus.emit(&Event::stdout("proc-1", "x\n"));

        assert_eq!(count1.load(Ordering::SeqCst), 0);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels_subscription() {
        let bus = EventBus::new();
        let (callback, count) = counting_callback();
        {
            let _sub = bus.subscribe(callback);
        }
        bus.emit(&Event::stdout("proc-1", "x\n"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
