//! Synchronous typed publish/subscribe.
//!
//! Handlers run in registration order on the emitting call stack; there is
//! no queueing or batching. Dispatch iterates over a snapshot of the
//! registry taken under the lock and released before any handler runs, so a
//! handler may subscribe or unsubscribe (itself included) mid-dispatch
//! without panicking or skipping the rest of the snapshot; such changes take
//! effect from the next `emit`.

use super::types::{EventKind, SpinEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler = Arc<dyn Fn(&SpinEvent) + Send + Sync>;

struct Registered {
    id: u64,
    filter: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Registered>,
}

/// Cheap-clone handle to a shared handler registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind. The handler stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SpinEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event.
    pub fn on_any(&self, handler: impl Fn(&SpinEvent) + Send + Sync + 'static) -> Subscription {
        self.register(None, Arc::new(handler))
    }

    /// Dispatch an event to all matching handlers, in registration order.
    pub fn emit(&self, event: &SpinEvent) {
        let kind = event.kind();
        let snapshot: Vec<Handler> = {
            let registry = lock(&self.registry);
            registry
                .entries
                .iter()
                .filter(|entry| entry.filter.is_none() || entry.filter == Some(kind))
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of live handlers, for diagnostics and tests.
    pub fn handler_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    fn register(&self, filter: Option<EventKind>, handler: Handler) -> Subscription {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push(Registered {
            id,
            filter,
            handler,
        });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }
}

/// Removes its handler when unsubscribed or dropped.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the handler now. Dropping the subscription does the same.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|entry| entry.id != self.id);
        }
    }
}

// A poisoned registry only means some handler panicked; the entries are
// still consistent, so recover the guard instead of propagating.
fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GameError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queued(spin_id: uuid::Uuid) -> SpinEvent {
        SpinEvent::Queued {
            spin_id,
            total_bet: 5_000_000,
            paylines: 5,
        }
    }

    fn failed() -> SpinEvent {
        SpinEvent::Failed {
            spin_id: None,
            error: GameError::unknown("x"),
        }
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let order = Arc::clone(&order);
            bus.on_any(move |_| lock_order(&order).push(1))
        };
        let second = {
            let order = Arc::clone(&order);
            bus.on_any(move |_| lock_order(&order).push(2))
        };

        bus.emit(&queued(uuid::Uuid::new_v4()));
        assert_eq!(*lock_order(&order), vec![1, 2]);

        drop(first);
        drop(second);
    }

    #[test]
    fn kind_filter_only_sees_matching_events() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let subscription = {
            let hits = Arc::clone(&hits);
            bus.on(EventKind::Failed, move |event| {
                assert_eq!(event.kind(), EventKind::Failed);
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.emit(&queued(uuid::Uuid::new_v4()));
        bus.emit(&failed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        bus.emit(&failed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            let _subscription = bus.on_any(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
            bus.emit(&failed());
        }
        bus.emit(&failed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn unsubscribe_during_dispatch_does_not_skip_other_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        // The first handler drops its own subscription mid-dispatch.
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let first = {
            let slot = Arc::clone(&slot);
            bus.on_any(move |_| {
                if let Ok(mut guard) = slot.lock() {
                    guard.take();
                }
            })
        };
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(first);
        }

        let second = {
            let hits = Arc::clone(&hits);
            bus.on_any(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.emit(&failed());
        assert_eq!(hits.load(Ordering::SeqCst), 1, "second handler still ran");

        // The self-removed handler is gone from the next dispatch.
        bus.emit(&failed());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.handler_count(), 1);

        drop(second);
    }

    fn lock_order(order: &Mutex<Vec<u32>>) -> std::sync::MutexGuard<'_, Vec<u32>> {
        order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
