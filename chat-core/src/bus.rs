//! Event bus: typed publish/subscribe with handle-owned subscriptions.
//!
//! Callbacks run synchronously on the publishing thread, in registration
//! order. A panicking callback is isolated and logged; the rest still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::event::{ClientEvent, EventKind};

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Listener {
    id: u64,
    /// `None` listens to every kind.
    kind: Option<EventKind>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

impl Registry {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    fn contains(&self, id: u64) -> bool {
        self.listeners.iter().any(|l| l.id == id)
    }
}

/// Publish/subscribe registry for [`ClientEvent`]s.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(callback))
    }

    /// Register `callback` for every event.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(callback))
    }

    fn register(&self, kind: Option<EventKind>, callback: Callback) -> Subscription {
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push(Listener { id, kind, callback });
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            active: true,
        }
    }

    /// Deliver `event` to every matching callback, in registration order.
    ///
    /// Callbacks registered during this pass are not invoked for this event.
    /// Callbacks removed during this pass are skipped.
    pub fn publish(&self, event: &ClientEvent) {
        let kind = event.kind();
        let targets: Vec<(u64, Callback)> = self
            .lock()
            .listeners
            .iter()
            .filter(|l| l.kind.map_or(true, |k| k == kind))
            .map(|l| (l.id, Arc::clone(&l.callback)))
            .collect();

        for (id, callback) in targets {
            if !self.lock().contains(id) {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                tracing::error!(
                    kind = %kind,
                    listener = id,
                    panic = panic_message(&*panic),
                    "event listener panicked"
                );
            }
        }
    }

    /// Number of registered callbacks (all kinds).
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

/// Handle owning a registered callback.
///
/// Dropping the handle unsubscribes. Call [`detach`](Self::detach) to keep
/// the callback for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl Subscription {
    /// Remove the callback. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
    }

    /// Keep the callback registered after this handle is dropped.
    pub fn detach(mut self) {
        self.active = false;
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.active
            && self.registry.upgrade().is_some_and(|registry| {
                registry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .contains(self.id)
            })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&ClientEvent) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        let make = move |name: &str| {
            let log = Arc::clone(&log2);
            let name = name.to_string();
            Box::new(move |_: &ClientEvent| log.lock().unwrap().push(name.clone()))
                as Box<dyn Fn(&ClientEvent) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let _a = bus.subscribe(EventKind::Connected, make("a"));
        let _b = bus.subscribe(EventKind::Connected, make("b"));
        let _c = bus.subscribe(EventKind::Connected, make("c"));

        bus.publish(&ClientEvent::Connected);

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let _a = bus.subscribe(EventKind::Connected, make("connected"));
        let _b = bus.subscribe(EventKind::Disconnected, make("disconnected"));

        bus.publish(&ClientEvent::Connected);

        assert_eq!(*log.lock().unwrap(), vec!["connected"]);
    }

    #[test]
    fn subscribe_all_sees_every_kind() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _all = bus.subscribe_all(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&ClientEvent::Connected);
        bus.publish(&ClientEvent::MaxReconnectReached { attempts: 5 });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_callback_does_not_stop_others() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let _a = bus.subscribe(EventKind::Connected, make("a"));
        let _boom = bus.subscribe(EventKind::Connected, |_| panic!("listener bug"));
        let _c = bus.subscribe(EventKind::Connected, make("c"));

        bus.publish(&ClientEvent::Connected);

        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let sub = bus.subscribe(EventKind::Connected, make("a"));
        drop(sub);

        bus.publish(&ClientEvent::Connected);

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (_log, make) = recorder();
        let mut keep = bus.subscribe(EventKind::Connected, make("keep"));
        let mut sub = bus.subscribe(EventKind::Connected, make("a"));

        sub.unsubscribe();
        sub.unsubscribe();

        assert!(!sub.is_active());
        assert!(keep.is_active());
        assert_eq!(bus.listener_count(), 1);
        keep.unsubscribe();
    }

    #[test]
    fn detached_subscription_outlives_handle() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.subscribe(EventKind::Connected, make("a")).detach();

        bus.publish(&ClientEvent::Connected);

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn removal_during_dispatch_skips_removed_callback() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let v = Arc::clone(&victim);
        let _remover = bus.subscribe(EventKind::Connected, move |_| {
            if let Some(mut sub) = v.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *victim.lock().unwrap() = Some(bus.subscribe(EventKind::Connected, make("victim")));
        let _survivor = bus.subscribe(EventKind::Connected, make("survivor"));

        bus.publish(&ClientEvent::Connected);

        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn subscription_added_during_dispatch_waits_for_next_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let added: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));

        let (bus2, count2, added2) = (bus.clone(), Arc::clone(&count), Arc::clone(&added));
        let _adder = bus.subscribe(EventKind::Connected, move |_| {
            let c = Arc::clone(&count2);
            let sub = bus2.subscribe(EventKind::Connected, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
            added2.lock().unwrap().push(sub);
        });

        bus.publish(&ClientEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.publish(&ClientEvent::Connected);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::Connected, |_| {});
        drop(bus);
        assert!(!sub.is_active());
        sub.unsubscribe();
    }
}
