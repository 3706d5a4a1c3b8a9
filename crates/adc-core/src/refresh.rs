use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

type Listener = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    counter: u64,
    next_listener_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// "The navigation tree may be stale" signal shared by every mutation source.
///
/// Cloning yields another handle onto the same bus.
#[derive(Clone, Default)]
pub struct RefreshBus {
    inner: Arc<Mutex<BusInner>>,
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the counter and notifies listeners in subscription order.
    pub fn publish(&self) -> u64 {
        let (counter, listeners) = {
            let mut inner = lock(&self.inner);
            inner.counter += 1;
            let listeners: Vec<Listener> = inner
                .listeners
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();
            (inner.counter, listeners)
        };
        debug!(
            event = "refresh_published",
            counter,
            listeners = listeners.len()
        );
        for listener in listeners {
            listener(counter);
        }
        counter
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    pub fn current(&self) -> u64 {
        lock(&self.inner).counter
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<Mutex<BusInner>>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus).listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
