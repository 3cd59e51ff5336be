//! Subscription-based events.
//!
//! Every listener registration hands back a [`Subscription`]. Dropping it (or
//! calling [`Subscription::dispose`]) removes the listener exactly once, so a
//! torn-down component can never be delivered to again.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::utils::lock;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Runs its closure once, on drop, unless it already ran.
struct Disposer(Option<Box<dyn FnOnce() + Send>>);

impl Disposer {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    fn run(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

/// Handle to a registered listener.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    disposer: Disposer,
}

impl Subscription {
    pub fn new(on_dispose: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Disposer::new(on_dispose),
        }
    }

    /// A subscription to an event source that never fires.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn dispose(mut self) {
        self.disposer.run();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disposer.0.is_some())
            .finish()
    }
}

/// Multi-listener event source. Cloning yields another handle to the same
/// listener list.
pub struct Emitter<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };
        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                lock(&listeners).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `event` to every current listener.
    ///
    /// The listener list is snapshotted first; listeners may subscribe,
    /// unsubscribe or fire re-entrantly.
    pub fn fire(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    pub fn clear(&self) {
        lock(&self.listeners).entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_reaches_all_listeners() {
        let emitter = Emitter::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = total.clone();
        let _a = emitter.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = total.clone();
        let _b = emitter.subscribe(move |v| {
            t2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        emitter.fire(&5);
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let emitter = Emitter::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = emitter.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        emitter.fire(&());
        drop(sub);
        emitter.fire(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_dispose_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let sub = Subscription::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        sub.dispose();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_emitter_is_harmless() {
        let emitter = Emitter::<()>::new();
        let sub = emitter.subscribe(|_| {});
        drop(emitter);
        drop(sub);
    }
}
