use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<K, T> {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, (K, Handler<T>)>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<K: Send + 'static, T: 'static> Detach for Slots<K, T> {
    fn detach(&self, id: u64) -> bool {
        self.entries
            .lock()
            .map(|mut entries| entries.remove(&id).is_some())
            .unwrap_or(false)
    }
}

/// Keyed subscriber list. Handlers are kept in subscription order and
/// invoked outside the internal lock so they may re-enter the owner.
pub struct Subscribers<K, T> {
    slots: Arc<Slots<K, T>>,
}

impl<K, T> Clone for Subscribers<K, T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K, T> Default for Subscribers<K, T>
where
    K: Send + 'static,
    T: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> Subscribers<K, T>
where
    K: Send + 'static,
    T: 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Slots {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn subscribe(&self, key: K, handler: Handler<T>) -> Subscription {
        let id = self.slots.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut entries) = self.slots.entries.lock() {
            entries.insert(id, (key, handler));
        }
        let slots: Arc<dyn Detach> = self.slots.clone();
        Subscription {
            id,
            owner: Arc::downgrade(&slots),
        }
    }

    /// Handlers whose key satisfies `filter`, in subscription order.
    pub fn matching(&self, filter: impl Fn(&K) -> bool) -> Vec<Handler<T>> {
        self.slots
            .entries
            .lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|(key, _)| filter(key))
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver `value` to every matching handler. A panicking handler is
    /// logged and skipped; delivery continues with the next one.
    pub fn notify(&self, value: &T, filter: impl Fn(&K) -> bool) -> usize {
        let handlers = self.matching(filter);
        let mut delivered = 0;
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                tracing::warn!("subscriber panicked during delivery");
                continue;
            }
            delivered += 1;
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.slots.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.slots.entries.lock() {
            entries.clear();
        }
    }
}

impl<T: 'static> Subscribers<(), T> {
    pub fn subscribe_fn(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.subscribe((), Arc::new(handler))
    }

    pub fn emit(&self, value: &T) -> usize {
        self.notify(value, |_| true)
    }
}

/// Handle returned by every subscribe call. Dropping it does not
/// unsubscribe; call [`Subscription::unsubscribe`] or hand it to a
/// [`SubscriptionSet`].
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    owner: Weak<dyn Detach>,
}

impl Subscription {
    /// Returns `false` when the subscription was already removed or its
    /// owner no longer exists.
    pub fn unsubscribe(&self) -> bool {
        self.owner
            .upgrade()
            .map(|owner| owner.detach(self.id))
            .unwrap_or(false)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Owns a group of subscriptions and releases them together.
#[derive(Default, Debug)]
pub struct SubscriptionSet {
    items: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sub: Subscription) {
        self.items.push(sub);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        for sub in self.items.drain(..) {
            sub.unsubscribe();
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_in_subscription_order() {
        let subs: Subscribers<(), u32> = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _ = subs.subscribe_fn(move |v| seen.lock().unwrap().push(format!("{tag}{v}")));
        }
        subs.emit(&1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let subs: Subscribers<(), u32> = Subscribers::new();
        let sub = subs.subscribe_fn(|_| {});
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(subs.is_empty());
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let subs: Subscribers<(), u32> = Subscribers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _ = subs.subscribe_fn(|_| panic!("boom"));
        let c = count.clone();
        let _ = subs.subscribe_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(subs.emit(&7), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_set_releases_on_drop() {
        let subs: Subscribers<String, u32> = Subscribers::new();
        {
            let mut set = SubscriptionSet::new();
            set.push(subs.subscribe("a".into(), Arc::new(|_| {})));
            set.push(subs.subscribe("b".into(), Arc::new(|_| {})));
            assert_eq!(subs.len(), 2);
        }
        assert!(subs.is_empty());
    }

    #[test]
    fn keyed_filter_selects_handlers() {
        let subs: Subscribers<String, u32> = Subscribers::new();
        let _a = subs.subscribe("x".into(), Arc::new(|_| {}));
        let _b = subs.subscribe("y".into(), Arc::new(|_| {}));
        assert_eq!(subs.notify(&1, |k| k == "x"), 1);
    }
}
