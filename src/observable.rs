//! Minimal reactive value container.
//!
//! An [`Observable`] owns one value and an ordered subscriber list. Replacing
//! the value notifies every subscriber synchronously, in registration order.
//! There is no batching and no deep diffing: `set` replaces, it never merges.
//!
//! Subscriber identity is the explicit [`SubscriptionId`] returned by
//! [`Observable::subscribe`], never the callback value itself.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static OBSERVABLE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_observable_id() -> ObservableId {
    ObservableId(OBSERVABLE_ID_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Process-unique identity of an observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

/// Identity of one subscription on one observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Rc<dyn Fn(&T)>;

struct ObservableInner<T> {
    id: ObservableId,
    value: RefCell<T>,
    subscribers: RefCell<Vec<(SubscriptionId, Subscriber<T>)>>,
    next_subscription: Cell<u64>,
}

/// Shared handle to a reactive value. Cloning the handle shares the value.
pub struct Observable<T> {
    inner: Rc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    pub fn new(value: T) -> Self {
        Observable {
            inner: Rc::new(ObservableInner {
                id: generate_observable_id(),
                value: RefCell::new(value),
                subscribers: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> ObservableId {
        self.inner.id
    }

    /// Clone out the current value.
    pub fn read(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value and notify subscribers.
    ///
    /// Subscribers run against a snapshot of the list taken before the first
    /// call; a subscriber removed by an earlier one in the same round is
    /// skipped.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.notify();
    }

    /// Derive the next value from the current one, then [`set`](Self::set) it.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with(f);
        self.set(next);
    }

    pub fn subscribe(&self, subscriber: impl Fn(&T) + 'static) -> Subscription<T> {
        let id = SubscriptionId(self.inner.next_subscription.get());
        self.inner.next_subscription.set(id.0 + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(subscriber)));

        Subscription {
            observable: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Returns `false` when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Observable<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .any(|(sub_id, _)| *sub_id == id)
    }

    fn notify(&self) {
        let snapshot: Vec<(SubscriptionId, Subscriber<T>)> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(id, sub)| (*id, Rc::clone(sub)))
            .collect();

        let current = self.read();
        for (id, subscriber) in snapshot {
            if self.is_subscribed(id) {
                subscriber(&current);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.try_borrow() {
            Ok(value) => f
                .debug_struct("Observable")
                .field("id", &self.inner.id)
                .field("value", &*value)
                .finish(),
            Err(_) => f
                .debug_struct("Observable")
                .field("id", &self.inner.id)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to one registered subscriber. Dropping it does not unsubscribe;
/// call [`Subscription::unsubscribe`].
pub struct Subscription<T> {
    observable: Weak<ObservableInner<T>>,
    id: SubscriptionId,
}

impl<T: Clone + 'static> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns `false` when the observable is gone or the subscription was
    /// already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.observable.upgrade() {
            Some(inner) => Observable { inner }.unsubscribe(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match self.observable.upgrade() {
            Some(inner) => Observable { inner }.is_subscribed(self.id),
            None => false,
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
