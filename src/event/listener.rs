//! Weak listener registry.
//!
//! A [`ListenerRegistry`] keeps non-owning references to its listeners: it
//! never extends a listener's lifetime. Dead references are pruned whenever
//! the registry is mutated or an event is fired. Each registration also gets
//! a [`ListenerId`] token that can be used to unsubscribe explicitly.
//!
//! Delivery happens outside the registry lock, in registration order, so a
//! listener may add or remove listeners from inside its callback. A panic in
//! a listener is not caught here; it unwinds into whoever called `fire`.

use crate::basetypes::TaurusEventType;
use crate::model::{EventValue, TaurusModel};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receiver of model events.
pub trait TaurusListener: Send + Sync {
    /// Called for every event fired by a model the listener is registered on.
    fn event_received(&self, src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue);
}

impl<F> TaurusListener for F
where
    F: Fn(&dyn TaurusModel, TaurusEventType, &EventValue) + Send + Sync,
{
    fn event_received(&self, src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue) {
        self(src, ty, value)
    }
}

/// Wrap a closure as a shareable listener.
pub fn listener_fn<F>(f: F) -> Arc<dyn TaurusListener>
where
    F: Fn(&dyn TaurusModel, TaurusEventType, &EventValue) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Token identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    listener: Weak<dyn TaurusListener>,
}

/// Registry of weakly referenced listeners.
pub struct ListenerRegistry {
    // None once torn down
    entries: Mutex<Option<Vec<Entry>>>,
    next_id: AtomicU64,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener`, returning its token.
    ///
    /// Returns `None` if it is already registered or the registry has been
    /// torn down.
    pub fn subscribe(&self, listener: &Arc<dyn TaurusListener>) -> Option<ListenerId> {
        let weak = Arc::downgrade(listener);
        let mut guard = self.entries.lock();
        let entries = guard.as_mut()?;
        entries.retain(|e| e.listener.strong_count() > 0);
        if entries.iter().any(|e| Weak::ptr_eq(&e.listener, &weak)) {
            return None;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Entry { id, listener: weak });
        Some(id)
    }

    /// Register `listener`. `false` if already registered or torn down.
    pub fn add(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        self.subscribe(listener).is_some()
    }

    /// Unregister `listener`.
    ///
    /// `None` if torn down, `Some(false)` if it was not registered.
    pub fn remove(&self, listener: &Arc<dyn TaurusListener>) -> Option<bool> {
        let weak = Arc::downgrade(listener);
        self.remove_where(|e| Weak::ptr_eq(&e.listener, &weak))
    }

    /// Unregister by token.
    pub fn remove_id(&self, id: ListenerId) -> Option<bool> {
        self.remove_where(|e| e.id == id)
    }

    fn remove_where(&self, matches: impl Fn(&Entry) -> bool) -> Option<bool> {
        let mut guard = self.entries.lock();
        let entries = guard.as_mut()?;
        let before = entries.len();
        entries.retain(|e| !matches(e));
        let removed = entries.len() != before;
        entries.retain(|e| e.listener.strong_count() > 0);
        Some(removed)
    }

    /// Whether `listener` is registered.
    pub fn contains(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        let weak = Arc::downgrade(listener);
        self.entries
            .lock()
            .as_ref()
            .is_some_and(|entries| entries.iter().any(|e| Weak::ptr_eq(&e.listener, &weak)))
    }

    /// Live listeners in registration order; prunes dead references.
    pub fn listeners(&self) -> Vec<Arc<dyn TaurusListener>> {
        let mut guard = self.entries.lock();
        let Some(entries) = guard.as_mut() else {
            return Vec::new();
        };
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|e| match e.listener.upgrade() {
            Some(l) => {
                live.push(l);
                true
            }
            None => false,
        });
        live
    }

    /// Deliver an event to `subset`, or to every live listener.
    pub fn fire(
        &self,
        src: &dyn TaurusModel,
        ty: TaurusEventType,
        value: &EventValue,
        subset: Option<&[Arc<dyn TaurusListener>]>,
    ) {
        match subset {
            Some(listeners) => {
                for l in listeners {
                    l.event_received(src, ty, value);
                }
            }
            None => {
                for l in self.listeners() {
                    l.event_received(src, ty, value);
                }
            }
        }
    }

    /// Number of registrations not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, Vec::len)
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether at least one listener is registered.
    pub fn has_listeners(&self) -> bool {
        !self.is_empty()
    }

    /// Drop every registration and refuse new ones.
    pub fn tear_down(&self) {
        *self.entries.lock() = None;
    }

    /// Whether [`tear_down`](Self::tear_down) was called.
    pub fn is_torn_down(&self) -> bool {
        self.entries.lock().is_none()
    }
}
