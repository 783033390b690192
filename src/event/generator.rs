//! Condition-variable based event generators.
//!
//! An [`EventGenerator`] lets producers publish values and consumers either
//! subscribe a callback or block until a matching value arrives. Waiting
//! threads each get an [`EventStack`] so values published while they sleep
//! are not lost. Waits poll the condition variable every
//! [`EventGenerator::WAIT_TIMEOUT`], so a timeout may overshoot by up to that
//! slice.

use crate::error::{Result, TaurusError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Callback subscribed to an [`EventGenerator`].
pub type EventCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Unread/read history of values seen by one waiter.
#[derive(Debug, Clone)]
pub struct EventStack<T> {
    unread: VecDeque<T>,
    read: Vec<T>,
    history: bool,
}

impl<T: Clone> Default for EventStack<T> {
    fn default() -> Self {
        Self::new(true)
    }
}

impl<T: Clone> EventStack<T> {
    /// Empty stack. Without `history` consumed values are discarded.
    pub fn new(history: bool) -> Self {
        Self {
            unread: VecDeque::new(),
            read: Vec::new(),
            history,
        }
    }

    /// Append an unread value.
    pub fn push(&mut self, value: T) {
        self.unread.push_back(value);
    }

    /// Oldest unread value, marking it read.
    pub fn next(&mut self) -> Option<T> {
        let value = self.unread.pop_front()?;
        if self.history {
            self.read.push(value.clone());
        }
        Some(value)
    }

    /// Every unread value, marking them read.
    pub fn all_unread(&mut self) -> Vec<T> {
        let values: Vec<T> = self.unread.drain(..).collect();
        if self.history {
            self.read.extend(values.iter().cloned());
        }
        values
    }

    /// Values already read.
    pub fn all_read(&self) -> &[T] {
        &self.read
    }

    /// Whether there are no unread values.
    pub fn is_empty(&self) -> bool {
        self.unread.is_empty()
    }
}

struct GeneratorState<T> {
    last_val: Option<T>,
    callbacks: Vec<Weak<dyn Fn(&T) + Send + Sync>>,
    waiters: HashMap<u64, EventStack<T>>,
    next_waiter: u64,
}

/// Publish/wait primitive for values of type `T`.
pub struct EventGenerator<T> {
    name: String,
    events_active: AtomicBool,
    state: Mutex<GeneratorState<T>>,
    cond: Condvar,
}

impl<T> EventGenerator<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Slice used when polling the condition variable.
    pub const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

    /// New generator with events active.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events_active: AtomicBool::new(true),
            state: Mutex::new(GeneratorState {
                last_val: None,
                callbacks: Vec::new(),
                waiters: HashMap::new(),
                next_waiter: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Generator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe `cb`. With `with_first_event` it is called immediately with
    /// the most recent value, if there is one.
    pub fn subscribe(&self, cb: &EventCallback<T>, with_first_event: bool) -> Result<()> {
        self.ensure_active()?;
        let weak = Arc::downgrade(cb);
        let first = {
            let mut state = self.state.lock();
            state.callbacks.retain(|c| c.strong_count() > 0);
            if state.callbacks.iter().any(|c| Weak::ptr_eq(c, &weak)) {
                return Err(TaurusError::AlreadySubscribed(self.name.clone()));
            }
            state.callbacks.push(weak);
            state.last_val.clone()
        };
        if with_first_event {
            if let Some(value) = first {
                cb(&value);
            }
        }
        Ok(())
    }

    /// Unsubscribe `cb`; a no-op if it was not subscribed.
    pub fn unsubscribe(&self, cb: &EventCallback<T>) {
        let weak = Arc::downgrade(cb);
        let mut state = self.state.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|c| !Weak::ptr_eq(c, &weak) && c.strong_count() > 0);
        if state.callbacks.len() == before {
            tracing::debug!(generator = %self.name, "Trying to unsubscribe a callback that is not a listener");
        }
    }

    /// Whether `cb` is subscribed.
    pub fn is_subscribed(&self, cb: &EventCallback<T>) -> bool {
        let weak = Arc::downgrade(cb);
        self.state.lock().callbacks.iter().any(|c| Weak::ptr_eq(c, &weak))
    }

    /// (De)activate events.
    pub fn set_events_active(&self, active: bool) {
        self.events_active.store(active, Ordering::SeqCst);
    }

    /// Whether events are active.
    pub fn events_active(&self) -> bool {
        self.events_active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.events_active() {
            Ok(())
        } else {
            Err(TaurusError::EventsInactive(self.name.clone()))
        }
    }

    /// Publish `value`: record it, wake waiters, then run callbacks.
    pub fn fire(&self, value: T) {
        let callbacks: Vec<EventCallback<T>> = {
            let mut state = self.state.lock();
            state.last_val = Some(value.clone());
            for stack in state.waiters.values_mut() {
                stack.push(value.clone());
            }
            state.callbacks.retain(|c| c.strong_count() > 0);
            state.callbacks.iter().filter_map(Weak::upgrade).collect()
        };
        self.cond.notify_all();
        for cb in callbacks {
            cb(&value);
        }
    }

    /// Most recent value.
    pub fn read(&self) -> Option<T> {
        self.state.lock().last_val.clone()
    }

    /// Block until a value equal (or, with `equal == false`, different) to
    /// `val` is current or arrives. With `any` the next published value
    /// unblocks regardless of its content.
    ///
    /// Returns the value that unblocked the wait, or `None` on timeout.
    pub fn wait_event(
        &self,
        val: &T,
        equal: bool,
        any: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<T>> {
        let accepts = |v: &T| (v == val) == equal;
        self.wait_matching(accepts, any, timeout)
    }

    /// Like [`wait_event`](Self::wait_event) with an arbitrary predicate.
    pub fn wait_matching(
        &self,
        accepts: impl Fn(&T) -> bool,
        any: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<T>> {
        self.ensure_active()?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        if !any {
            if let Some(last) = state.last_val.as_ref().filter(|v| accepts(v)) {
                return Ok(Some(last.clone()));
            }
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        state.waiters.insert(id, EventStack::new(false));

        let outcome = loop {
            let pending = state
                .waiters
                .get_mut(&id)
                .map(EventStack::all_unread)
                .unwrap_or_default();
            if let Some(v) = pending.into_iter().find(|v| any || accepts(v)) {
                break Some(v);
            }
            let slice = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break None;
                    }
                    Self::WAIT_TIMEOUT.min(d - now)
                }
                None => Self::WAIT_TIMEOUT,
            };
            self.cond.wait_for(&mut state, slice);
        };

        state.waiters.remove(&id);
        Ok(outcome)
    }
}

/// A list value together with the elements removed from and added to the
/// previous one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListChange<T> {
    /// The new list.
    pub value: Vec<T>,
    /// Elements no longer present.
    pub removed: Vec<T>,
    /// Elements newly present.
    pub added: Vec<T>,
}

/// Event generator for list values that publishes diffs.
pub struct ListEventGenerator<T> {
    inner: EventGenerator<ListChange<T>>,
}

impl<T> ListEventGenerator<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// New generator with events active.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: EventGenerator::new(name),
        }
    }

    /// Underlying generator (for subscription and activation control).
    pub fn generator(&self) -> &EventGenerator<ListChange<T>> {
        &self.inner
    }

    /// Publish a new list. `None` means "not available" and is published as
    /// an empty list unless the previous value was already empty.
    pub fn fire(&self, value: Option<Vec<T>>) {
        let last = self.inner.read().map(|c| c.value).unwrap_or_default();
        let value = match value {
            Some(v) => v,
            None if last.is_empty() => return,
            None => Vec::new(),
        };
        let removed = last.iter().filter(|x| !value.contains(x)).cloned().collect();
        let added = value.iter().filter(|x| !last.contains(x)).cloned().collect();
        self.inner.fire(ListChange {
            value,
            removed,
            added,
        });
    }

    /// Current list.
    pub fn read(&self) -> Vec<T> {
        self.inner.read().map(|c| c.value).unwrap_or_default()
    }

    /// Wait for the list to equal (or differ from) `val`.
    pub fn wait_event(
        &self,
        val: &[T],
        equal: bool,
        any: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<ListChange<T>>> {
        self.inner
            .wait_matching(|c| (c.value.as_slice() == val) == equal, any, timeout)
    }
}
