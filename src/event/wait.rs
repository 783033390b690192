//! Blocking waits on attribute events.

use crate::attribute::TaurusAttribute;
use crate::basetypes::{DataValue, TaurusEventType, TimeVal};
use crate::event::listener::TaurusListener;
use crate::model::{EventValue, TaurusModel};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Default)]
struct EventSet {
    // (value, local arrival time); one entry per distinct value
    events: Vec<(Option<DataValue>, f64)>,
    last: Option<DataValue>,
}

/// Listener recording the values an attribute publishes, so a thread can
/// block until a given value shows up.
///
/// Error events are recorded as `None`; configuration events are ignored.
/// A value seen again only refreshes its timestamp.
pub struct AttributeEventWait {
    me: Weak<AttributeEventWait>,
    attr: Mutex<Option<Arc<TaurusAttribute>>>,
    state: Mutex<EventSet>,
    cond: Condvar,
}

impl AttributeEventWait {
    /// Unconnected waiter.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            attr: Mutex::new(None),
            state: Mutex::new(EventSet::default()),
            cond: Condvar::new(),
        })
    }

    /// Waiter connected to `attr`.
    pub fn with_attribute(attr: &Arc<TaurusAttribute>) -> Arc<Self> {
        let wait = Self::new();
        wait.connect(attr);
        wait
    }

    fn as_listener(&self) -> Option<Arc<dyn TaurusListener>> {
        self.me.upgrade().map(|w| w as Arc<dyn TaurusListener>)
    }

    /// Connect to `attr`, leaving any previous attribute and clearing the
    /// recorded events.
    pub fn connect(&self, attr: &Arc<TaurusAttribute>) {
        let previous = self.attr.lock().replace(Arc::clone(attr));
        let same = previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, attr));
        let me = self.as_listener();
        if let (Some(previous), Some(me)) = (previous.filter(|_| !same), me.as_ref()) {
            previous.remove_listener(me);
        }
        self.clear_event_set();
        if let (false, Some(me)) = (same, me) {
            attr.add_listener(&me);
        }
    }

    /// Leave the attribute. Does nothing if not connected.
    pub fn disconnect(&self) {
        self.clear_event_set();
        let previous = self.attr.lock().take();
        if let (Some(attr), Some(me)) = (previous, self.as_listener()) {
            attr.remove_listener(&me);
        }
    }

    /// Attribute currently connected.
    pub fn attribute(&self) -> Option<Arc<TaurusAttribute>> {
        self.attr.lock().clone()
    }

    /// Forget every recorded event.
    pub fn clear_event_set(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.last = None;
    }

    /// Value of the last event; `None` if nothing arrived or it was an error.
    pub fn last_recorded_event(&self) -> Option<DataValue> {
        self.state.lock().last.clone()
    }

    /// Arrival time (seconds since the epoch) of the last event with `value`.
    pub fn recorded_event(&self, value: Option<&DataValue>) -> Option<f64> {
        self.state
            .lock()
            .events
            .iter()
            .find(|(v, _)| v.as_ref() == value)
            .map(|(_, t)| *t)
    }

    /// Every recorded `(value, arrival time)` pair.
    pub fn recorded_events(&self) -> Vec<(Option<DataValue>, f64)> {
        self.state.lock().events.clone()
    }

    fn record(&self, value: Option<DataValue>) {
        let now = TimeVal::now().to_time();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.last = value.clone();
            match state.events.iter_mut().find(|(v, _)| *v == value) {
                Some(entry) => entry.1 = now,
                None => state.events.push((value, now)),
            }
        }
        self.cond.notify_all();
    }

    /// Block until an event arrived at or after `after` (seconds since the
    /// epoch) that matches.
    ///
    /// With `any` every event matches. Otherwise an event matches when its
    /// value equals `value` (`equal`) or differs from it (`!equal`).
    ///
    /// `retries` bounds the number of waits of `timeout` each: negative
    /// means unlimited and 0 means only check what was already recorded.
    /// Without a timeout a single unbounded wait is done. Returns whether a
    /// matching event was found.
    pub fn wait_event(
        &self,
        value: Option<&DataValue>,
        after: f64,
        equal: bool,
        timeout: Option<Duration>,
        retries: i32,
        any: bool,
    ) -> bool {
        let mut remaining = match timeout {
            None if retries != 0 => 1,
            _ => retries,
        };
        let mut state = self.state.lock();
        loop {
            let found = state.events.iter().any(|(v, t)| {
                *t >= after && (any || (v.as_ref() == value) == equal)
            });
            if found {
                return true;
            }
            if remaining == 0 {
                return false;
            }
            match timeout {
                Some(t) => {
                    self.cond.wait_for(&mut state, t);
                }
                None => self.cond.wait(&mut state),
            }
            if remaining > 0 {
                remaining -= 1;
            }
        }
    }
}

impl TaurusListener for AttributeEventWait {
    fn event_received(&self, _src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue) {
        match ty {
            TaurusEventType::Config => {}
            TaurusEventType::Error => self.record(None),
            _ => self.record(value.rvalue().cloned()),
        }
    }
}
