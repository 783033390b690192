//! The model element abstraction.
//!
//! Every element (authority, device, attribute, configuration) composes a
//! [`ModelCore`] holding its three names, its listener registry and its
//! serialization mode, and implements [`TaurusModel`] on top of it.
//! Elements only hold weak references to their factory and parent; the
//! factory cache owns them.

use crate::basetypes::{AttrInfo, AttrValue, DataValue, DevState, ElementType, SerializationMode, TaurusEventType};
use crate::event::listener::{listener_fn, ListenerRegistry, TaurusListener};
use crate::factory::TaurusFactory;
use crate::validator::NameTriple;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Payload delivered with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    /// Attribute value object.
    Value(AttrValue),
    /// Device state.
    State(DevState),
    /// Attribute metadata.
    Info(AttrInfo),
    /// Error message.
    Error(String),
}

impl EventValue {
    /// Read value carried by the event, if any.
    pub fn rvalue(&self) -> Option<&DataValue> {
        match self {
            EventValue::Value(v) => v.rvalue.as_ref(),
            _ => None,
        }
    }
}

/// State shared by every model element.
pub struct ModelCore {
    names: NameTriple,
    full_name: String,
    listeners: ListenerRegistry,
    mode: Mutex<SerializationMode>,
    factory: Weak<TaurusFactory>,
    forced: Mutex<Option<Arc<dyn TaurusListener>>>,
}

impl ModelCore {
    /// Core for an element named by `names`.
    pub fn new(names: NameTriple, mode: SerializationMode, factory: Weak<TaurusFactory>) -> Self {
        let full_name = names.best().unwrap_or_default().to_string();
        Self {
            names,
            full_name,
            listeners: ListenerRegistry::new(),
            mode: Mutex::new(mode),
            factory,
            forced: Mutex::new(None),
        }
    }

    /// Name forms.
    pub fn names(&self) -> &NameTriple {
        &self.names
    }

    /// Most qualified name.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Listener registry.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Owning factory, if still alive.
    pub fn factory(&self) -> Option<Arc<TaurusFactory>> {
        self.factory.upgrade()
    }

    /// Serialization mode.
    pub fn mode(&self) -> SerializationMode {
        *self.mode.lock()
    }

    /// Change the serialization mode.
    pub fn set_mode(&self, mode: SerializationMode) {
        *self.mode.lock() = mode;
    }
}

/// Common interface of model elements.
pub trait TaurusModel: Send + Sync {
    /// Shared state.
    fn core(&self) -> &ModelCore;

    /// `self` as a trait object.
    fn as_model(&self) -> &dyn TaurusModel;

    /// Kind of element.
    fn element_type(&self) -> ElementType;

    /// Parent element, if any.
    fn parent_obj(&self) -> Option<Arc<dyn TaurusModel>> {
        None
    }

    /// Whether the element accepts writes.
    fn is_writable(&self) -> bool {
        false
    }

    /// Human readable description.
    fn description(&self) -> String {
        format!("A {} element", self.element_type())
    }

    /// Register a listener. `false` if already registered or disposed.
    fn add_listener(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        self.core().listeners().add(listener)
    }

    /// Unregister a listener. `None` if disposed.
    fn remove_listener(&self, listener: &Arc<dyn TaurusListener>) -> Option<bool> {
        self.core().listeners().remove(listener)
    }

    /// Release resources; the element no longer accepts listeners.
    fn clean_up(&self) {
        *self.core().forced.lock() = None;
        self.core().listeners().tear_down();
    }

    /// Complete name.
    fn full_name(&self) -> &str {
        self.core().full_name()
    }

    /// Normal name.
    fn normal_name(&self) -> Option<&str> {
        self.core().names().normal.as_deref()
    }

    /// Short name.
    fn simple_name(&self) -> Option<&str> {
        self.core().names().short.as_deref()
    }

    /// Display name: the short name, followed by the upper-cased normal
    /// name in parentheses when `complete`.
    fn display_name(&self, complete: bool) -> String {
        let short = self.simple_name().unwrap_or(self.full_name());
        match (complete, self.normal_name()) {
            (true, Some(normal)) if normal != short => {
                format!("{} ({})", short, normal.to_uppercase())
            }
            _ => short.to_string(),
        }
    }

    /// Whether any listener is registered.
    fn has_listeners(&self) -> bool {
        self.core().listeners().has_listeners()
    }

    /// Deliver an event to every listener.
    fn fire_event(&self, ty: TaurusEventType, value: &EventValue) {
        self.core().listeners().fire(self.as_model(), ty, value, None);
    }

    /// Deliver an event to `listeners` only.
    fn fire_event_to(&self, ty: TaurusEventType, value: &EventValue, listeners: &[Arc<dyn TaurusListener>]) {
        self.core().listeners().fire(self.as_model(), ty, value, Some(listeners));
    }

    /// Serialization mode.
    fn serialization_mode(&self) -> SerializationMode {
        self.core().mode()
    }

    /// Change the serialization mode.
    fn set_serialization_mode(&self, mode: SerializationMode) {
        self.core().set_mode(mode);
    }

    /// Owning factory.
    fn factory(&self) -> Option<Arc<TaurusFactory>> {
        self.core().factory()
    }

    /// Keep the element listening without a real listener.
    fn force_listening(&self) {
        let listener = {
            let mut forced = self.core().forced.lock();
            if forced.is_some() {
                return;
            }
            let l = listener_fn(|_, _, _| {});
            *forced = Some(Arc::clone(&l));
            l
        };
        self.add_listener(&listener);
    }

    /// Undo [`force_listening`](Self::force_listening).
    fn unforce_listening(&self) {
        let listener = self.core().forced.lock().take();
        if let Some(l) = listener {
            self.remove_listener(&l);
        }
    }

    /// Whether listening is forced.
    fn is_listening_forced(&self) -> bool {
        self.core().forced.lock().is_some()
    }
}
