//! Listener registration, weak ownership and first-event delivery.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use taurus_core::basetypes::{DataValue, DevState, SerializationMode, TaurusEventType};
use taurus_core::config::TaurusConfig;
use taurus_core::event::{ListenerRegistry, TaurusListener};
use taurus_core::model::{EventValue, TaurusModel};
use taurus_core::{TaurusAttribute, TaurusManager};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(TaurusEventType, EventValue)>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn types(&self) -> Vec<TaurusEventType> {
        self.events.lock().iter().map(|(t, _)| *t).collect()
    }

    fn last(&self) -> Option<EventValue> {
        self.events.lock().last().map(|(_, v)| v.clone())
    }
}

impl TaurusListener for Recorder {
    fn event_received(&self, _src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue) {
        self.events.lock().push((ty, value.clone()));
    }
}

/// Removes itself from the attribute on the first periodic event.
struct OneShot {
    me: Weak<OneShot>,
    attr: Arc<TaurusAttribute>,
    hits: Mutex<usize>,
}

impl TaurusListener for OneShot {
    fn event_received(&self, _src: &dyn TaurusModel, ty: TaurusEventType, _value: &EventValue) {
        if ty != TaurusEventType::Periodic {
            return;
        }
        *self.hits.lock() += 1;
        if let Some(me) = self.me.upgrade() {
            let me: Arc<dyn TaurusListener> = me;
            self.attr.remove_listener(&me);
        }
    }
}

fn serial_manager() -> TaurusManager {
    let mut config = TaurusConfig::default();
    config.serialization_mode = SerializationMode::Serial;
    config.polling.enabled = false;
    TaurusManager::new(config).unwrap()
}

#[test]
fn test_first_listener_receives_current_value() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn TaurusListener> = recorder.clone();

    assert!(attr.add_listener(&listener));
    assert_eq!(recorder.types(), vec![TaurusEventType::Change]);
    assert_eq!(
        recorder.last().and_then(|v| v.rvalue().cloned()),
        Some(DataValue::Float(0.0))
    );
}

#[test]
fn test_listener_on_disabled_polling_is_not_active() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn TaurusListener> = recorder.clone();

    assert!(attr.add_listener(&listener));
    assert!(!attr.is_polling_active());
    attr.remove_listener(&listener);
}

#[test]
fn test_each_first_listener_gets_one_initial_event() {
    let mut config = TaurusConfig::default();
    config.serialization_mode = SerializationMode::Serial;
    config.polling.default_period_ms = 60_000;
    let manager = TaurusManager::new(config).unwrap();
    let voltage = manager.get_attribute("a/b/c/voltage").unwrap();
    let counter = manager.get_attribute("a/b/c/counter").unwrap();

    let first = Recorder::new();
    let first_listener: Arc<dyn TaurusListener> = first.clone();
    assert!(voltage.add_listener(&first_listener));
    assert!(voltage.is_polling_active());

    // joins a timer that is already running
    let second = Recorder::new();
    let second_listener: Arc<dyn TaurusListener> = second.clone();
    assert!(counter.add_listener(&second_listener));
    assert_eq!(second.types(), vec![TaurusEventType::Change]);
    assert_eq!(first.types(), vec![TaurusEventType::Change]);

    voltage.remove_listener(&first_listener);
    counter.remove_listener(&second_listener);
}

#[test]
fn test_duplicate_registration_rejected() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    let listener: Arc<dyn TaurusListener> = Recorder::new();

    assert!(attr.add_listener(&listener));
    assert!(!attr.add_listener(&listener));
    assert_eq!(attr.remove_listener(&listener), Some(true));
    assert_eq!(attr.remove_listener(&listener), Some(false));
    assert!(!attr.has_listeners());
}

#[test]
fn test_registry_does_not_keep_listeners_alive() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn TaurusListener> = recorder.clone();
    attr.add_listener(&listener);

    drop(listener);
    drop(recorder);
    // the next delivery prunes the dead entry
    attr.poll();
    assert!(!attr.has_listeners());
}

#[test]
fn test_listener_may_unsubscribe_during_delivery() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/counter").unwrap();
    let one_shot = Arc::new_cyclic(|me| OneShot {
        me: me.clone(),
        attr: Arc::clone(&attr),
        hits: Mutex::new(0),
    });
    let listener: Arc<dyn TaurusListener> = one_shot.clone();
    attr.add_listener(&listener);

    attr.poll();
    attr.poll();
    assert_eq!(*one_shot.hits.lock(), 1);
    assert!(!attr.has_listeners());
}

#[test]
fn test_errors_are_delivered_as_error_events() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn TaurusListener> = recorder.clone();
    attr.add_listener(&listener);

    attr.poll_value(Err(taurus_core::TaurusError::Backend("link down".into())));
    assert_eq!(recorder.types().last(), Some(&TaurusEventType::Error));
    assert!(attr.read(true).unwrap().is_error());
}

#[test]
fn test_device_listener_receives_state() {
    let manager = serial_manager();
    let device = manager.get_device("a/b/c").unwrap();
    let recorder = Recorder::new();
    let listener: Arc<dyn TaurusListener> = recorder.clone();

    device.add_listener(&listener);
    assert_eq!(recorder.last(), Some(EventValue::State(DevState::Ready)));
    device.remove_listener(&listener);
    assert!(!device.has_listeners());
}

#[test]
fn test_cleaned_up_model_refuses_listeners() {
    let manager = serial_manager();
    let attr = manager.get_attribute("a/b/c/voltage").unwrap();
    attr.clean_up();
    let listener: Arc<dyn TaurusListener> = Recorder::new();
    assert!(!attr.add_listener(&listener));
    assert_eq!(attr.remove_listener(&listener), None);
}

#[test]
fn test_registry_tokens() {
    let registry = ListenerRegistry::new();
    let listener: Arc<dyn TaurusListener> = Recorder::new();

    let id = registry.subscribe(&listener).unwrap();
    assert!(registry.subscribe(&listener).is_none());
    assert!(registry.contains(&listener));
    assert_eq!(registry.remove_id(id), Some(true));
    assert_eq!(registry.remove_id(id), Some(false));

    registry.tear_down();
    assert!(registry.is_torn_down());
    assert!(registry.subscribe(&listener).is_none());
    assert_eq!(registry.remove(&listener), None);
}
