//! Polling timers driving attribute events on a live clock.

use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::time::Duration;
use taurus_core::basetypes::{DataValue, SerializationMode, TaurusEventType};
use taurus_core::event::{listener_fn, TaurusListener};
use taurus_core::factory::{FactorySettings, TaurusFactory};
use taurus_core::logging::DeprecationPolicy;
use taurus_core::model::{EventValue, TaurusModel};
use taurus_core::polling::PollingTimer;
use taurus_core::schemes::{SimBackend, SIM_SCHEME};
use taurus_core::threadpool::JobDispatcher;

const PERIOD_MS: u64 = 40;

fn setup() -> (Arc<TaurusFactory>, Arc<SimBackend>) {
    let sim = Arc::new(SimBackend::demo(Some("//localhost:10000".into()), false));
    let mut settings = FactorySettings::new(SIM_SCHEME);
    settings.serialization_mode = SerializationMode::Serial;
    settings.default_polling_period_ms = PERIOD_MS;
    let factory = TaurusFactory::new(
        settings,
        sim.clone(),
        Arc::new(JobDispatcher::serial()),
        Arc::new(DeprecationPolicy::default()),
    )
    .unwrap();
    (factory, sim)
}

fn channel_listener() -> (Arc<dyn TaurusListener>, Receiver<(TaurusEventType, EventValue)>) {
    let (tx, rx) = unbounded();
    let listener = listener_fn(move |_: &dyn TaurusModel, ty: TaurusEventType, v: &EventValue| {
        let _ = tx.send((ty, v.clone()));
    });
    (listener, rx)
}

fn next_of(
    rx: &Receiver<(TaurusEventType, EventValue)>,
    ty: TaurusEventType,
) -> Option<EventValue> {
    let deadline = Duration::from_secs(2);
    loop {
        match rx.recv_timeout(deadline) {
            Ok((t, v)) if t == ty => return Some(v),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

#[test]
fn test_listening_starts_periodic_events() {
    let (factory, _sim) = setup();
    let attr = factory.get_attribute("a/b/c/counter").unwrap();
    let (listener, rx) = channel_listener();

    attr.add_listener(&listener);
    assert!(attr.is_polling_active());
    assert!(factory.polling_timer(PERIOD_MS).unwrap().is_running());

    let first = next_of(&rx, TaurusEventType::Periodic).unwrap();
    let second = next_of(&rx, TaurusEventType::Periodic).unwrap();
    // the simulated counter grows with every read
    match (first.rvalue(), second.rvalue()) {
        (Some(DataValue::Integer(a)), Some(DataValue::Integer(b))) => assert!(b > a),
        other => panic!("unexpected values {:?}", other),
    }

    attr.remove_listener(&listener);
    assert!(!attr.is_polling_active());
    assert!(factory.polling_timer(PERIOD_MS).is_none());
}

#[test]
fn test_device_failure_produces_error_events() {
    let (factory, sim) = setup();
    let attr = factory.get_attribute("a/b/c/voltage").unwrap();
    let (listener, rx) = channel_listener();
    attr.add_listener(&listener);

    sim.fail_device("a/b/c", true);
    assert!(next_of(&rx, TaurusEventType::Error).is_some());

    sim.fail_device("a/b/c", false);
    assert!(next_of(&rx, TaurusEventType::Periodic).is_some());
    attr.remove_listener(&listener);
}

#[test]
fn test_failing_device_does_not_starve_others() {
    let (factory, sim) = setup();
    let healthy = factory.get_attribute("sys/tg_test/1/double_scalar").unwrap();
    let broken = factory.get_attribute("a/b/c/voltage").unwrap();
    sim.fail_device("a/b/c", true);

    let (l1, rx) = channel_listener();
    let (l2, _rx2) = channel_listener();
    broken.add_listener(&l2);
    healthy.add_listener(&l1);

    let value = next_of(&rx, TaurusEventType::Periodic).unwrap();
    assert_eq!(value.rvalue(), Some(&DataValue::Float(1.5)));
    healthy.remove_listener(&l1);
    broken.remove_listener(&l2);
}

#[test]
fn test_forced_polling_survives_listener_removal() {
    let (factory, _sim) = setup();
    let attr = factory.get_attribute("a/b/c/voltage").unwrap();
    attr.activate_polling(PERIOD_MS, true);
    let (listener, rx) = channel_listener();
    attr.add_listener(&listener);
    attr.remove_listener(&listener);
    assert!(attr.is_polling_active());

    let (listener, rx2) = channel_listener();
    attr.add_listener(&listener);
    assert!(next_of(&rx2, TaurusEventType::Periodic).is_some());
    drop(rx);

    attr.disable_polling();
    assert!(!attr.is_polling_active());
}

#[test]
fn test_timer_groups_attributes_by_device() {
    let (factory, _sim) = setup();
    let timer = PollingTimer::new(
        Duration::from_millis(PERIOD_MS),
        false,
        Arc::clone(factory.dispatcher()),
    );
    let voltage = factory.get_attribute("a/b/c/voltage").unwrap();
    let counter = factory.get_attribute("a/b/c/counter").unwrap();
    let other = factory.get_attribute("sys/tg_test/1/double_scalar").unwrap();

    timer.add_attribute(&voltage, false, false);
    timer.add_attribute(&counter, false, false);
    timer.add_attribute(&other, false, false);
    assert_eq!(timer.device_count(), 2);
    assert_eq!(timer.attribute_count(), 3);
    assert!(!timer.is_running());

    timer.start();
    assert!(timer.is_running());
    timer.remove_attribute(&voltage);
    timer.remove_attribute(&counter);
    timer.remove_attribute(&other);
    assert_eq!(timer.attribute_count(), 0);
    assert!(!timer.is_running());
}
