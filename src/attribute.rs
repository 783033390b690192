//! Attributes: readable (and possibly writable) values of a device.
//!
//! An attribute owns its client-side polling state and a cached value
//! object. Polling is *active* only while it is enabled by the user (the
//! default) and activation was requested, either explicitly or by the first
//! listener. Active attributes are registered with the factory's polling
//! timer for their period.
//!
//! Poll failures never propagate: they are stored as an error value object
//! (quality `Invalid`) and delivered to listeners as `Error` events.

use crate::backend::SchemeBackend;
use crate::basetypes::{
    AttrInfo, AttrValue, DataFormat, DataType, DataValue, ElementType, SerializationMode,
    TaurusEventType,
};
use crate::device::TaurusDevice;
use crate::error::{Result, TaurusError};
use crate::event::listener::TaurusListener;
use crate::model::{EventValue, ModelCore, TaurusModel};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Polling period used when none is configured, in milliseconds.
pub const DFT_POLLING_PERIOD_MS: u64 = 3000;

/// Age after which a cached value is re-read when polling is not active.
pub const DFT_TIME_TO_LIVE: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy)]
struct PollingState {
    enabled: bool,
    activate: bool,
    polled: bool,
    forced: bool,
    period_ms: u64,
}

struct CachedValue {
    value: AttrValue,
    at: Instant,
}

/// Attribute of a device.
pub struct TaurusAttribute {
    core: ModelCore,
    me: Weak<TaurusAttribute>,
    device: Weak<TaurusDevice>,
    device_key: String,
    dev_name: String,
    attr_name: String,
    polling: Mutex<PollingState>,
    value: Mutex<Option<CachedValue>>,
    info: Mutex<Option<AttrInfo>>,
}

impl TaurusAttribute {
    /// Attribute `attr_name` of `device`, polled every `period_ms` once active.
    pub fn new(
        core: ModelCore,
        device: &Arc<TaurusDevice>,
        attr_name: impl Into<String>,
        period_ms: u64,
    ) -> Arc<Self> {
        let device_key = device.full_name().to_string();
        let dev_name = device.dev_name().to_string();
        let device = Arc::downgrade(device);
        let attr_name = attr_name.into();
        Arc::new_cyclic(|me| Self {
            core,
            me: me.clone(),
            device,
            device_key,
            dev_name,
            attr_name,
            polling: Mutex::new(PollingState {
                enabled: true,
                activate: false,
                polled: false,
                forced: false,
                period_ms,
            }),
            value: Mutex::new(None),
            info: Mutex::new(None),
        })
    }

    /// Owning device.
    pub fn device(&self) -> Option<Arc<TaurusDevice>> {
        self.device.upgrade()
    }

    /// Complete name of the owning device.
    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    /// Back-end name of the owning device.
    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    /// Name relative to the device.
    pub fn attr_name(&self) -> &str {
        &self.attr_name
    }

    fn backend(&self) -> Result<Arc<dyn SchemeBackend>> {
        self.core
            .factory()
            .map(|f| Arc::clone(f.backend()))
            .ok_or_else(|| TaurusError::Disposed(self.full_name().to_string()))
    }

    fn deprecated(&self, msg: &str) -> Result<()> {
        match self.core.factory() {
            Some(f) => f.deprecations().deprecated(msg),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Enable polling. With `force` polling is also activated and survives
    /// the removal of the last listener.
    pub fn enable_polling(&self, force: bool) {
        let activate = {
            let mut p = self.polling.lock();
            p.enabled = true;
            p.forced = force;
            if force {
                p.activate = true;
            }
            p.activate
        };
        if activate {
            self.start_polling(true);
        }
    }

    /// Disable polling, deactivating it if active.
    pub fn disable_polling(&self) {
        let active = {
            let mut p = self.polling.lock();
            p.enabled = false;
            p.forced = false;
            p.activate
        };
        if active {
            self.stop_polling();
        }
    }

    // `read_now` asks for one reading of a newly registered attribute.
    fn start_polling(&self, read_now: bool) {
        let period = {
            let mut p = self.polling.lock();
            p.activate = true;
            if !p.enabled {
                return;
            }
            p.period_ms
        };
        let (Some(factory), Some(me)) = (self.core.factory(), self.me.upgrade()) else {
            return;
        };
        self.polling.lock().polled = true;
        factory.add_attribute_to_polling(&me, period, read_now);
    }

    fn stop_polling(&self) {
        self.polling.lock().activate = false;
        if let (Some(factory), Some(me)) = (self.core.factory(), self.me.upgrade()) {
            factory.remove_attribute_from_polling(&me);
        }
        self.polling.lock().polled = false;
    }

    /// Whether polling is enabled by the user.
    pub fn is_polling_enabled(&self) -> bool {
        self.polling.lock().enabled
    }

    /// Whether a running timer is polling this attribute.
    ///
    /// Registered attributes are not active while the factory has polling
    /// disabled, since their timer does not run.
    pub fn is_polling_active(&self) -> bool {
        let (polled, period) = {
            let p = self.polling.lock();
            (p.polled, p.period_ms)
        };
        polled
            && self.core.factory().is_some_and(|f| {
                f.is_polling_enabled() && f.polling_timer(period).is_some_and(|t| t.is_running())
            })
    }

    /// Whether polling was forced.
    pub fn is_polling_forced(&self) -> bool {
        self.polling.lock().forced
    }

    /// Polling period in milliseconds.
    pub fn polling_period(&self) -> u64 {
        self.polling.lock().period_ms
    }

    /// Change the polling period, moving the attribute to another timer if
    /// polling is active.
    pub fn change_polling_period(&self, period_ms: u64) {
        let active = {
            let mut p = self.polling.lock();
            if p.period_ms == period_ms && p.activate {
                return;
            }
            p.period_ms = period_ms;
            p.activate
        };
        if active {
            self.stop_polling();
            self.start_polling(true);
        }
    }

    /// Set the period and enable polling.
    pub fn activate_polling(&self, period_ms: u64, force: bool) {
        self.change_polling_period(period_ms);
        self.enable_polling(force);
    }

    /// Deprecated alias of [`disable_polling`](Self::disable_polling).
    pub fn deactivate_polling(&self) -> Result<()> {
        self.deprecated("deactivate_polling() is deprecated; use disable_polling()")?;
        self.disable_polling();
        Ok(())
    }

    /// Deprecated alias of [`is_polling_active`](Self::is_polling_active).
    pub fn is_polled(&self) -> Result<bool> {
        self.deprecated("is_polled() is deprecated; use is_polling_active()")?;
        Ok(self.is_polling_active())
    }

    // =========================================================================
    // Values
    // =========================================================================

    fn store(&self, value: AttrValue) {
        *self.value.lock() = Some(CachedValue {
            value,
            at: Instant::now(),
        });
    }

    /// Current value object.
    ///
    /// With `cache`, the stored value is returned while polling keeps it
    /// fresh or while it is younger than [`DFT_TIME_TO_LIVE`].
    pub fn read(&self, cache: bool) -> Result<AttrValue> {
        if cache {
            let polled = self.is_polling_active();
            if let Some(c) = self.value.lock().as_ref() {
                if polled || c.at.elapsed() < DFT_TIME_TO_LIVE {
                    return Ok(c.value.clone());
                }
            }
        }
        let value = self.backend()?.read_attribute(&self.dev_name, &self.attr_name)?;
        self.store(value.clone());
        Ok(value)
    }

    /// Like [`read`](Self::read) but `None` on failure.
    pub fn value_obj(&self, cache: bool) -> Option<AttrValue> {
        match self.read(cache) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(attr = %self.full_name(), error = %e, "Read failed");
                None
            }
        }
    }

    /// Read value.
    pub fn rvalue(&self, cache: bool) -> Option<DataValue> {
        self.value_obj(cache).and_then(|v| v.rvalue)
    }

    /// Write value.
    pub fn wvalue(&self, cache: bool) -> Option<DataValue> {
        self.value_obj(cache).and_then(|v| v.wvalue)
    }

    /// Write `value`. With `with_read` the attribute is read back, a
    /// `Change` event is fired and the new value object returned.
    pub fn write(&self, value: DataValue, with_read: bool) -> Result<Option<AttrValue>> {
        self.backend()?
            .write_attribute(&self.dev_name, &self.attr_name, &value)?;
        if !with_read {
            return Ok(None);
        }
        let read = self.read(false)?;
        self.fire_event(TaurusEventType::Change, &EventValue::Value(read.clone()));
        Ok(Some(read))
    }

    /// Read from the back-end and publish the outcome.
    pub fn poll(&self) {
        let result = self
            .backend()
            .and_then(|b| b.read_attribute(&self.dev_name, &self.attr_name));
        self.poll_value(result);
    }

    /// Publish a polled reading: `Periodic` on success, `Error` otherwise.
    pub fn poll_value(&self, result: Result<AttrValue>) {
        match result {
            Ok(value) => {
                self.store(value.clone());
                self.fire_event(TaurusEventType::Periodic, &EventValue::Value(value));
            }
            Err(e) => {
                let msg = e.to_string();
                tracing::debug!(attr = %self.full_name(), error = %msg, "Poll failed");
                self.store(AttrValue::from_error(msg.clone()));
                self.fire_event(TaurusEventType::Error, &EventValue::Error(msg));
            }
        }
    }

    fn send_first_event(&self, listener: &Arc<dyn TaurusListener>) {
        if self.serialization_mode() == SerializationMode::Serial {
            self.deliver_first_event(listener);
            return;
        }
        let (Some(factory), Some(me)) = (self.core.factory(), self.me.upgrade()) else {
            self.deliver_first_event(listener);
            return;
        };
        let weak = Arc::downgrade(listener);
        factory.dispatcher().enqueue(
            move || {
                if let Some(listener) = weak.upgrade() {
                    me.deliver_first_event(&listener);
                }
            },
            Some(SerializationMode::Concurrent),
        );
    }

    fn deliver_first_event(&self, listener: &Arc<dyn TaurusListener>) {
        let (ty, value) = match self.read(true) {
            Ok(v) => (TaurusEventType::Change, EventValue::Value(v)),
            Err(e) => (TaurusEventType::Error, EventValue::Error(e.to_string())),
        };
        self.fire_event_to(ty, &value, std::slice::from_ref(listener));
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Metadata, fetched from the back-end once and then cached.
    pub fn info(&self, cache: bool) -> Result<AttrInfo> {
        if cache {
            if let Some(info) = self.info.lock().clone() {
                return Ok(info);
            }
        }
        let info = self
            .backend()?
            .attribute_info(&self.dev_name, &self.attr_name)?;
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }

    fn info_or_default(&self) -> AttrInfo {
        self.info(true).unwrap_or_default()
    }

    fn update_info(&self, apply: impl FnOnce(&mut AttrInfo)) {
        let mut info = self.info_or_default();
        apply(&mut info);
        *self.info.lock() = Some(info.clone());
        self.fire_event(TaurusEventType::Config, &EventValue::Info(info));
    }

    /// Label; falls back to the attribute name.
    pub fn label(&self) -> String {
        let info = self.info_or_default();
        if info.label.is_empty() {
            self.attr_name.clone()
        } else {
            info.label
        }
    }

    /// Set the label.
    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        self.update_info(|i| i.label = label);
    }

    /// Engineering unit.
    pub fn unit(&self) -> String {
        self.info_or_default().unit
    }

    /// Element type.
    pub fn data_type(&self) -> DataType {
        self.info_or_default().data_type
    }

    /// Dimensionality.
    pub fn data_format(&self) -> DataFormat {
        self.info_or_default().data_format
    }

    /// (min, max) range.
    pub fn range(&self) -> (Option<f64>, Option<f64>) {
        self.info_or_default().range
    }

    /// (min, max) alarm limits.
    pub fn alarms(&self) -> (Option<f64>, Option<f64>) {
        self.info_or_default().alarms
    }

    /// (min, max) warning limits.
    pub fn warnings(&self) -> (Option<f64>, Option<f64>) {
        self.info_or_default().warnings
    }

    /// Set the range.
    pub fn set_range(&self, low: Option<f64>, high: Option<f64>) -> Result<()> {
        assert_valid_limits(low, high)?;
        self.update_info(|i| i.range = (low, high));
        Ok(())
    }

    /// Set the alarm limits.
    pub fn set_alarms(&self, low: Option<f64>, high: Option<f64>) -> Result<()> {
        assert_valid_limits(low, high)?;
        self.update_info(|i| i.alarms = (low, high));
        Ok(())
    }

    /// Set the warning limits.
    pub fn set_warnings(&self, low: Option<f64>, high: Option<f64>) -> Result<()> {
        assert_valid_limits(low, high)?;
        self.update_info(|i| i.warnings = (low, high));
        Ok(())
    }

    /// Whether values are numbers.
    pub fn is_numeric(&self) -> bool {
        self.data_type().is_numeric()
    }

    /// Whether values are booleans.
    pub fn is_boolean(&self) -> bool {
        self.data_type() == DataType::Boolean
    }

    /// Whether values are device states.
    pub fn is_state(&self) -> bool {
        self.data_type() == DataType::DevState
    }

    /// `(field, value)` pairs describing the attribute for display.
    pub fn display_descr_obj(&self) -> Vec<(String, String)> {
        let info = self.info_or_default();
        let limits = |(lo, hi): (Option<f64>, Option<f64>)| {
            let fmt = |v: Option<f64>| v.map_or_else(|| "-inf".to_string(), |v| v.to_string());
            format!("[{}, {}]", fmt(lo), fmt(hi))
        };
        let mut obj = vec![
            ("name".to_string(), self.full_name().to_string()),
            ("label".to_string(), self.label()),
            ("description".to_string(), info.description.clone()),
        ];
        if !info.unit.is_empty() {
            obj.push(("unit".to_string(), info.unit.clone()));
        }
        if info.data_type.is_numeric() {
            obj.push(("range".to_string(), limits(info.range)));
            obj.push(("alarm".to_string(), limits(info.alarms)));
            obj.push(("warning".to_string(), limits(info.warnings)));
        }
        obj
    }
}

fn assert_valid_limits(low: Option<f64>, high: Option<f64>) -> Result<()> {
    match (low, high) {
        (Some(l), Some(h)) if l > h => Err(TaurusError::InvalidLimits(format!(
            "low limit {} is greater than high limit {}",
            l, h
        ))),
        _ => Ok(()),
    }
}

impl TaurusModel for TaurusAttribute {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn as_model(&self) -> &dyn TaurusModel {
        self
    }

    fn element_type(&self) -> ElementType {
        ElementType::Attribute
    }

    fn parent_obj(&self) -> Option<Arc<dyn TaurusModel>> {
        self.device().map(|d| d as Arc<dyn TaurusModel>)
    }

    fn is_writable(&self) -> bool {
        self.info(true).map(|i| i.writable).unwrap_or(false)
    }

    fn description(&self) -> String {
        self.info_or_default().description
    }

    fn add_listener(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        let first = !self.has_listeners();
        if !self.core.listeners().add(listener) {
            return false;
        }
        // The first event already carries a fresh reading.
        if first {
            self.start_polling(false);
        }
        self.send_first_event(listener);
        true
    }

    fn remove_listener(&self, listener: &Arc<dyn TaurusListener>) -> Option<bool> {
        let removed = self.core.listeners().remove(listener);
        if removed == Some(true) && !self.has_listeners() && !self.is_polling_forced() {
            self.stop_polling();
        }
        removed
    }

    fn clean_up(&self) {
        self.unforce_listening();
        let active = self.polling.lock().activate;
        if active {
            self.stop_polling();
        }
        *self.value.lock() = None;
        self.core.listeners().tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sim_factory;

    #[test]
    fn read_caches_value_until_ttl() {
        let (factory, sim) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        let first = attr.read(true).unwrap();
        let second = attr.read(true).unwrap();
        assert_eq!(first, second);
        assert_eq!(sim.read_count("a/b/c", "voltage"), 1);
        attr.read(false).unwrap();
        assert_eq!(sim.read_count("a/b/c", "voltage"), 2);
    }

    #[test]
    fn poll_failure_stores_error_value() {
        let (factory, sim) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        sim.fail_reads("a/b/c", "voltage", true);
        attr.poll();
        let value = attr.read(true).unwrap();
        assert!(value.is_error());
        assert!(value.rvalue.is_none());
    }

    #[test]
    fn limits_must_be_ordered() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        assert!(matches!(
            attr.set_range(Some(10.0), Some(-10.0)),
            Err(TaurusError::InvalidLimits(_))
        ));
        attr.set_warnings(Some(-1.0), Some(1.0)).unwrap();
        assert_eq!(attr.warnings(), (Some(-1.0), Some(1.0)));
    }

    #[test]
    fn metadata_comes_from_backend() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        assert_eq!(attr.label(), "Voltage");
        assert_eq!(attr.unit(), "mV");
        assert_eq!(attr.range(), (Some(-2000.0), Some(2000.0)));
        assert!(attr.is_numeric());
        assert!(attr.is_writable());
        let descr = attr.display_descr_obj();
        assert!(descr.iter().any(|(k, v)| k == "unit" && v == "mV"));
    }

    #[test]
    fn enable_and_disable_polling() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        assert!(attr.is_polling_enabled());
        assert!(!attr.is_polling_active());

        attr.activate_polling(250, true);
        assert!(attr.is_polling_active());
        assert!(attr.is_polling_forced());
        assert!(factory.polling_timer(250).is_some());

        attr.change_polling_period(500);
        assert!(factory.polling_timer(250).is_none());
        assert!(factory.polling_timer(500).is_some());

        attr.disable_polling();
        assert!(!attr.is_polling_active());
        assert!(factory.polling_timer(500).is_none());
    }

    #[test]
    fn disabled_factory_polling_keeps_the_cache_expiring() {
        let (factory, sim) = sim_factory();
        factory.disable_polling();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        attr.activate_polling(250, true);
        assert!(!attr.is_polling_active());
        assert!(!factory.polling_timer(250).unwrap().is_running());

        attr.read(false).unwrap();
        sim.set_value("a/b/c", "voltage", DataValue::Float(4.0));
        let stale = Instant::now()
            .checked_sub(DFT_TIME_TO_LIVE + Duration::from_secs(1))
            .unwrap();
        attr.value.lock().as_mut().unwrap().at = stale;
        let value = attr.read(true).unwrap();
        assert_eq!(value.rvalue, Some(DataValue::Float(4.0)));

        factory.enable_polling();
        assert!(attr.is_polling_active());
        factory.disable_polling();
        assert!(!attr.is_polling_active());
        attr.disable_polling();
    }

    #[test]
    fn write_reads_back() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        let v = attr.write(DataValue::Float(12.5), true).unwrap().unwrap();
        assert_eq!(v.rvalue, Some(DataValue::Float(12.5)));
        assert!(attr.write(DataValue::Float(1.0), false).unwrap().is_none());
    }
}
