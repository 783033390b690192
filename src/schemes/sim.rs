//! In-memory simulation scheme.
//!
//! `SimBackend` stores devices and attributes in memory. Reads can be made
//! to fail per attribute or per device, and every read is counted, which
//! makes it the back-end of choice for exercising polling and events.
//!
//! The demo layout:
//!
//! | device          | alias | attributes                         |
//! |-----------------|-------|------------------------------------|
//! | `a/b/c`         | `abc` | `state`, `voltage`, `counter`      |
//! | `sys/tg_test/1` |       | `state`, `double_scalar`           |
//!
//! `counter` returns the number of times it has been read.

use crate::backend::SchemeBackend;
use crate::basetypes::{AttrInfo, AttrValue, DataFormat, DataType, DataValue, DevState};
use crate::caseless::NameMap;
use crate::config::TaurusConfig;
use crate::error::{Result, TaurusError};
use parking_lot::Mutex;
use std::any::Any;

/// Scheme name.
pub const SIM_SCHEME: &str = "sim";

struct SimAttr {
    value: DataValue,
    wvalue: Option<DataValue>,
    info: AttrInfo,
    fail: bool,
    reads: u64,
    counts_reads: bool,
}

impl SimAttr {
    fn new(value: DataValue, info: AttrInfo) -> Self {
        Self {
            value,
            wvalue: None,
            info,
            fail: false,
            reads: 0,
            counts_reads: false,
        }
    }
}

struct SimDevice {
    attrs: NameMap<SimAttr>,
    description: Option<String>,
    fail: bool,
}

struct SimState {
    devices: NameMap<SimDevice>,
    aliases: NameMap<String>,
}

/// Simulation back-end.
pub struct SimBackend {
    default_authority: Option<String>,
    case_sensitive: bool,
    state: Mutex<SimState>,
}

fn state_info() -> AttrInfo {
    AttrInfo {
        label: "State".to_string(),
        description: "Device state".to_string(),
        data_type: DataType::DevState,
        ..AttrInfo::default()
    }
}

impl SimBackend {
    /// Empty back-end.
    pub fn new(default_authority: Option<String>, case_sensitive: bool) -> Self {
        Self {
            default_authority,
            case_sensitive,
            state: Mutex::new(SimState {
                devices: NameMap::new(case_sensitive),
                aliases: NameMap::new(case_sensitive),
            }),
        }
    }

    /// Back-end with the demo devices.
    pub fn demo(default_authority: Option<String>, case_sensitive: bool) -> Self {
        let sim = Self::new(default_authority, case_sensitive);
        sim.add_device("a/b/c", Some("abc"));
        sim.set_description("a/b/c", "Simulated power supply");
        sim.add_attribute(
            "a/b/c",
            "voltage",
            DataValue::Float(0.0),
            AttrInfo {
                label: "Voltage".to_string(),
                unit: "mV".to_string(),
                description: "Output voltage".to_string(),
                data_type: DataType::Float,
                data_format: DataFormat::D0,
                writable: true,
                range: (Some(-2000.0), Some(2000.0)),
                alarms: (Some(-1800.0), Some(1800.0)),
                warnings: (Some(-1500.0), Some(1500.0)),
                ..AttrInfo::default()
            },
        );
        sim.add_attribute(
            "a/b/c",
            "counter",
            DataValue::Integer(0),
            AttrInfo {
                label: "Counter".to_string(),
                data_type: DataType::Integer,
                ..AttrInfo::default()
            },
        );
        if let Some(attr) = sim
            .state
            .lock()
            .devices
            .get_mut("a/b/c")
            .and_then(|d| d.attrs.get_mut("counter"))
        {
            attr.counts_reads = true;
        }
        sim.add_device("sys/tg_test/1", None);
        sim.add_attribute(
            "sys/tg_test/1",
            "double_scalar",
            DataValue::Float(1.5),
            AttrInfo {
                label: "double_scalar".to_string(),
                data_type: DataType::Float,
                writable: true,
                ..AttrInfo::default()
            },
        );
        sim
    }

    /// Demo back-end configured from the `sim` section.
    pub fn from_config(config: &TaurusConfig) -> Self {
        Self::demo(
            Some(config.sim.default_authority.clone()),
            config.sim.case_sensitive,
        )
    }

    /// Add a device in the `Ready` state, with its `state` attribute.
    pub fn add_device(&self, name: &str, alias: Option<&str>) {
        let mut attrs = NameMap::new(self.case_sensitive);
        attrs.insert("state", SimAttr::new(DataValue::State(DevState::Ready), state_info()));
        let mut state = self.state.lock();
        state.devices.insert(
            name,
            SimDevice {
                attrs,
                description: None,
                fail: false,
            },
        );
        if let Some(alias) = alias {
            state.aliases.insert(alias, name.to_string());
        }
    }

    /// Add (or replace) an attribute.
    pub fn add_attribute(&self, device: &str, attr: &str, value: DataValue, info: AttrInfo) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.attrs.insert(attr, SimAttr::new(value, info));
        }
    }

    /// Overwrite the value of an attribute.
    pub fn set_value(&self, device: &str, attr: &str, value: DataValue) {
        if let Some(a) = self
            .state
            .lock()
            .devices
            .get_mut(device)
            .and_then(|d| d.attrs.get_mut(attr))
        {
            a.value = value;
        }
    }

    /// Set the state of a device.
    pub fn set_state(&self, device: &str, state: DevState) {
        self.set_value(device, "state", DataValue::State(state));
    }

    /// Set the description of a device.
    pub fn set_description(&self, device: &str, description: &str) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.description = Some(description.to_string());
        }
    }

    /// Make reads of one attribute fail.
    pub fn fail_reads(&self, device: &str, attr: &str, fail: bool) {
        if let Some(a) = self
            .state
            .lock()
            .devices
            .get_mut(device)
            .and_then(|d| d.attrs.get_mut(attr))
        {
            a.fail = fail;
        }
    }

    /// Make a whole device unreachable.
    pub fn fail_device(&self, device: &str, fail: bool) {
        if let Some(dev) = self.state.lock().devices.get_mut(device) {
            dev.fail = fail;
        }
    }

    /// Successful and failed reads of an attribute so far.
    pub fn read_count(&self, device: &str, attr: &str) -> u64 {
        self.state
            .lock()
            .devices
            .get(device)
            .and_then(|d| d.attrs.get(attr))
            .map_or(0, |a| a.reads)
    }

    /// Device names.
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .devices
            .keys()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Attribute names of a device.
    pub fn attribute_names(&self, device: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .devices
            .get(device)
            .map(|d| d.attrs.keys().map(str::to_string).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn read_locked(state: &mut SimState, device: &str, attr: &str) -> Result<AttrValue> {
        let dev = state
            .devices
            .get_mut(device)
            .ok_or_else(|| TaurusError::Backend(format!("unknown device '{}'", device)))?;
        if dev.fail {
            return Err(TaurusError::Backend(format!("device '{}' is not reachable", device)));
        }
        let a = dev.attrs.get_mut(attr).ok_or_else(|| {
            TaurusError::Backend(format!("unknown attribute '{}/{}'", device, attr))
        })?;
        a.reads += 1;
        if a.fail {
            return Err(TaurusError::Backend(format!("cannot read '{}/{}'", device, attr)));
        }
        if a.counts_reads {
            a.value = DataValue::Integer(i64::try_from(a.reads).unwrap_or(i64::MAX));
        }
        let mut value = AttrValue::new(a.value.clone());
        if let Some(w) = &a.wvalue {
            value = value.with_wvalue(w.clone());
        }
        Ok(value)
    }
}

impl SchemeBackend for SimBackend {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    fn default_authority(&self) -> Option<String> {
        self.default_authority.clone()
    }

    fn read_attribute(&self, device: &str, attr: &str) -> Result<AttrValue> {
        Self::read_locked(&mut self.state.lock(), device, attr)
    }

    fn read_attributes(&self, device: &str, attrs: &[String]) -> Result<Vec<Result<AttrValue>>> {
        let mut state = self.state.lock();
        match state.devices.get(device) {
            None => return Err(TaurusError::Backend(format!("unknown device '{}'", device))),
            Some(d) if d.fail => {
                return Err(TaurusError::Backend(format!(
                    "device '{}' is not reachable",
                    device
                )))
            }
            Some(_) => {}
        }
        Ok(attrs
            .iter()
            .map(|a| Self::read_locked(&mut state, device, a))
            .collect())
    }

    fn write_attribute(&self, device: &str, attr: &str, value: &DataValue) -> Result<()> {
        let mut state = self.state.lock();
        let a = state
            .devices
            .get_mut(device)
            .and_then(|d| d.attrs.get_mut(attr))
            .ok_or_else(|| TaurusError::Backend(format!("unknown attribute '{}/{}'", device, attr)))?;
        if !a.info.writable {
            return Err(TaurusError::Backend(format!("'{}/{}' is read-only", device, attr)));
        }
        a.value = value.clone();
        a.wvalue = Some(value.clone());
        Ok(())
    }

    fn attribute_info(&self, device: &str, attr: &str) -> Result<AttrInfo> {
        self.state
            .lock()
            .devices
            .get(device)
            .and_then(|d| d.attrs.get(attr))
            .map(|a| a.info.clone())
            .ok_or_else(|| TaurusError::Backend(format!("unknown attribute '{}/{}'", device, attr)))
    }

    fn device_description(&self, device: &str) -> Result<String> {
        self.state
            .lock()
            .devices
            .get(device)
            .and_then(|d| d.description.clone())
            .ok_or_else(|| TaurusError::Backend(format!("no description for '{}'", device)))
    }

    fn authority_description(&self) -> String {
        "In-memory simulation authority".to_string()
    }

    fn element_full_name(&self, alias: &str) -> Option<String> {
        self.state.lock().aliases.get(alias).cloned()
    }

    fn element_alias(&self, device: &str) -> Option<String> {
        let state = self.state.lock();
        let matches = |name: &str| {
            if self.case_sensitive {
                name == device
            } else {
                name.eq_ignore_ascii_case(device)
            }
        };
        let alias = state
            .aliases
            .iter()
            .find(|(_, full)| matches(full))
            .map(|(alias, _)| alias.to_string());
        alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts_reads() {
        let sim = SimBackend::demo(None, false);
        sim.read_attribute("a/b/c", "counter").unwrap();
        let v = sim.read_attribute("A/B/C", "COUNTER").unwrap();
        assert_eq!(v.rvalue, Some(DataValue::Integer(2)));
        assert_eq!(sim.read_count("a/b/c", "counter"), 2);
    }

    #[test]
    fn failures_are_injectable() {
        let sim = SimBackend::demo(None, false);
        sim.fail_reads("a/b/c", "voltage", true);
        assert!(sim.read_attribute("a/b/c", "voltage").is_err());
        let batch = sim
            .read_attributes("a/b/c", &["voltage".into(), "counter".into()])
            .unwrap();
        assert!(batch[0].is_err());
        assert!(batch[1].is_ok());

        sim.fail_device("a/b/c", true);
        assert!(sim.read_attributes("a/b/c", &["counter".into()]).is_err());
    }

    #[test]
    fn writes_respect_writability() {
        let sim = SimBackend::demo(None, false);
        sim.write_attribute("a/b/c", "voltage", &DataValue::Float(3.0))
            .unwrap();
        let v = sim.read_attribute("a/b/c", "voltage").unwrap();
        assert_eq!(v.wvalue, Some(DataValue::Float(3.0)));
        assert!(sim
            .write_attribute("a/b/c", "counter", &DataValue::Integer(1))
            .is_err());
    }

    #[test]
    fn aliases_resolve_both_ways() {
        let sim = SimBackend::demo(None, false);
        assert_eq!(sim.element_full_name("ABC").as_deref(), Some("a/b/c"));
        assert_eq!(sim.element_alias("A/B/C").as_deref(), Some("abc"));
        assert_eq!(sim.element_alias("sys/tg_test/1"), None);
    }

    #[test]
    fn state_follows_setter() {
        let sim = SimBackend::demo(None, false);
        sim.set_state("a/b/c", DevState::NotReady);
        let v = sim.read_attribute("a/b/c", "state").unwrap();
        assert_eq!(v.rvalue, Some(DataValue::State(DevState::NotReady)));
        assert_eq!(sim.attribute_names("a/b/c"), vec!["counter", "state", "voltage"]);
    }
}
