//! Configuration elements: a view on the metadata of an attribute.
//!
//! Kept for compatibility; new code reads metadata from the attribute.
//! Creating one goes through the deprecation policy.

use crate::attribute::TaurusAttribute;
use crate::basetypes::{AttrInfo, ElementType, TaurusEventType};
use crate::error::{Result, TaurusError};
use crate::event::listener::TaurusListener;
use crate::model::{EventValue, ModelCore, TaurusModel};
use std::sync::{Arc, Weak};

/// Metadata view of an attribute, optionally narrowed to one key.
pub struct TaurusConfiguration {
    core: ModelCore,
    attribute: Weak<TaurusAttribute>,
    key: Option<String>,
}

impl TaurusConfiguration {
    /// Configuration of `attribute`.
    pub fn new(core: ModelCore, attribute: &Arc<TaurusAttribute>, key: Option<String>) -> Self {
        Self {
            core,
            attribute: Arc::downgrade(attribute),
            key,
        }
    }

    /// Owning attribute.
    pub fn attribute(&self) -> Option<Arc<TaurusAttribute>> {
        self.attribute.upgrade()
    }

    /// Requested key, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    fn attr(&self) -> Result<Arc<TaurusAttribute>> {
        self.attribute()
            .ok_or_else(|| TaurusError::Disposed(self.full_name().to_string()))
    }

    /// Metadata of the attribute.
    pub fn value_obj(&self, cache: bool) -> Result<AttrInfo> {
        self.attr()?.info(cache)
    }

    /// One metadata field as text. `None` for unknown keys or unset limits.
    pub fn param(&self, key: &str) -> Result<Option<String>> {
        let info = self.value_obj(true)?;
        let limit = |v: Option<f64>| v.map(|v| v.to_string());
        let value = match key.to_ascii_lowercase().as_str() {
            "label" => Some(info.label),
            "unit" => Some(info.unit),
            "description" => Some(info.description),
            "writable" => Some(info.writable.to_string()),
            "data_type" => Some(format!("{:?}", info.data_type)),
            "data_format" => Some(format!("{:?}", info.data_format)),
            "min_value" => limit(info.range.0),
            "max_value" => limit(info.range.1),
            "min_alarm" => limit(info.alarms.0),
            "max_alarm" => limit(info.alarms.1),
            "min_warning" => limit(info.warnings.0),
            "max_warning" => limit(info.warnings.1),
            _ => None,
        };
        Ok(value)
    }

    /// Value of the requested key, or the attribute label without one.
    pub fn display_value(&self, cache: bool) -> Result<String> {
        match &self.key {
            Some(key) => Ok(self.param(key)?.unwrap_or_default()),
            None => Ok(self.value_obj(cache)?.label),
        }
    }
}

impl TaurusModel for TaurusConfiguration {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn as_model(&self) -> &dyn TaurusModel {
        self
    }

    fn element_type(&self) -> ElementType {
        ElementType::Configuration
    }

    fn parent_obj(&self) -> Option<Arc<dyn TaurusModel>> {
        self.attribute().map(|a| a as Arc<dyn TaurusModel>)
    }

    fn add_listener(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        if !self.core.listeners().add(listener) {
            return false;
        }
        if let Ok(info) = self.value_obj(true) {
            self.fire_event_to(
                TaurusEventType::Config,
                &EventValue::Info(info),
                std::slice::from_ref(listener),
            );
        }
        true
    }
}
