//! Scheme back-end interface.
//!
//! A back-end performs the actual I/O for a scheme. Every operation has a
//! default returning [`TaurusError::NotImplemented`] so a back-end only
//! provides what its control system supports.

use crate::basetypes::{AttrInfo, AttrValue, DataValue};
use crate::error::{Result, TaurusError};
use std::any::Any;

/// I/O provider for one scheme.
pub trait SchemeBackend: Send + Sync {
    /// `self` as `Any`, for downcasting to the concrete back-end.
    fn as_any(&self) -> &dyn Any;

    /// Whether model names of the scheme are case sensitive.
    fn case_sensitive(&self) -> bool {
        false
    }

    /// Default authority, as `//host:port`.
    fn default_authority(&self) -> Option<String> {
        None
    }

    /// Read one attribute of a device.
    fn read_attribute(&self, _device: &str, _attr: &str) -> Result<AttrValue> {
        Err(TaurusError::NotImplemented("read_attribute"))
    }

    /// Read several attributes of a device in one request.
    ///
    /// The outer error means the device itself could not be reached.
    fn read_attributes(&self, device: &str, attrs: &[String]) -> Result<Vec<Result<AttrValue>>> {
        Ok(attrs
            .iter()
            .map(|a| self.read_attribute(device, a))
            .collect())
    }

    /// Write one attribute.
    fn write_attribute(&self, _device: &str, _attr: &str, _value: &DataValue) -> Result<()> {
        Err(TaurusError::NotImplemented("write_attribute"))
    }

    /// Attribute metadata.
    fn attribute_info(&self, _device: &str, _attr: &str) -> Result<AttrInfo> {
        Err(TaurusError::NotImplemented("attribute_info"))
    }

    /// Device description.
    fn device_description(&self, _device: &str) -> Result<String> {
        Err(TaurusError::NotImplemented("device_description"))
    }

    /// Authority description.
    fn authority_description(&self) -> String {
        "A Taurus Authority".to_string()
    }

    /// Full device name of an alias.
    fn element_full_name(&self, _alias: &str) -> Option<String> {
        None
    }

    /// Alias of a full device name.
    fn element_alias(&self, _device: &str) -> Option<String> {
        None
    }
}
