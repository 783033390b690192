//! Base types shared by every scheme.
//!
//! Closed sets (event types, match levels, qualities...) are plain Rust enums.
//! Value objects ([`DataValue`], [`TimeVal`], [`AttrValue`], [`AttrInfo`],
//! [`LockInfo`]) carry what the model objects read from their back-ends.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Closed sets
// =============================================================================

/// Kind of event delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaurusEventType {
    /// The value changed.
    Change,
    /// The configuration (metadata) changed.
    Config,
    /// A periodic (polled) reading.
    Periodic,
    /// Reading failed.
    Error,
}

/// How jobs and first events are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationMode {
    /// Run in the caller's thread.
    Serial,
    /// Run on the manager's thread pool.
    #[default]
    Concurrent,
}

/// Which of a validator's name forms must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchLevel {
    /// Any of the three forms.
    Any,
    /// Short form only.
    Short,
    /// Normal form only.
    Normal,
    /// Complete form only.
    Complete,
    /// Short or normal.
    ShortNormal,
    /// Normal or complete.
    NormalComplete,
}

/// Kind of model element.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Unknown,
    Name,
    DeviceClass,
    Device,
    DeviceAlias,
    Domain,
    Family,
    Member,
    Server,
    ServerName,
    ServerInstance,
    Exported,
    Host,
    Attribute,
    AttributeAlias,
    Command,
    Property,
    Configuration,
    Authority,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Device lock status.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockStatus {
    Unlocked,
    Locked,
    LockedMaster,
    #[default]
    Unknown,
}

/// Dimensionality of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataFormat {
    /// Scalar.
    #[default]
    D0,
    /// Spectrum.
    D1,
    /// Image.
    D2,
}

impl DataFormat {
    /// Dimensionality of a concrete value.
    pub fn from_value(value: &DataValue) -> Self {
        match value {
            DataValue::Array(items) if items.iter().any(|i| matches!(i, DataValue::Array(_))) => {
                DataFormat::D2
            }
            DataValue::Array(_) => DataFormat::D1,
            _ => DataFormat::D0,
        }
    }
}

/// Element type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    /// Signed integer.
    Integer,
    /// Floating point.
    Float,
    /// Text.
    String,
    /// Boolean.
    Boolean,
    /// Raw bytes.
    Bytes,
    /// Device state.
    DevState,
    /// Encoded (format, bytes) pair.
    DevEncoded,
    /// Anything else.
    #[default]
    Object,
}

impl DataType {
    /// Data type of a concrete value. Arrays report their first element.
    pub fn from_value(value: &DataValue) -> Self {
        match value {
            DataValue::Integer(_) => DataType::Integer,
            DataValue::Float(_) => DataType::Float,
            DataValue::String(_) => DataType::String,
            DataValue::Boolean(_) => DataType::Boolean,
            DataValue::Bytes(_) => DataType::Bytes,
            DataValue::State(_) => DataType::DevState,
            DataValue::Array(items) => items.first().map_or(DataType::Object, DataType::from_value),
        }
    }

    /// Integer or float.
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

/// Quality of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttrQuality {
    /// Reading is valid.
    #[default]
    Valid = 0,
    /// Reading is invalid.
    Invalid = 1,
    /// Value is in alarm range.
    Alarm = 2,
    /// Value is moving.
    Changing = 3,
    /// Value is in warning range.
    Warning = 4,
}

impl AttrQuality {
    /// Numeric code of the quality.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Attribute access mode.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttrAccess {
    #[default]
    Read,
    ReadWrite,
}

/// Display level of an element.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayLevel {
    #[default]
    Operator,
    Expert,
    Developer,
}

/// Lifecycle of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ManagerState {
    /// Not initialized yet.
    #[default]
    Uninitialized,
    /// Initialized and usable.
    Inited,
    /// Cleaned up.
    Cleaned,
}

/// Subscription state of an attribute towards its back-end.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    PendingSubscribe,
}

/// Generic device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DevState {
    /// Device can be used.
    Ready = 1,
    /// Device cannot be used.
    NotReady = 2,
    /// State is unknown.
    #[default]
    Undefined = 4,
}

impl DevState {
    /// State for a numeric code; unknown codes map to `Undefined`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => DevState::Ready,
            2 => DevState::NotReady,
            _ => DevState::Undefined,
        }
    }
}

impl fmt::Display for DevState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Value objects
// =============================================================================

/// A value read from or written to an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// Signed integer.
    Integer(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Device state.
    State(DevState),
    /// One or two dimensional array.
    Array(Vec<DataValue>),
}

impl DataValue {
    /// Numeric view of scalar numbers and booleans.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Integer(v) => Some(*v as f64),
            DataValue::Float(v) => Some(*v),
            DataValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Device state carried by the value, if any.
    pub fn as_state(&self) -> Option<DevState> {
        match self {
            DataValue::State(s) => Some(*s),
            DataValue::Integer(code) => Some(DevState::from_code(*code)),
            _ => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Integer(v) => write!(f, "{}", v),
            DataValue::Float(v) => write!(f, "{}", v),
            DataValue::String(v) => write!(f, "{}", v),
            DataValue::Boolean(v) => write!(f, "{}", v),
            DataValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            DataValue::State(v) => write!(f, "{}", v),
            DataValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Timestamp split into seconds, microseconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TimeVal {
    /// Seconds since the Unix epoch.
    pub tv_sec: i64,
    /// Microseconds within the second.
    pub tv_usec: i64,
    /// Extra nanoseconds within the microsecond.
    pub tv_nsec: i64,
}

impl TimeVal {
    /// Current time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// From seconds since the epoch.
    pub fn from_timestamp(t: f64) -> Self {
        let tv_sec = t.floor() as i64;
        let tv_usec = ((t - tv_sec as f64) * 1e6).floor() as i64;
        Self {
            tv_sec,
            tv_usec,
            tv_nsec: 0,
        }
    }

    /// From a UTC datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let nanos = i64::from(dt.timestamp_subsec_nanos());
        Self {
            tv_sec: dt.timestamp(),
            tv_usec: nanos / 1_000,
            tv_nsec: nanos % 1_000,
        }
    }

    /// Seconds since the epoch.
    pub fn to_time(&self) -> f64 {
        self.tv_sec as f64 + self.tv_usec as f64 * 1e-6 + self.tv_nsec as f64 * 1e-9
    }

    /// As a UTC datetime; `None` if out of range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.tv_usec * 1_000 + self.tv_nsec).ok()?;
        DateTime::from_timestamp(self.tv_sec, nanos)
    }

    /// ISO 8601 representation with microsecond precision.
    pub fn isoformat(&self) -> String {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_default()
    }
}

impl fmt::Display for TimeVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.isoformat())
    }
}

/// Cached value object of an attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrValue {
    /// Read value.
    pub rvalue: Option<DataValue>,
    /// Last written (set point) value.
    pub wvalue: Option<DataValue>,
    /// Acquisition time.
    pub time: TimeVal,
    /// Quality of the reading.
    pub quality: AttrQuality,
    /// Error message when the reading failed.
    pub error: Option<String>,
}

impl AttrValue {
    /// Valid reading taken now.
    pub fn new(rvalue: DataValue) -> Self {
        Self {
            rvalue: Some(rvalue),
            wvalue: None,
            time: TimeVal::now(),
            quality: AttrQuality::Valid,
            error: None,
        }
    }

    /// Failed reading: no value, `Invalid` quality, error text kept.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            rvalue: None,
            wvalue: None,
            time: TimeVal::now(),
            quality: AttrQuality::Invalid,
            error: Some(message.into()),
        }
    }

    /// Set the write value.
    pub fn with_wvalue(mut self, wvalue: DataValue) -> Self {
        self.wvalue = Some(wvalue);
        self
    }

    /// Set the quality.
    pub fn with_quality(mut self, quality: AttrQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Whether this value object records a failed reading.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Attribute metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrInfo {
    /// Human readable label.
    pub label: String,
    /// Engineering unit.
    pub unit: String,
    /// Free text description.
    pub description: String,
    /// Element type.
    pub data_type: DataType,
    /// Dimensionality.
    pub data_format: DataFormat,
    /// Whether the attribute accepts writes.
    pub writable: bool,
    /// Valid (min, max) range.
    pub range: (Option<f64>, Option<f64>),
    /// (min, max) alarm limits.
    pub alarms: (Option<f64>, Option<f64>),
    /// (min, max) warning limits.
    pub warnings: (Option<f64>, Option<f64>),
    /// Display level.
    pub display_level: DisplayLevel,
}

impl Default for AttrInfo {
    fn default() -> Self {
        Self {
            label: String::new(),
            unit: String::new(),
            description: "A Taurus Attribute".to_string(),
            data_type: DataType::Object,
            data_format: DataFormat::D0,
            writable: false,
            range: (None, None),
            alarms: (None, None),
            warnings: (None, None),
            display_level: DisplayLevel::Operator,
        }
    }
}

/// Lock information of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Lock status.
    pub status: LockStatus,
    /// Human readable status.
    pub status_msg: String,
    /// Locker id.
    pub id: Option<i64>,
    /// Locker host.
    pub host: Option<String>,
    /// Locker class.
    pub klass: Option<String>,
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            status: LockStatus::Unknown,
            status_msg: "Lock status unknown".to_string(),
            id: None,
            host: None,
            klass: None,
        }
    }
}
