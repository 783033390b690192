//! # Taurus Core Library
//!
//! A scheme-agnostic model layer for control systems. Clients name
//! authorities, devices, attributes and configurations with URI-like model
//! names; the library hands back shared model objects, keeps them fresh by
//! polling, and delivers change events to weakly held listeners.
//!
//! ## Crate Structure
//!
//! - **`manager`**: `TaurusManager`, the entry point. Routes names to one
//!   factory per scheme plugin and owns the worker pool.
//! - **`factory`**: per-scheme caches of model objects and polling timers.
//! - **`authority`**, **`device`**, **`attribute`**, **`configuration`**:
//!   the model element types, all implementing `model::TaurusModel`.
//! - **`validator`**: name grammars. Split, classify and normalize names.
//! - **`event`**: listener registry, event generators and blocking waits.
//! - **`polling`**: periodic timers grouping attributes by device.
//! - **`threadpool`**: worker pool and serial/concurrent job dispatch.
//! - **`backend`**: the `SchemeBackend` trait doing the actual I/O;
//!   **`schemes`** holds the built-in simulation back-end.
//! - **`enumeration`**, **`caseless`**, **`basetypes`**: support types.
//! - **`config`** and **`logging`**: figment configuration, tracing setup
//!   and the deprecation policy.
//! - **`error`**: the `TaurusError` enum used across the crate.

pub mod attribute;
pub mod authority;
pub mod backend;
pub mod basetypes;
pub mod caseless;
pub mod config;
pub mod configuration;
pub mod device;
pub mod enumeration;
pub mod error;
pub mod event;
pub mod factory;
pub mod logging;
pub mod manager;
pub mod model;
pub mod polling;
pub mod schemes;
pub mod threadpool;
pub mod validator;

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) mod testing;

pub use attribute::TaurusAttribute;
pub use authority::TaurusAuthority;
pub use backend::SchemeBackend;
pub use basetypes::{
    AttrInfo, AttrValue, DataValue, DevState, ElementType, ManagerState, SerializationMode,
    TaurusEventType,
};
pub use config::TaurusConfig;
pub use configuration::TaurusConfiguration;
pub use device::TaurusDevice;
pub use error::{Result, TaurusError};
pub use event::{listener_fn, AttributeEventWait, TaurusListener};
pub use factory::{ModelObject, TaurusFactory};
pub use manager::TaurusManager;
pub use model::{EventValue, TaurusModel};
