//! Devices: named containers of attributes with a state.
//!
//! A device listens to its own `state` attribute while it has listeners of
//! its own and re-publishes state changes as `Change` events carrying a
//! [`DevState`]. It also implements the two-phase poll used by polling
//! timers: an asynchronous request returns an id whose reply is collected
//! on a second call.

use crate::authority::TaurusAuthority;
use crate::backend::SchemeBackend;
use crate::basetypes::{AttrValue, DataValue, DevState, ElementType, LockInfo, TaurusEventType};
use crate::error::{Result, TaurusError};
use crate::attribute::TaurusAttribute;
use crate::event::listener::TaurusListener;
use crate::model::{EventValue, ModelCore, TaurusModel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Description used when the back-end has none.
pub const DFT_DEVICE_DESCRIPTION: &str = "A device";

/// Phase of a device poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollRequest {
    /// Read and publish every attribute one by one.
    Sync,
    /// Read every attribute in one request and keep the results.
    Asynch,
    /// Publish the results of an earlier `Asynch` request.
    Reply(u64),
}

type PendingBatch = Vec<(Arc<TaurusAttribute>, Result<AttrValue>)>;

/// A device.
pub struct TaurusDevice {
    core: ModelCore,
    me: Weak<TaurusDevice>,
    authority: Weak<TaurusAuthority>,
    dev_name: String,
    alias: Option<String>,
    state_obj: Mutex<Option<Arc<TaurusAttribute>>>,
    last_state: Mutex<Option<DevState>>,
    pending: Mutex<HashMap<u64, PendingBatch>>,
    next_request: AtomicU64,
    description: Mutex<Option<String>>,
    lock_info: Mutex<LockInfo>,
}

impl TaurusDevice {
    /// Device `dev_name` below `authority`.
    pub fn new(
        core: ModelCore,
        authority: Option<&Arc<TaurusAuthority>>,
        dev_name: impl Into<String>,
        alias: Option<String>,
    ) -> Arc<Self> {
        let authority = authority.map_or_else(Weak::new, Arc::downgrade);
        let dev_name = dev_name.into();
        Arc::new_cyclic(|me| Self {
            core,
            me: me.clone(),
            authority,
            dev_name,
            alias,
            state_obj: Mutex::new(None),
            last_state: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            description: Mutex::new(None),
            lock_info: Mutex::new(LockInfo::default()),
        })
    }

    /// Back-end device name (slashed, or the alias if unresolved).
    pub fn dev_name(&self) -> &str {
        &self.dev_name
    }

    /// Alias, if known.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Owning authority.
    pub fn authority(&self) -> Option<Arc<TaurusAuthority>> {
        self.authority.upgrade()
    }

    fn backend(&self) -> Result<Arc<dyn SchemeBackend>> {
        self.core
            .factory()
            .map(|f| Arc::clone(f.backend()))
            .ok_or_else(|| TaurusError::Disposed(self.full_name().to_string()))
    }

    fn as_listener(&self) -> Option<Arc<dyn TaurusListener>> {
        self.me.upgrade().map(|d| d as Arc<dyn TaurusListener>)
    }

    /// Attribute of this device, by name relative to it (`voltage` or
    /// `/voltage`).
    pub fn get_attribute(&self, name: &str) -> Result<Arc<TaurusAttribute>> {
        let factory = self
            .core
            .factory()
            .ok_or_else(|| TaurusError::Disposed(self.full_name().to_string()))?;
        let name = name.trim_start_matches('/');
        factory.get_attribute(&format!("{}/{}", self.full_name(), name))
    }

    /// The `state` attribute, created on first use.
    pub fn state_attribute(&self) -> Result<Arc<TaurusAttribute>> {
        if let Some(state) = self.state_obj.lock().clone() {
            return Ok(state);
        }
        let state = self.get_attribute("state")?;
        Ok(Arc::clone(self.state_obj.lock().get_or_insert(state)))
    }

    /// Current state; `Undefined` when it cannot be read.
    pub fn state(&self, cache: bool) -> DevState {
        self.state_attribute()
            .and_then(|s| s.read(cache))
            .ok()
            .and_then(|v| v.rvalue.as_ref().and_then(DataValue::as_state))
            .unwrap_or(DevState::Undefined)
    }

    /// Description from the back-end, cached after the first read.
    pub fn description(&self, cache: bool) -> String {
        if cache {
            if let Some(d) = self.description.lock().clone() {
                return d;
            }
        }
        let descr = self
            .backend()
            .and_then(|b| b.device_description(&self.dev_name))
            .unwrap_or_else(|_| DFT_DEVICE_DESCRIPTION.to_string());
        *self.description.lock() = Some(descr.clone());
        descr
    }

    /// Lock the device. Schemes without locking accept and ignore it.
    pub fn lock(&self, force: bool) -> Result<()> {
        tracing::debug!(device = %self.full_name(), force, "Lock requested");
        Ok(())
    }

    /// Unlock the device.
    pub fn unlock(&self, force: bool) -> Result<()> {
        tracing::debug!(device = %self.full_name(), force, "Unlock requested");
        Ok(())
    }

    /// Lock information.
    pub fn lock_info(&self, _cache: bool) -> LockInfo {
        self.lock_info.lock().clone()
    }

    /// Poll `attrs` of this device.
    ///
    /// `Asynch` returns the id of the pending request; the results are
    /// published by a later call with `Reply(id)`.
    pub fn poll(&self, attrs: &[Arc<TaurusAttribute>], req: PollRequest) -> Result<Option<u64>> {
        match req {
            PollRequest::Sync => {
                for attr in attrs {
                    attr.poll();
                }
                Ok(None)
            }
            PollRequest::Asynch => {
                let names: Vec<String> = attrs.iter().map(|a| a.attr_name().to_string()).collect();
                let results = match self.backend()?.read_attributes(&self.dev_name, &names) {
                    Ok(results) => results,
                    Err(e) => {
                        let msg = e.to_string();
                        for attr in attrs {
                            attr.poll_value(Err(TaurusError::Backend(msg.clone())));
                        }
                        return Err(e);
                    }
                };
                let id = self.next_request.fetch_add(1, Ordering::Relaxed);
                let batch = attrs.iter().cloned().zip(results).collect();
                self.pending.lock().insert(id, batch);
                Ok(Some(id))
            }
            PollRequest::Reply(id) => {
                let batch = self.pending.lock().remove(&id).ok_or_else(|| {
                    TaurusError::Backend(format!(
                        "no pending poll request {} on {}",
                        id,
                        self.full_name()
                    ))
                })?;
                for (attr, result) in batch {
                    attr.poll_value(result);
                }
                Ok(None)
            }
        }
    }

    fn detach_from_state(&self) {
        let state = self.state_obj.lock().clone();
        if let (Some(state), Some(me)) = (state, self.as_listener()) {
            state.remove_listener(&me);
        }
    }
}

impl TaurusModel for TaurusDevice {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn as_model(&self) -> &dyn TaurusModel {
        self
    }

    fn element_type(&self) -> ElementType {
        ElementType::Device
    }

    fn parent_obj(&self) -> Option<Arc<dyn TaurusModel>> {
        self.authority().map(|a| a as Arc<dyn TaurusModel>)
    }

    fn description(&self) -> String {
        TaurusDevice::description(self, true)
    }

    fn add_listener(&self, listener: &Arc<dyn TaurusListener>) -> bool {
        let first = !self.has_listeners();
        if !self.core.listeners().add(listener) {
            return false;
        }
        if first {
            match (self.state_attribute(), self.as_listener()) {
                (Ok(state), Some(me)) => {
                    state.add_listener(&me);
                }
                (Err(e), _) => {
                    tracing::warn!(device = %self.full_name(), error = %e, "Cannot listen to state");
                }
                _ => {}
            }
        } else {
            let current = *self.last_state.lock();
            if let Some(state) = current {
                self.fire_event_to(
                    TaurusEventType::Change,
                    &EventValue::State(state),
                    std::slice::from_ref(listener),
                );
            }
        }
        true
    }

    fn remove_listener(&self, listener: &Arc<dyn TaurusListener>) -> Option<bool> {
        let removed = self.core.listeners().remove(listener);
        if removed == Some(true) && !self.has_listeners() {
            self.detach_from_state();
        }
        removed
    }

    fn clean_up(&self) {
        self.unforce_listening();
        self.detach_from_state();
        *self.state_obj.lock() = None;
        self.pending.lock().clear();
        self.core.listeners().tear_down();
    }
}

impl TaurusListener for TaurusDevice {
    fn event_received(&self, _src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue) {
        if ty == TaurusEventType::Config {
            return;
        }
        let state = match value {
            EventValue::Value(v) => v
                .rvalue
                .as_ref()
                .and_then(DataValue::as_state)
                .unwrap_or(DevState::Undefined),
            EventValue::State(s) => *s,
            _ => DevState::Undefined,
        };
        let changed = {
            let mut last = self.last_state.lock();
            if *last == Some(state) {
                false
            } else {
                *last = Some(state);
                true
            }
        };
        if changed {
            self.fire_event(TaurusEventType::Change, &EventValue::State(state));
        }
    }
}
