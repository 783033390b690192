//! The manager: scheme routing, factories and job dispatch.
//!
//! [`TaurusManager`] is an explicitly constructed context object. It owns
//! the worker pool, the deprecation policy and one factory per scheme
//! plugin, created on first use. Names are routed to a factory by their
//! scheme prefix, or by the configured default scheme when they have none.
//!
//! Scheme plugins live in a process-wide table. The built-in `sim` plugin
//! is always present; others are added with [`register_plugin`].
//!
//! Names of the `res` scheme are no plugin of their own: the manager
//! replaces them with the model name found in its [`ResourceTable`] and
//! routes that one.
//!
//! # Example
//! ```no_run
//! use taurus_core::{config::TaurusConfig, manager::TaurusManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TaurusManager::new(TaurusConfig::default())?;
//! let attr = manager.get_attribute("sim:a/b/c/voltage")?;
//! println!("{:?}", attr.read(false)?.rvalue);
//! manager.clean_up();
//! # Ok(())
//! # }
//! ```

use crate::attribute::TaurusAttribute;
use crate::authority::TaurusAuthority;
use crate::backend::SchemeBackend;
use crate::basetypes::{ElementType, ManagerState, SerializationMode};
use crate::config::TaurusConfig;
use crate::configuration::TaurusConfiguration;
use crate::device::TaurusDevice;
use crate::error::{Result, TaurusError};
use crate::factory::{FactorySettings, ModelObject, TaurusFactory};
use crate::logging::DeprecationPolicy;
use crate::schemes::res::{ResourceTable, RES_SCHEMES};
use crate::schemes::sim::{SimBackend, SIM_SCHEME};
use crate::validator::slashed::SlashedValidators;
use crate::threadpool::{JobDispatcher, ThreadPool};
use crate::validator::uri::scheme_from_name;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the manager's worker pool.
pub const THREAD_POOL_NAME: &str = "TaurusTP";

/// Builds the back-end of a scheme plugin.
pub type BackendBuilder = fn(&TaurusConfig) -> Result<Arc<dyn SchemeBackend>>;

/// A scheme plugin: the schemes it handles and how to build its back-end.
#[derive(Debug, Clone, Copy)]
pub struct SchemePlugin {
    /// Plugin name.
    pub name: &'static str,
    /// Schemes handled; the first one is canonical.
    pub schemes: &'static [&'static str],
    /// Back-end constructor.
    pub build: BackendBuilder,
}

fn build_sim(config: &TaurusConfig) -> Result<Arc<dyn SchemeBackend>> {
    Ok(Arc::new(SimBackend::from_config(config)))
}

/// The built-in simulation plugin.
pub const SIM_PLUGIN: SchemePlugin = SchemePlugin {
    name: SIM_SCHEME,
    schemes: &[SIM_SCHEME],
    build: build_sim,
};

static PLUGINS: Lazy<RwLock<Vec<SchemePlugin>>> = Lazy::new(|| RwLock::new(vec![SIM_PLUGIN]));

/// Add a plugin to the process-wide table.
///
/// A plugin with an already registered name is ignored. Schemes already
/// claimed by another plugin stay with the first one; the conflict is
/// logged. Returns whether the plugin was added.
pub fn register_plugin(plugin: SchemePlugin) -> bool {
    let mut plugins = PLUGINS.write();
    if plugins.iter().any(|p| p.name == plugin.name) {
        return false;
    }
    for scheme in plugin.schemes {
        if let Some(owner) = plugins
            .iter()
            .find(|p| p.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)))
        {
            tracing::warn!(
                scheme = %scheme,
                kept = owner.name,
                ignored = plugin.name,
                "Scheme claimed by two plugins"
            );
        }
    }
    tracing::debug!(plugin = plugin.name, schemes = ?plugin.schemes, "Plugin registered");
    plugins.push(plugin);
    true
}

/// Every registered plugin, in registration order.
pub fn registered_plugins() -> Vec<SchemePlugin> {
    PLUGINS.read().clone()
}

#[derive(Default)]
struct ManagerInner {
    initialized: bool,
    // scheme -> plugin name, first registration wins
    routes: HashMap<String, &'static str>,
    factories: HashMap<&'static str, Arc<TaurusFactory>>,
}

/// Entry point of the model layer.
pub struct TaurusManager {
    config: TaurusConfig,
    inner: Mutex<ManagerInner>,
    state: Mutex<ManagerState>,
    dispatcher: Arc<JobDispatcher>,
    deprecations: Arc<DeprecationPolicy>,
    resources: ResourceTable,
}

impl TaurusManager {
    /// Validate `config` and initialize a manager from it.
    pub fn new(config: TaurusConfig) -> Result<Self> {
        config.validate().map_err(TaurusError::Configuration)?;
        let manager = Self {
            dispatcher: Arc::new(JobDispatcher::new(config.serialization_mode)),
            deprecations: Arc::new(DeprecationPolicy::from_config(&config.logging)),
            resources: ResourceTable::from_config(&config.resources)?,
            inner: Mutex::new(ManagerInner::default()),
            state: Mutex::new(ManagerState::Uninitialized),
            config,
        };
        manager.re_init()?;
        Ok(manager)
    }

    /// Initialize again after [`clean_up`](Self::clean_up). Returns
    /// immediately when already initialized.
    pub fn re_init(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.initialized {
            return Ok(());
        }
        let pool = ThreadPool::new(
            THREAD_POOL_NAME,
            self.config.thread_pool.workers,
            self.config.thread_pool.queue_size,
        )?;
        self.dispatcher.attach(pool);

        inner.routes.clear();
        for plugin in registered_plugins() {
            for scheme in plugin.schemes {
                inner
                    .routes
                    .entry(scheme.to_lowercase())
                    .or_insert(plugin.name);
            }
        }
        inner.initialized = true;
        *self.state.lock() = ManagerState::Inited;
        tracing::info!(
            default_scheme = %self.config.default_scheme,
            mode = ?self.serialization_mode(),
            "Taurus manager initialized"
        );
        Ok(())
    }

    /// Configuration in use.
    pub fn config(&self) -> &TaurusConfig {
        &self.config
    }

    /// Lifecycle state.
    pub fn state(&self) -> ManagerState {
        *self.state.lock()
    }

    /// Job dispatcher.
    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Deprecation policy.
    pub fn deprecations(&self) -> &Arc<DeprecationPolicy> {
        &self.deprecations
    }

    /// Resource maps behind `res:` names.
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Registered plugins.
    pub fn plugins(&self) -> Vec<SchemePlugin> {
        registered_plugins()
    }

    /// Schemes currently routed, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = {
            let inner = self.inner.lock();
            if !inner.initialized {
                return Vec::new();
            }
            inner.routes.keys().cloned().collect()
        };
        schemes.extend(RES_SCHEMES.iter().map(|s| s.to_string()));
        schemes.sort();
        schemes.dedup();
        schemes
    }

    /// Scheme of `name`, the default scheme if it has none.
    pub fn scheme_of(&self, name: &str) -> String {
        scheme_from_name(name, true, &self.config.default_scheme)
            .unwrap_or_else(|| self.config.default_scheme.to_lowercase())
    }

    /// Factory for `scheme`, or for the default scheme.
    pub fn get_factory(&self, scheme: Option<&str>) -> Result<Arc<TaurusFactory>> {
        let scheme = scheme
            .unwrap_or(&self.config.default_scheme)
            .to_lowercase();
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return Err(TaurusError::Disposed("TaurusManager".to_string()));
        }
        let plugin_name = *inner
            .routes
            .get(&scheme)
            .ok_or_else(|| TaurusError::UnsupportedScheme(scheme.clone()))?;
        if let Some(factory) = inner.factories.get(plugin_name) {
            return Ok(Arc::clone(factory));
        }

        let plugin = registered_plugins()
            .into_iter()
            .find(|p| p.name == plugin_name)
            .ok_or_else(|| TaurusError::UnsupportedScheme(scheme.clone()))?;
        let backend = (plugin.build)(&self.config)?;
        let settings = FactorySettings {
            schemes: plugin.schemes.iter().map(|s| s.to_string()).collect(),
            case_sensitive: backend.case_sensitive(),
            strict_names: self.config.strict_model_names,
            default_polling_period_ms: self.config.polling.default_period_ms,
            polling_enabled: self.config.polling.enabled,
            serialization_mode: self.serialization_mode(),
        };
        let factory = TaurusFactory::new(
            settings,
            backend,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.deprecations),
        )?;
        inner.factories.insert(plugin_name, Arc::clone(&factory));
        tracing::debug!(plugin = plugin_name, "Factory instantiated");
        Ok(factory)
    }

    /// Factory of the default scheme.
    pub fn get_default_factory(&self) -> Result<Arc<TaurusFactory>> {
        self.get_factory(None)
    }

    /// `name` with `res:` indirections replaced by the model name they
    /// stand for. Other names come back unchanged.
    pub fn resolve_name(&self, name: &str) -> Result<String> {
        self.resources.resolve(name)
    }

    // factory of the resolved name, and that name
    fn route(&self, name: &str) -> Result<(Arc<TaurusFactory>, String)> {
        let name = self.resolve_name(name)?;
        let factory = self.get_factory(Some(&self.scheme_of(&name)))?;
        Ok((factory, name))
    }

    /// Authority named `name`.
    pub fn get_authority(&self, name: &str) -> Result<Arc<TaurusAuthority>> {
        let (factory, name) = self.route(name)?;
        factory.get_authority(&name)
    }

    /// Device named `name`.
    pub fn get_device(&self, name: &str) -> Result<Arc<TaurusDevice>> {
        let (factory, name) = self.route(name)?;
        factory.get_device(&name)
    }

    /// Attribute named `name`.
    pub fn get_attribute(&self, name: &str) -> Result<Arc<TaurusAttribute>> {
        let (factory, name) = self.route(name)?;
        factory.get_attribute(&name)
    }

    /// Attribute `attr_name` of the device named `device_name`.
    pub fn get_device_attribute(
        &self,
        device_name: &str,
        attr_name: &str,
    ) -> Result<Arc<TaurusAttribute>> {
        self.get_device(device_name)?.get_attribute(attr_name)
    }

    /// Configuration named `name`.
    pub fn get_configuration(&self, name: &str) -> Result<Arc<TaurusConfiguration>> {
        let (factory, name) = self.route(name)?;
        factory.get_configuration(&name)
    }

    /// Element named `name`. Without `kind` it is guessed from the name.
    pub fn get_object(&self, kind: Option<ElementType>, name: &str) -> Result<ModelObject> {
        let (factory, name) = self.route(name)?;
        match kind {
            Some(kind) => factory.get_object(kind, &name),
            None => factory.find_object(&name),
        }
    }

    /// Element named `name`, whatever its kind.
    pub fn find_object(&self, name: &str) -> Result<ModelObject> {
        self.get_object(None, name)
    }

    /// Kind of element `name` refers to; `None` if no grammar accepts it.
    pub fn find_object_class(&self, name: &str) -> Option<ElementType> {
        let (factory, name) = self.route(name).ok()?;
        factory.find_object_class(&name)
    }

    /// Every element kind `name` is valid for. `strict` overrides the
    /// configured strictness of the grammars. Names of unknown schemes
    /// have none.
    pub fn valid_types_for_name(&self, name: &str, strict: Option<bool>) -> Vec<ElementType> {
        let Ok((factory, name)) = self.route(name) else {
            return Vec::new();
        };
        match strict {
            Some(strict) if strict != self.config.strict_model_names => {
                SlashedValidators::new(factory.scheme(), strict)
                    .map(|v| v.valid_types(&name))
                    .unwrap_or_default()
            }
            _ => factory.valid_types_for_name(&name),
        }
    }

    /// Whether `name` is a valid model name, and when `kinds` is given,
    /// whether it is valid for at least one of them.
    pub fn is_valid_name(
        &self,
        name: &str,
        kinds: Option<&[ElementType]>,
        strict: Option<bool>,
    ) -> bool {
        let valid = self.valid_types_for_name(name, strict);
        match kinds {
            Some(kinds) => kinds.iter().any(|k| valid.contains(k)),
            None => !valid.is_empty(),
        }
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Run `job` in the manager's serialization mode.
    pub fn add_job(&self, job: impl FnOnce() + Send + 'static) {
        self.dispatcher.enqueue(job, None);
    }

    /// Run `job` and hand its result to `callback`.
    pub fn add_job_with_callback<R, F, C>(&self, job: F, callback: C)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.dispatcher.enqueue_with_callback(job, callback, None);
    }

    /// Run `job` in an explicit mode.
    pub fn enqueue_job(&self, job: impl FnOnce() + Send + 'static, mode: SerializationMode) {
        self.dispatcher.enqueue(job, Some(mode));
    }

    /// Run `job` in an explicit mode and hand its result to `callback`.
    pub fn enqueue_job_with_callback<R, F, C>(&self, job: F, callback: C, mode: SerializationMode)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.dispatcher
            .enqueue_with_callback(job, callback, Some(mode));
    }

    /// Default serialization mode.
    pub fn serialization_mode(&self) -> SerializationMode {
        self.dispatcher.mode()
    }

    /// Change the default serialization mode of jobs and new factories.
    pub fn set_serialization_mode(&self, mode: SerializationMode) {
        self.dispatcher.set_mode(mode);
        for factory in self.inner.lock().factories.values() {
            factory.set_serialization_mode(mode);
        }
    }

    /// Change the default polling period of every instantiated factory.
    pub fn change_default_polling_period(&self, period_ms: u64) -> Result<()> {
        let factories: Vec<Arc<TaurusFactory>> =
            self.inner.lock().factories.values().cloned().collect();
        for factory in factories {
            factory.change_default_polling_period(period_ms)?;
        }
        Ok(())
    }

    /// Clean up every factory and join the pool. Idempotent.
    pub fn clean_up(&self) {
        let factories: Vec<Arc<TaurusFactory>> = {
            let mut inner = self.inner.lock();
            if !inner.initialized {
                return;
            }
            inner.initialized = false;
            inner.routes.clear();
            inner.factories.drain().map(|(_, f)| f).collect()
        };
        for factory in factories {
            factory.clean_up();
        }
        self.dispatcher.shutdown();
        self.deprecations.log_summary();
        *self.state.lock() = ManagerState::Cleaned;
        tracing::info!("Taurus manager cleaned up");
    }
}

impl Drop for TaurusManager {
    fn drop(&mut self) {
        self.clean_up();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn serial_manager() -> TaurusManager {
        let mut config = TaurusConfig::default();
        config.serialization_mode = SerializationMode::Serial;
        TaurusManager::new(config).unwrap()
    }

    #[test]
    fn default_factory_is_sim() {
        let manager = serial_manager();
        let factory = manager.get_default_factory().unwrap();
        assert!(factory.supports_scheme("SIM"));
        assert!(Arc::ptr_eq(&factory, &manager.get_factory(Some("sim")).unwrap()));
        assert_eq!(manager.state(), ManagerState::Inited);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let manager = serial_manager();
        assert!(matches!(
            manager.get_attribute("nope:a/b/c/d"),
            Err(TaurusError::UnsupportedScheme(_))
        ));
        assert_eq!(manager.find_object_class("nope:a/b/c"), None);
    }

    #[test]
    fn names_route_by_scheme() {
        let manager = serial_manager();
        let a = manager.get_attribute("sim:a/b/c/voltage").unwrap();
        let b = manager.get_attribute("a/b/c/voltage").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.scheme_of("a/b/c"), "sim");
        assert_eq!(manager.scheme_of("Tango:a/b/c"), "tango");
    }

    #[test]
    fn serial_jobs_run_before_returning() {
        let manager = serial_manager();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        manager.add_job(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_jobs_run_on_pool() {
        let manager = TaurusManager::new(TaurusConfig::default()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        manager.add_job_with_callback(
            || std::thread::current().name().map(str::to_string),
            move |name| tx.send(name).unwrap(),
        );
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(name.starts_with(THREAD_POOL_NAME));
    }

    #[test]
    fn clean_up_is_idempotent_and_reversible() {
        let manager = serial_manager();
        manager.get_attribute("a/b/c/voltage").unwrap();
        manager.clean_up();
        manager.clean_up();
        assert_eq!(manager.state(), ManagerState::Cleaned);
        assert!(manager.get_default_factory().is_err());

        manager.re_init().unwrap();
        assert!(manager.get_default_factory().is_ok());
    }

    #[test]
    fn duplicate_plugin_names_are_ignored() {
        assert!(!register_plugin(SIM_PLUGIN));
        assert!(registered_plugins().iter().any(|p| p.name == SIM_SCHEME));
    }
}
