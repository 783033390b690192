//! Per-scheme factories.
//!
//! A factory turns names into model elements and guarantees that one name
//! maps to one live object: every kind has a name-keyed cache (caseless
//! unless the scheme is case sensitive). Elements are created outside the
//! cache lock and inserted with insert-or-get, so concurrent lookups of the
//! same name always end up with the same object.
//!
//! The factory also owns the polling timers of its attributes, one per
//! polling period.

use crate::attribute::TaurusAttribute;
use crate::authority::TaurusAuthority;
use crate::backend::SchemeBackend;
use crate::basetypes::{ElementType, SerializationMode};
use crate::caseless::NameMap;
use crate::configuration::TaurusConfiguration;
use crate::device::TaurusDevice;
use crate::error::{Result, TaurusError};
use crate::logging::DeprecationPolicy;
use crate::model::{ModelCore, TaurusModel};
use crate::polling::PollingTimer;
use crate::threadpool::JobDispatcher;
use crate::validator::slashed::{
    AttributeParts, AuthorityParts, DeviceParts, SlashedValidators,
};
use crate::validator::{NameResolver, NameTriple};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Settings of one factory.
#[derive(Debug, Clone)]
pub struct FactorySettings {
    /// Schemes handled; the first one is canonical.
    pub schemes: Vec<String>,
    /// Whether names are case sensitive.
    pub case_sensitive: bool,
    /// Whether only strict names are accepted.
    pub strict_names: bool,
    /// Default polling period in milliseconds.
    pub default_polling_period_ms: u64,
    /// Whether polling timers may run.
    pub polling_enabled: bool,
    /// Serialization mode of new authorities.
    pub serialization_mode: SerializationMode,
}

impl FactorySettings {
    /// Defaults for `scheme`.
    pub fn new(scheme: &str) -> Self {
        Self {
            schemes: vec![scheme.to_string()],
            case_sensitive: false,
            strict_names: true,
            default_polling_period_ms: crate::attribute::DFT_POLLING_PERIOD_MS,
            polling_enabled: true,
            serialization_mode: SerializationMode::Concurrent,
        }
    }
}

/// Any model element returned by a generic lookup.
#[derive(Clone)]
pub enum ModelObject {
    /// Authority.
    Authority(Arc<TaurusAuthority>),
    /// Device.
    Device(Arc<TaurusDevice>),
    /// Attribute.
    Attribute(Arc<TaurusAttribute>),
    /// Configuration.
    Configuration(Arc<TaurusConfiguration>),
}

impl ModelObject {
    /// The element as a model.
    pub fn as_model(&self) -> &dyn TaurusModel {
        match self {
            ModelObject::Authority(a) => a.as_ref(),
            ModelObject::Device(d) => d.as_ref(),
            ModelObject::Attribute(a) => a.as_ref(),
            ModelObject::Configuration(c) => c.as_ref(),
        }
    }

    /// Kind of element.
    pub fn element_type(&self) -> ElementType {
        self.as_model().element_type()
    }
}

struct FactoryCaches {
    authorities: NameMap<Arc<TaurusAuthority>>,
    devices: NameMap<Arc<TaurusDevice>>,
    attributes: NameMap<Arc<TaurusAttribute>>,
    configurations: NameMap<Arc<TaurusConfiguration>>,
}

impl FactoryCaches {
    fn new(case_sensitive: bool) -> Self {
        Self {
            authorities: NameMap::new(case_sensitive),
            devices: NameMap::new(case_sensitive),
            attributes: NameMap::new(case_sensitive),
            configurations: NameMap::new(case_sensitive),
        }
    }
}

/// Element factory of one scheme.
pub struct TaurusFactory {
    me: Weak<TaurusFactory>,
    schemes: Vec<String>,
    case_sensitive: bool,
    validators: SlashedValidators,
    backend: Arc<dyn SchemeBackend>,
    caches: Mutex<FactoryCaches>,
    polling_timers: Mutex<BTreeMap<u64, Arc<PollingTimer>>>,
    polling_enabled: AtomicBool,
    default_polling_period: AtomicU64,
    serialization_mode: Mutex<SerializationMode>,
    dispatcher: Arc<JobDispatcher>,
    deprecations: Arc<DeprecationPolicy>,
}

fn cache_key(names: &NameTriple) -> String {
    names.best().unwrap_or_default().to_string()
}

impl TaurusFactory {
    /// Factory for `settings`, doing I/O through `backend`.
    pub fn new(
        settings: FactorySettings,
        backend: Arc<dyn SchemeBackend>,
        dispatcher: Arc<JobDispatcher>,
        deprecations: Arc<DeprecationPolicy>,
    ) -> Result<Arc<Self>> {
        let scheme = settings
            .schemes
            .first()
            .ok_or_else(|| TaurusError::Configuration("a factory needs at least one scheme".into()))?;
        if settings.default_polling_period_ms == 0 {
            return Err(TaurusError::Configuration(
                "polling period must be positive".into(),
            ));
        }
        let validators = SlashedValidators::new(scheme, settings.strict_names)?;
        tracing::debug!(schemes = ?settings.schemes, "Factory created");
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            case_sensitive: settings.case_sensitive,
            validators,
            backend,
            caches: Mutex::new(FactoryCaches::new(settings.case_sensitive)),
            polling_timers: Mutex::new(BTreeMap::new()),
            polling_enabled: AtomicBool::new(settings.polling_enabled),
            default_polling_period: AtomicU64::new(settings.default_polling_period_ms),
            serialization_mode: Mutex::new(settings.serialization_mode),
            dispatcher,
            deprecations,
            schemes: settings.schemes,
        }))
    }

    /// Schemes handled.
    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// Canonical scheme.
    pub fn scheme(&self) -> &str {
        self.schemes.first().map_or("", String::as_str)
    }

    /// Whether `scheme` is handled (case-insensitive).
    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// Whether names are case sensitive.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Name validators.
    pub fn validators(&self) -> &SlashedValidators {
        &self.validators
    }

    /// I/O back-end.
    pub fn backend(&self) -> &Arc<dyn SchemeBackend> {
        &self.backend
    }

    /// Job dispatcher shared with the manager.
    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Deprecation policy shared with the manager.
    pub fn deprecations(&self) -> &Arc<DeprecationPolicy> {
        &self.deprecations
    }

    /// Serialization mode of new authorities.
    pub fn serialization_mode(&self) -> SerializationMode {
        *self.serialization_mode.lock()
    }

    /// Change the serialization mode of new authorities.
    pub fn set_serialization_mode(&self, mode: SerializationMode) {
        *self.serialization_mode.lock() = mode;
    }

    fn resolver(&self) -> Option<&dyn NameResolver> {
        Some(self as &dyn NameResolver)
    }

    // =========================================================================
    // Element lookup
    // =========================================================================

    /// Authority named `name`.
    pub fn get_authority(&self, name: &str) -> Result<Arc<TaurusAuthority>> {
        let parts = self
            .validators
            .authority
            .parts(name)
            .ok_or_else(|| TaurusError::invalid_name("authority", name))?;
        self.authority_for(&parts)
    }

    /// Authority used when names omit one.
    pub fn get_default_authority(&self) -> Result<Option<Arc<TaurusAuthority>>> {
        match self.backend.default_authority() {
            Some(a) => self
                .get_authority(&format!("{}:{}", self.scheme(), a))
                .map(Some),
            None => Ok(None),
        }
    }

    fn authority_for(&self, parts: &AuthorityParts) -> Result<Arc<TaurusAuthority>> {
        let names = parts.names();
        let key = cache_key(&names);
        if let Some(a) = self.caches.lock().authorities.get(&key) {
            return Ok(Arc::clone(a));
        }
        let authority = Arc::new(TaurusAuthority::new(
            ModelCore::new(names, self.serialization_mode(), self.me.clone()),
            parts.host.clone(),
            parts.port.clone(),
        ));
        let mut caches = self.caches.lock();
        Ok(Arc::clone(
            caches.authorities.get_or_insert_with(&key, || authority),
        ))
    }

    /// Device named `name` (full slashed name or alias).
    pub fn get_device(&self, name: &str) -> Result<Arc<TaurusDevice>> {
        let parts = self
            .validators
            .device
            .parts(name, self.resolver())
            .ok_or_else(|| TaurusError::invalid_name("device", name))?;
        self.device_for(&parts)
    }

    fn device_for(&self, parts: &DeviceParts) -> Result<Arc<TaurusDevice>> {
        let names = parts.names();
        let key = cache_key(&names);
        if let Some(d) = self.caches.lock().devices.get(&key) {
            return Ok(Arc::clone(d));
        }
        let authority = match &parts.authority {
            Some(a) => Some(self.get_authority(&format!("{}:{}", parts.scheme, a))?),
            None => None,
        };
        let mode = authority
            .as_ref()
            .map_or_else(|| self.serialization_mode(), |a| a.serialization_mode());
        let device = TaurusDevice::new(
            ModelCore::new(names, mode, self.me.clone()),
            authority.as_ref(),
            parts.dev_name.clone(),
            parts.alias.clone(),
        );
        let mut caches = self.caches.lock();
        Ok(Arc::clone(caches.devices.get_or_insert_with(&key, || device)))
    }

    /// Attribute named `name`.
    pub fn get_attribute(&self, name: &str) -> Result<Arc<TaurusAttribute>> {
        let parts = self
            .validators
            .attribute
            .parts(name, self.resolver())
            .ok_or_else(|| TaurusError::invalid_name("attribute", name))?;
        self.attribute_for(&parts)
    }

    fn attribute_for(&self, parts: &AttributeParts) -> Result<Arc<TaurusAttribute>> {
        let names = parts.names();
        let key = cache_key(&names);
        if let Some(a) = self.caches.lock().attributes.get(&key) {
            return Ok(Arc::clone(a));
        }
        let device = self.device_for(&parts.device)?;
        let attribute = TaurusAttribute::new(
            ModelCore::new(names, device.serialization_mode(), self.me.clone()),
            &device,
            parts.attr_name.clone(),
            self.default_polling_period(),
        );
        let mut caches = self.caches.lock();
        Ok(Arc::clone(
            caches.attributes.get_or_insert_with(&key, || attribute),
        ))
    }

    /// Configuration named `name`. Goes through the deprecation policy.
    pub fn get_configuration(&self, name: &str) -> Result<Arc<TaurusConfiguration>> {
        let parts = self
            .validators
            .configuration
            .parts(name, self.resolver())
            .ok_or_else(|| TaurusError::invalid_name("configuration", name))?;
        let names = parts.names();
        let key = cache_key(&names);
        if let Some(c) = self.caches.lock().configurations.get(&key) {
            return Ok(Arc::clone(c));
        }
        self.deprecations
            .deprecated("configuration objects are deprecated; use attribute metadata")?;
        let attribute = self.attribute_for(&parts.attribute)?;
        let configuration = Arc::new(TaurusConfiguration::new(
            ModelCore::new(names, attribute.serialization_mode(), self.me.clone()),
            &attribute,
            parts.key.clone(),
        ));
        let mut caches = self.caches.lock();
        Ok(Arc::clone(
            caches
                .configurations
                .get_or_insert_with(&key, || configuration),
        ))
    }

    /// First element kind whose grammar accepts `name`, most specific first.
    pub fn find_object_class(&self, name: &str) -> Option<ElementType> {
        self.validators.find_element_type(name)
    }

    /// Every element kind whose grammar accepts `name`.
    pub fn valid_types_for_name(&self, name: &str) -> Vec<ElementType> {
        self.validators.valid_types(name)
    }

    /// Element of kind `kind` named `name`.
    pub fn get_object(&self, kind: ElementType, name: &str) -> Result<ModelObject> {
        match kind {
            ElementType::Authority => self.get_authority(name).map(ModelObject::Authority),
            ElementType::Device => self.get_device(name).map(ModelObject::Device),
            ElementType::Attribute => self.get_attribute(name).map(ModelObject::Attribute),
            ElementType::Configuration => {
                self.get_configuration(name).map(ModelObject::Configuration)
            }
            _ => Err(TaurusError::invalid_name("model", name)),
        }
    }

    /// Element named `name`, whatever its kind.
    pub fn find_object(&self, name: &str) -> Result<ModelObject> {
        let kind = self
            .find_object_class(name)
            .ok_or_else(|| TaurusError::invalid_name("model", name))?;
        self.get_object(kind, name)
    }

    /// Number of cached elements of `kind`.
    pub fn cached_count(&self, kind: ElementType) -> usize {
        let caches = self.caches.lock();
        match kind {
            ElementType::Authority => caches.authorities.len(),
            ElementType::Device => caches.devices.len(),
            ElementType::Attribute => caches.attributes.len(),
            ElementType::Configuration => caches.configurations.len(),
            _ => 0,
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Register `attr` with the timer for `period_ms`, creating it if needed.
    pub fn add_attribute_to_polling(
        &self,
        attr: &Arc<TaurusAttribute>,
        period_ms: u64,
        read_now: bool,
    ) {
        let timer = {
            let mut timers = self.polling_timers.lock();
            Arc::clone(timers.entry(period_ms).or_insert_with(|| {
                Arc::new(PollingTimer::new(
                    Duration::from_millis(period_ms),
                    self.case_sensitive,
                    Arc::clone(&self.dispatcher),
                ))
            }))
        };
        timer.add_attribute(attr, self.is_polling_enabled(), read_now);
    }

    /// Unregister `attr` from every timer; timers left empty are dropped.
    pub fn remove_attribute_from_polling(&self, attr: &Arc<TaurusAttribute>) {
        let timers: Vec<Arc<PollingTimer>> = self.polling_timers.lock().values().cloned().collect();
        for timer in &timers {
            timer.remove_attribute(attr);
        }
        self.polling_timers
            .lock()
            .retain(|_, t| t.attribute_count() > 0);
    }

    /// Timer for `period_ms`, if one exists.
    pub fn polling_timer(&self, period_ms: u64) -> Option<Arc<PollingTimer>> {
        self.polling_timers.lock().get(&period_ms).cloned()
    }

    /// Periods that currently have a timer.
    pub fn polling_periods(&self) -> Vec<u64> {
        self.polling_timers.lock().keys().copied().collect()
    }

    /// Allow polling and start every timer.
    pub fn enable_polling(&self) {
        self.polling_enabled.store(true, Ordering::SeqCst);
        let timers: Vec<Arc<PollingTimer>> = self.polling_timers.lock().values().cloned().collect();
        for timer in timers {
            timer.start();
        }
    }

    /// Stop every timer; new timers are created stopped.
    pub fn disable_polling(&self) {
        self.polling_enabled.store(false, Ordering::SeqCst);
        let timers: Vec<Arc<PollingTimer>> = self.polling_timers.lock().values().cloned().collect();
        for timer in timers {
            timer.stop();
        }
    }

    /// Whether polling timers may run.
    pub fn is_polling_enabled(&self) -> bool {
        self.polling_enabled.load(Ordering::SeqCst)
    }

    /// Default polling period of new attributes, in milliseconds.
    pub fn default_polling_period(&self) -> u64 {
        self.default_polling_period.load(Ordering::SeqCst)
    }

    /// Change the default polling period of new attributes.
    pub fn change_default_polling_period(&self, period_ms: u64) -> Result<()> {
        if period_ms == 0 {
            return Err(TaurusError::Configuration(
                "polling period must be positive".into(),
            ));
        }
        self.default_polling_period.store(period_ms, Ordering::SeqCst);
        Ok(())
    }

    /// Stop polling and dispose of every cached element.
    pub fn clean_up(&self) {
        let timers = std::mem::take(&mut *self.polling_timers.lock());
        for timer in timers.into_values() {
            timer.stop();
        }
        let caches = std::mem::replace(
            &mut *self.caches.lock(),
            FactoryCaches::new(self.case_sensitive),
        );
        for c in caches.configurations.values() {
            c.clean_up();
        }
        for a in caches.attributes.values() {
            a.clean_up();
        }
        for d in caches.devices.values() {
            d.clean_up();
        }
        for a in caches.authorities.values() {
            a.clean_up();
        }
        tracing::debug!(scheme = %self.scheme(), "Factory cleaned up");
    }
}

impl NameResolver for TaurusFactory {
    fn default_authority(&self) -> Option<String> {
        self.backend.default_authority()
    }

    fn full_device_name(&self, alias: &str) -> Option<String> {
        self.backend.element_full_name(alias)
    }

    fn device_alias(&self, name: &str) -> Option<String> {
        self.backend.element_alias(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sim_factory;
    use std::thread;

    #[test]
    fn same_name_same_object() {
        let (factory, _) = sim_factory();
        let a = factory.get_attribute("a/b/c/voltage").unwrap();
        let b = factory.get_attribute("A/B/C/Voltage").unwrap();
        let c = factory
            .get_attribute("sim://localhost:10000/a/b/c/voltage")
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(factory.cached_count(ElementType::Attribute), 1);
    }

    #[test]
    fn alias_and_full_name_share_device() {
        let (factory, _) = sim_factory();
        let by_alias = factory.get_device("abc").unwrap();
        let by_name = factory.get_device("a/b/c").unwrap();
        assert!(Arc::ptr_eq(&by_alias, &by_name));
        assert_eq!(by_name.simple_name(), Some("abc"));
    }

    #[test]
    fn concurrent_lookups_converge() {
        let (factory, _) = sim_factory();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = Arc::clone(&factory);
                thread::spawn(move || f.get_attribute("a/b/c/counter").unwrap())
            })
            .collect();
        let attrs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(attrs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn find_object_picks_most_specific_kind() {
        let (factory, _) = sim_factory();
        assert_eq!(
            factory.find_object_class("a/b/c/voltage?configuration"),
            Some(ElementType::Configuration)
        );
        assert_eq!(
            factory.find_object_class("a/b/c/voltage"),
            Some(ElementType::Attribute)
        );
        assert_eq!(factory.find_object_class("a/b/c"), Some(ElementType::Device));
        let obj = factory.find_object("sim://localhost:10000").unwrap();
        assert_eq!(obj.element_type(), ElementType::Authority);
        assert!(factory.find_object("tango:a/b/c").is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (factory, _) = sim_factory();
        assert!(matches!(
            factory.get_device("a/b/c/d/e"),
            Err(TaurusError::InvalidName { .. })
        ));
        assert!(matches!(
            factory.get_object(ElementType::Host, "x"),
            Err(TaurusError::InvalidName { .. })
        ));
    }

    #[test]
    fn timers_are_shared_per_period() {
        let (factory, _) = sim_factory();
        let a = factory.get_attribute("a/b/c/voltage").unwrap();
        let b = factory.get_attribute("a/b/c/counter").unwrap();
        a.activate_polling(700, true);
        b.activate_polling(700, true);
        assert_eq!(factory.polling_periods(), vec![700]);
        let timer = factory.polling_timer(700).unwrap();
        assert_eq!(timer.attribute_count(), 2);

        a.disable_polling();
        b.disable_polling();
        assert!(factory.polling_periods().is_empty());
    }

    #[test]
    fn default_period_must_be_positive() {
        let (factory, _) = sim_factory();
        assert!(factory.change_default_polling_period(0).is_err());
        factory.change_default_polling_period(500).unwrap();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        assert_eq!(attr.polling_period(), 500);
    }

    #[test]
    fn clean_up_empties_caches() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        attr.activate_polling(300, true);
        factory.clean_up();
        assert_eq!(factory.cached_count(ElementType::Attribute), 0);
        assert!(factory.polling_periods().is_empty());
        assert!(attr.core().listeners().is_torn_down());
    }
}
