//! Authorities: the root element of a scheme (a control system instance).

use crate::backend::SchemeBackend;
use crate::basetypes::ElementType;
use crate::model::{ModelCore, TaurusModel};
use std::sync::Arc;

/// Authority element, named `scheme://host:port`.
pub struct TaurusAuthority {
    core: ModelCore,
    host: String,
    port: String,
}

impl TaurusAuthority {
    /// Authority on `host:port`.
    pub fn new(core: ModelCore, host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            core,
            host: host.into(),
            port: port.into(),
        }
    }

    /// Host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port.
    pub fn port(&self) -> &str {
        &self.port
    }

    fn backend(&self) -> Option<Arc<dyn SchemeBackend>> {
        self.core.factory().map(|f| Arc::clone(f.backend()))
    }

    /// Full device name registered for `alias`.
    pub fn element_full_name(&self, alias: &str) -> Option<String> {
        self.backend()?.element_full_name(alias)
    }

    /// Alias registered for the device `name`.
    pub fn element_alias(&self, name: &str) -> Option<String> {
        self.backend()?.element_alias(name)
    }
}

impl TaurusModel for TaurusAuthority {
    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn as_model(&self) -> &dyn TaurusModel {
        self
    }

    fn element_type(&self) -> ElementType {
        ElementType::Authority
    }

    fn description(&self) -> String {
        self.backend()
            .map_or_else(|| "A Taurus Authority".to_string(), |b| b.authority_description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sim_factory;

    #[test]
    fn authority_resolves_aliases_through_backend() {
        let (factory, _) = sim_factory();
        let auth = factory.get_authority("sim://localhost:10000").unwrap();
        assert_eq!(auth.host(), "localhost");
        assert_eq!(auth.port(), "10000");
        assert_eq!(auth.element_full_name("abc").as_deref(), Some("a/b/c"));
        assert_eq!(auth.element_alias("a/b/c").as_deref(), Some("abc"));
        assert_eq!(auth.simple_name(), Some("localhost:10000"));
    }
}
