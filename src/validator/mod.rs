//! Model name validation.
//!
//! Every element kind has a validator owning three compiled patterns, one
//! per name form:
//!
//! - **complete**: fully qualified, scheme included
//!   (`sim://localhost:10000/a/b/c/d`)
//! - **normal**: canonical within the scheme; parts equal to the scheme
//!   defaults are dropped (`a/b/c/d`)
//! - **short**: display form, not necessarily unique (`d`)
//!
//! [`NameValidator::get_names`] derives all three forms from any accepted
//! input. Alias resolution needs a live authority, which is supplied through
//! [`NameResolver`] (implemented by the factory).

pub mod slashed;
pub mod uri;

pub use slashed::{
    AttributeParts, AttributeValidator, AuthorityParts, AuthorityValidator, ConfigurationParts,
    ConfigurationValidator, DeviceParts, DeviceValidator, SlashedValidators,
};
pub use uri::{make_scheme_explicit, scheme_from_name};

use crate::basetypes::{ElementType, MatchLevel};
use crate::error::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// Named captures of a successful match.
pub type UriGroups = HashMap<String, String>;

/// The (complete, normal, short) name forms of a model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct NameTriple {
    /// Fully qualified name.
    pub complete: Option<String>,
    /// Canonical name.
    pub normal: Option<String>,
    /// Display name.
    pub short: Option<String>,
}

impl NameTriple {
    /// Triple with all three forms present.
    pub fn new(
        complete: impl Into<String>,
        normal: impl Into<String>,
        short: impl Into<String>,
    ) -> Self {
        Self {
            complete: Some(complete.into()),
            normal: Some(normal.into()),
            short: Some(short.into()),
        }
    }

    /// Whether every form is missing.
    pub fn is_empty(&self) -> bool {
        self.complete.is_none() && self.normal.is_none() && self.short.is_none()
    }

    /// Most qualified form available.
    pub fn best(&self) -> Option<&str> {
        self.complete
            .as_deref()
            .or(self.normal.as_deref())
            .or(self.short.as_deref())
    }
}

/// Live lookups a validator needs to complete a name.
pub trait NameResolver {
    /// Default authority of the scheme, as `//host:port`.
    fn default_authority(&self) -> Option<String>;

    /// Full device name behind an alias.
    fn full_device_name(&self, alias: &str) -> Option<String>;

    /// Alias of a full device name.
    fn device_alias(&self, device: &str) -> Option<String>;
}

/// The three compiled name patterns of a validator.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    /// Complete form.
    pub complete: Regex,
    /// Normal form.
    pub normal: Regex,
    /// Short form.
    pub short: Regex,
    /// Lenient complete form accepted when strict names are off.
    pub non_strict: Option<Regex>,
}

impl NamePatterns {
    /// Compile the patterns.
    pub fn compile(
        complete: &str,
        normal: &str,
        short: &str,
        non_strict: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            complete: Regex::new(complete)?,
            normal: Regex::new(normal)?,
            short: Regex::new(short)?,
            non_strict: non_strict.map(Regex::new).transpose()?,
        })
    }
}

/// Validator for one element kind of one scheme.
pub trait NameValidator: Send + Sync {
    /// Element kind validated.
    fn element_type(&self) -> ElementType;

    /// Canonical scheme name.
    fn scheme(&self) -> &str;

    /// Compiled patterns.
    fn patterns(&self) -> &NamePatterns;

    /// Whether the lenient pattern is rejected.
    fn is_strict(&self) -> bool;

    /// The (complete, normal, short) triple, or `None` if the name is invalid.
    fn get_names(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<NameTriple>;

    /// Whether `name` matches the patterns selected by `level`.
    fn is_valid(&self, name: &str, level: MatchLevel) -> bool {
        let p = self.patterns();
        match level {
            MatchLevel::Any => {
                p.complete.is_match(name) || p.normal.is_match(name) || p.short.is_match(name)
            }
            MatchLevel::Short => p.short.is_match(name),
            MatchLevel::Normal => p.normal.is_match(name),
            MatchLevel::Complete => p.complete.is_match(name),
            MatchLevel::ShortNormal => p.short.is_match(name) || p.normal.is_match(name),
            MatchLevel::NormalComplete => p.normal.is_match(name) || p.complete.is_match(name),
        }
    }

    /// Whether `name` identifies an element of this kind.
    ///
    /// The scheme is made explicit first, so `a/b/c` and `sim:a/b/c` are
    /// equivalent for the `sim` validators.
    fn accepts(&self, name: &str) -> bool {
        self.uri_groups(name).is_some()
    }

    /// Named groups of the complete-form match of `name`.
    fn uri_groups(&self, name: &str) -> Option<UriGroups> {
        let explicit = make_scheme_explicit(name, self.scheme());
        let p = self.patterns();
        if let Some(caps) = p.complete.captures(&explicit) {
            return Some(collect_groups(&p.complete, &caps));
        }
        if self.is_strict() {
            return None;
        }
        let lenient = p.non_strict.as_ref()?;
        let caps = lenient.captures(&explicit)?;
        tracing::warn!(
            name = %name,
            scheme = %self.scheme(),
            "Model name is supported but not strictly valid"
        );
        Some(collect_groups(lenient, &caps))
    }
}

fn collect_groups(re: &Regex, caps: &regex::Captures<'_>) -> UriGroups {
    re.capture_names()
        .flatten()
        .filter_map(|n| caps.name(n).map(|m| (n.to_string(), m.as_str().to_string())))
        .collect()
}
