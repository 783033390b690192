//! Validators for the slashed model-name grammar.
//!
//! ```text
//! scheme://host:port/domain/family/member/attribute?configuration=key
//! ```
//!
//! Devices are named either by a three-part slashed name or by a single
//! word alias. The family is parameterized by scheme so any back-end using
//! this layout (the built-in `sim` scheme, a Tango-like scheme...) shares it.

use super::{NamePatterns, NameResolver, NameTriple, NameValidator, UriGroups};
use crate::basetypes::ElementType;
use crate::error::Result;
use crate::validator::uri::scheme_from_name;

const HOST_PORT: &str = r"(?P<host>[^/?#:]+):(?P<port>\d{1,5})";
const DEV_PATH: &str =
    r"(?P<devname>(?P<devslashname>[^/?#:]+/[^/?#:]+/[^/?#:]+)|(?P<devalias>[^/?#:]+))";
const ATTR_NAME: &str = r"(?P<shortattrname>[^/?#:]+)";
const CFG_SUFFIX: &str = r"(?:\?configuration(?:=(?P<cfgkey>[^?#]*))?|#(?P<fragment>[^?#]*))";

fn scheme_group(scheme: &str) -> String {
    format!("(?P<scheme>(?i:{}))", regex::escape(scheme))
}

fn authority_group() -> String {
    format!("(?P<authority>//{})", HOST_PORT)
}

fn had_scheme(name: &str) -> bool {
    scheme_from_name(name, false, "").is_some()
}

// =============================================================================
// Parts
// =============================================================================

/// Parsed authority name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityParts {
    /// Canonical scheme.
    pub scheme: String,
    /// Host.
    pub host: String,
    /// Port.
    pub port: String,
}

impl AuthorityParts {
    /// `//host:port`.
    pub fn authority(&self) -> String {
        format!("//{}:{}", self.host, self.port)
    }

    /// Name forms: `scheme://host:port`, `//host:port`, `host:port`.
    pub fn names(&self) -> NameTriple {
        NameTriple::new(
            format!("{}:{}", self.scheme, self.authority()),
            self.authority(),
            format!("{}:{}", self.host, self.port),
        )
    }
}

/// Parsed device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParts {
    /// Canonical scheme.
    pub scheme: String,
    /// Explicit authority, else the resolver's default.
    pub authority: Option<String>,
    /// Full slashed name; the alias itself when it could not be resolved.
    pub dev_name: String,
    /// Device alias.
    pub alias: Option<String>,
    /// Whether `dev_name` is a full slashed name.
    pub resolved: bool,
    /// Whether the input carried the scheme.
    pub had_scheme: bool,
    /// Default authority at resolution time.
    pub default_authority: Option<String>,
}

impl DeviceParts {
    fn from_groups(
        scheme: &str,
        groups: &UriGroups,
        had_scheme: bool,
        resolver: Option<&dyn NameResolver>,
    ) -> Option<Self> {
        let default_authority = resolver.and_then(|r| r.default_authority());
        let authority = groups
            .get("authority")
            .cloned()
            .or_else(|| default_authority.clone());

        let (dev_name, alias, resolved) = match groups.get("devslashname") {
            Some(slash) => (
                slash.clone(),
                resolver.and_then(|r| r.device_alias(slash)),
                true,
            ),
            None => {
                let alias = groups.get("devalias")?.clone();
                match resolver.and_then(|r| r.full_device_name(&alias)) {
                    Some(full) => (full, Some(alias), true),
                    None => (alias.clone(), Some(alias), false),
                }
            }
        };

        Some(Self {
            scheme: scheme.to_string(),
            authority,
            dev_name,
            alias,
            resolved,
            had_scheme,
            default_authority,
        })
    }

    fn is_default_authority(&self, authority: &str) -> bool {
        self.default_authority
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case(authority))
    }

    /// Name forms of the device.
    ///
    /// An unresolved alias yields the alias for all three forms.
    pub fn names(&self) -> NameTriple {
        if !self.resolved {
            let alias = self.dev_name.clone();
            return NameTriple::new(alias.clone(), alias.clone(), alias);
        }
        let complete = match &self.authority {
            Some(a) => format!("{}:{}/{}", self.scheme, a, self.dev_name),
            None if self.had_scheme => format!("{}:{}", self.scheme, self.dev_name),
            None => self.dev_name.clone(),
        };
        let normal = match &self.authority {
            Some(a) if !self.is_default_authority(a) => format!("{}/{}", a, self.dev_name),
            _ => self.dev_name.clone(),
        };
        let short = self.alias.clone().unwrap_or_else(|| self.dev_name.clone());
        NameTriple::new(complete, normal, short)
    }
}

/// Parsed attribute name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeParts {
    /// Owning device.
    pub device: DeviceParts,
    /// Attribute name relative to the device.
    pub attr_name: String,
}

impl AttributeParts {
    /// Name forms: the device forms with `/attr` appended; short is `attr`.
    pub fn names(&self) -> NameTriple {
        let dev = self.device.names();
        let join = |d: Option<String>| d.map(|d| format!("{}/{}", d, self.attr_name));
        NameTriple {
            complete: join(dev.complete),
            normal: join(dev.normal),
            short: Some(self.attr_name.clone()),
        }
    }
}

/// Parsed configuration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationParts {
    /// Owning attribute.
    pub attribute: AttributeParts,
    /// Requested configuration key.
    pub key: Option<String>,
}

impl ConfigurationParts {
    fn suffix(&self) -> String {
        match &self.key {
            Some(k) => format!("?configuration={}", k),
            None => "?configuration".to_string(),
        }
    }

    /// Name forms: the attribute forms with `?configuration[=key]` appended.
    pub fn names(&self) -> NameTriple {
        let attr = self.attribute.names();
        let suffix = self.suffix();
        let add = |n: Option<String>| n.map(|n| format!("{}{}", n, suffix));
        NameTriple {
            complete: add(attr.complete),
            normal: add(attr.normal),
            short: add(attr.short),
        }
    }
}

// =============================================================================
// Validators
// =============================================================================

/// Authority names: `scheme://host:port`.
#[derive(Debug, Clone)]
pub struct AuthorityValidator {
    scheme: String,
    strict: bool,
    patterns: NamePatterns,
}

impl AuthorityValidator {
    /// Validator for `scheme`.
    pub fn new(scheme: &str, strict: bool) -> Result<Self> {
        let auth = authority_group();
        let patterns = NamePatterns::compile(
            &format!("^{}:{}$", scheme_group(scheme), auth),
            &format!("^{}$", auth),
            &format!("^{}$", HOST_PORT),
            None,
        )?;
        Ok(Self {
            scheme: scheme.to_lowercase(),
            strict,
            patterns,
        })
    }

    /// Parse an authority name.
    pub fn parts(&self, name: &str) -> Option<AuthorityParts> {
        let groups = self.uri_groups(name)?;
        Some(AuthorityParts {
            scheme: self.scheme.clone(),
            host: groups.get("host")?.clone(),
            port: groups.get("port")?.clone(),
        })
    }
}

impl NameValidator for AuthorityValidator {
    fn element_type(&self) -> ElementType {
        ElementType::Authority
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn patterns(&self) -> &NamePatterns {
        &self.patterns
    }

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn get_names(&self, name: &str, _resolver: Option<&dyn NameResolver>) -> Option<NameTriple> {
        self.parts(name).map(|p| p.names())
    }
}

/// Device names: `scheme:[//host:port/]domain/family/member` or an alias.
#[derive(Debug, Clone)]
pub struct DeviceValidator {
    scheme: String,
    strict: bool,
    patterns: NamePatterns,
}

impl DeviceValidator {
    /// Validator for `scheme`.
    pub fn new(scheme: &str, strict: bool) -> Result<Self> {
        let patterns = path_patterns(scheme, DEV_PATH)?;
        Ok(Self {
            scheme: scheme.to_lowercase(),
            strict,
            patterns,
        })
    }

    /// Parse a device name, resolving aliases through `resolver`.
    pub fn parts(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<DeviceParts> {
        let groups = self.uri_groups(name)?;
        DeviceParts::from_groups(&self.scheme, &groups, had_scheme(name), resolver)
    }
}

impl NameValidator for DeviceValidator {
    fn element_type(&self) -> ElementType {
        ElementType::Device
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn patterns(&self) -> &NamePatterns {
        &self.patterns
    }

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn get_names(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<NameTriple> {
        self.parts(name, resolver).map(|p| p.names())
    }
}

/// Attribute names: a device name followed by `/attribute`.
#[derive(Debug, Clone)]
pub struct AttributeValidator {
    scheme: String,
    strict: bool,
    patterns: NamePatterns,
}

impl AttributeValidator {
    /// Validator for `scheme`.
    pub fn new(scheme: &str, strict: bool) -> Result<Self> {
        let path = format!("{}/{}", DEV_PATH, ATTR_NAME);
        let patterns = path_patterns_with_short(scheme, &path, ATTR_NAME)?;
        Ok(Self {
            scheme: scheme.to_lowercase(),
            strict,
            patterns,
        })
    }

    /// Parse an attribute name.
    pub fn parts(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<AttributeParts> {
        let groups = self.uri_groups(name)?;
        attribute_parts(&self.scheme, &groups, had_scheme(name), resolver)
    }
}

impl NameValidator for AttributeValidator {
    fn element_type(&self) -> ElementType {
        ElementType::Attribute
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn patterns(&self) -> &NamePatterns {
        &self.patterns
    }

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn get_names(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<NameTriple> {
        self.parts(name, resolver).map(|p| p.names())
    }
}

/// Configuration names: an attribute name followed by
/// `?configuration[=key]` or `#key`.
#[derive(Debug, Clone)]
pub struct ConfigurationValidator {
    scheme: String,
    strict: bool,
    patterns: NamePatterns,
}

impl ConfigurationValidator {
    /// Validator for `scheme`.
    pub fn new(scheme: &str, strict: bool) -> Result<Self> {
        let path = format!("{}/{}{}", DEV_PATH, ATTR_NAME, CFG_SUFFIX);
        let short = format!("{}{}", ATTR_NAME, CFG_SUFFIX);
        let patterns = path_patterns_with_short(scheme, &path, &short)?;
        Ok(Self {
            scheme: scheme.to_lowercase(),
            strict,
            patterns,
        })
    }

    /// Parse a configuration name.
    pub fn parts(
        &self,
        name: &str,
        resolver: Option<&dyn NameResolver>,
    ) -> Option<ConfigurationParts> {
        let groups = self.uri_groups(name)?;
        let attribute = attribute_parts(&self.scheme, &groups, had_scheme(name), resolver)?;
        let key = groups
            .get("cfgkey")
            .or_else(|| groups.get("fragment"))
            .filter(|k| !k.is_empty())
            .cloned();
        Some(ConfigurationParts { attribute, key })
    }
}

impl NameValidator for ConfigurationValidator {
    fn element_type(&self) -> ElementType {
        ElementType::Configuration
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn patterns(&self) -> &NamePatterns {
        &self.patterns
    }

    fn is_strict(&self) -> bool {
        self.strict
    }

    fn get_names(&self, name: &str, resolver: Option<&dyn NameResolver>) -> Option<NameTriple> {
        self.parts(name, resolver).map(|p| p.names())
    }
}

fn path_patterns(scheme: &str, path: &str) -> Result<NamePatterns> {
    path_patterns_with_short(scheme, path, path)
}

fn path_patterns_with_short(scheme: &str, path: &str, short: &str) -> Result<NamePatterns> {
    let sch = scheme_group(scheme);
    let auth = authority_group();
    NamePatterns::compile(
        &format!("^{}:(?:{}/)?{}$", sch, auth, path),
        &format!("^(?:{}/)?{}$", auth, path),
        &format!("^{}$", short),
        Some(&format!("^{}://{}$", sch, path)),
    )
}

fn attribute_parts(
    scheme: &str,
    groups: &UriGroups,
    had_scheme: bool,
    resolver: Option<&dyn NameResolver>,
) -> Option<AttributeParts> {
    let device = DeviceParts::from_groups(scheme, groups, had_scheme, resolver)?;
    Some(AttributeParts {
        device,
        attr_name: groups.get("shortattrname")?.clone(),
    })
}

// =============================================================================
// Family
// =============================================================================

/// All slashed-grammar validators of one scheme.
#[derive(Debug, Clone)]
pub struct SlashedValidators {
    /// Authority validator.
    pub authority: AuthorityValidator,
    /// Device validator.
    pub device: DeviceValidator,
    /// Attribute validator.
    pub attribute: AttributeValidator,
    /// Configuration validator.
    pub configuration: ConfigurationValidator,
}

impl SlashedValidators {
    /// Build the family for `scheme`.
    pub fn new(scheme: &str, strict: bool) -> Result<Self> {
        Ok(Self {
            authority: AuthorityValidator::new(scheme, strict)?,
            device: DeviceValidator::new(scheme, strict)?,
            attribute: AttributeValidator::new(scheme, strict)?,
            configuration: ConfigurationValidator::new(scheme, strict)?,
        })
    }

    /// Validator for an element kind.
    pub fn for_type(&self, kind: ElementType) -> Option<&dyn NameValidator> {
        match kind {
            ElementType::Authority => Some(&self.authority),
            ElementType::Device => Some(&self.device),
            ElementType::Attribute => Some(&self.attribute),
            ElementType::Configuration => Some(&self.configuration),
            _ => None,
        }
    }

    /// Validators in lookup order: most specific grammar first.
    pub fn in_lookup_order(&self) -> [&dyn NameValidator; 4] {
        [
            &self.configuration,
            &self.attribute,
            &self.device,
            &self.authority,
        ]
    }

    /// Every element kind whose validator accepts `name`.
    pub fn valid_types(&self, name: &str) -> Vec<ElementType> {
        self.in_lookup_order()
            .into_iter()
            .filter(|v| v.accepts(name))
            .map(|v| v.element_type())
            .collect()
    }

    /// First element kind, in lookup order, accepting `name`.
    pub fn find_element_type(&self, name: &str) -> Option<ElementType> {
        self.in_lookup_order()
            .into_iter()
            .find(|v| v.accepts(name))
            .map(|v| v.element_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basetypes::MatchLevel;

    struct Db;

    impl NameResolver for Db {
        fn default_authority(&self) -> Option<String> {
            Some("//foo:123".to_string())
        }

        fn full_device_name(&self, alias: &str) -> Option<String> {
            (alias == "bar").then(|| "a/b/c".to_string())
        }

        fn device_alias(&self, device: &str) -> Option<String> {
            (device == "a/b/c").then(|| "bar".to_string())
        }
    }

    fn tango() -> SlashedValidators {
        SlashedValidators::new("tango", true).unwrap()
    }

    #[test]
    fn attribute_names_without_resolver() {
        let v = tango();
        assert_eq!(
            v.attribute.get_names("a/b/c/d", None),
            Some(NameTriple::new("a/b/c/d", "a/b/c/d", "d"))
        );
    }

    #[test]
    fn authority_names() {
        let v = tango();
        assert_eq!(
            v.authority.get_names("tango://foo:123", None),
            Some(NameTriple::new("tango://foo:123", "//foo:123", "foo:123"))
        );
        assert!(v.authority.get_names("//foo", None).is_none());
    }

    #[test]
    fn device_names_with_resolver() {
        let v = tango();
        assert_eq!(
            v.device.get_names("a/b/c", Some(&Db)),
            Some(NameTriple::new("tango://foo:123/a/b/c", "a/b/c", "bar"))
        );
        assert_eq!(
            v.device.get_names("bar", Some(&Db)),
            Some(NameTriple::new("tango://foo:123/a/b/c", "a/b/c", "bar"))
        );
        assert_eq!(
            v.device.get_names("//other:1/a/b/c", Some(&Db)),
            Some(NameTriple::new("tango://other:1/a/b/c", "//other:1/a/b/c", "bar"))
        );
    }

    #[test]
    fn bare_alias_degenerates_without_resolver() {
        let v = tango();
        assert_eq!(
            v.device.get_names("bar", None),
            Some(NameTriple::new("bar", "bar", "bar"))
        );
    }

    #[test]
    fn explicit_scheme_is_kept_without_authority() {
        let v = tango();
        assert_eq!(
            v.device.get_names("tango:a/b/c", None),
            Some(NameTriple::new("tango:a/b/c", "a/b/c", "a/b/c"))
        );
    }

    #[test]
    fn configuration_names() {
        let v = tango();
        let expected = NameTriple::new(
            "tango://foo:123/a/b/c/d?configuration=label",
            "a/b/c/d?configuration=label",
            "d?configuration=label",
        );
        assert_eq!(v.configuration.get_names("a/b/c/d#label", Some(&Db)), Some(expected.clone()));
        assert_eq!(
            v.configuration.get_names("a/b/c/d?configuration=label", Some(&Db)),
            Some(expected)
        );
        let parts = v.configuration.parts("a/b/c/d?configuration", None).unwrap();
        assert!(parts.key.is_none());
    }

    #[test]
    fn complete_names_normalize_to_valid_normal_names() {
        let v = tango();
        let samples: [(&dyn NameValidator, &str); 5] = [
            (&v.authority, "tango://foo:123"),
            (&v.device, "tango://foo:123/a/b/c"),
            (&v.device, "tango:bar"),
            (&v.attribute, "tango://other:1/a/b/c/d"),
            (&v.configuration, "tango:a/b/c/d?configuration=unit"),
        ];
        for (validator, name) in samples {
            assert!(validator.is_valid(name, MatchLevel::Complete), "{}", name);
            for resolver in [None, Some(&Db as &dyn NameResolver)] {
                let names = validator.get_names(name, resolver).unwrap();
                let normal = names.normal.unwrap();
                assert!(validator.is_valid(&normal, MatchLevel::Normal), "{}", normal);
            }
        }
    }

    #[test]
    fn match_levels() {
        let v = tango();
        assert!(v.attribute.is_valid("d", MatchLevel::Short));
        assert!(!v.attribute.is_valid("d", MatchLevel::Normal));
        assert!(v.attribute.is_valid("d", MatchLevel::ShortNormal));
        assert!(v.attribute.is_valid("a/b/c/d", MatchLevel::NormalComplete));
        assert!(!v.attribute.is_valid("a/b/c/d", MatchLevel::Complete));
        assert!(v.attribute.is_valid("tango:a/b/c/d", MatchLevel::Any));
    }

    #[test]
    fn lookup_order_prefers_most_specific() {
        let v = tango();
        assert_eq!(
            v.find_element_type("a/b/c/d?configuration"),
            Some(ElementType::Configuration)
        );
        assert_eq!(v.find_element_type("a/b/c/d"), Some(ElementType::Attribute));
        assert_eq!(v.find_element_type("a/b/c"), Some(ElementType::Device));
        assert_eq!(v.find_element_type("//foo:123"), Some(ElementType::Authority));
        assert_eq!(v.find_element_type("eval:1+1"), None);
        assert_eq!(v.valid_types("a/b/c"), vec![ElementType::Device]);
    }

    #[test]
    fn non_strict_names_only_when_lenient() {
        let strict = tango();
        let lenient = SlashedValidators::new("tango", false).unwrap();
        assert!(!strict.device.accepts("tango://a/b/c"));
        assert!(lenient.device.accepts("tango://a/b/c"));
        assert_eq!(
            lenient.device.get_names("tango://a/b/c", Some(&Db)),
            Some(NameTriple::new("tango://foo:123/a/b/c", "a/b/c", "bar"))
        );
    }

    #[test]
    fn scheme_mismatch_is_rejected() {
        let v = tango();
        assert!(!v.device.accepts("sim:a/b/c"));
        assert!(v.device.accepts("TANGO:a/b/c"));
    }
}
