//! The `res` scheme: named indirections to other model names.
//!
//! A name such as `res:beam_current` is looked up in a set of resource
//! maps and replaced by the model name stored under its key. Maps are
//! loaded with a priority (1 is the highest); a key is searched in
//! ascending priority order and, within one priority, in load order.
//!
//! Maps come from the `[resources]` configuration section or are loaded at
//! runtime from memory or from TOML files whose top-level string keys form
//! the map.
//!
//! ```toml
//! [resources.values]
//! beam_current = "sim:a/b/c/voltage"
//! ```

use crate::config::ResourcesConfig;
use crate::error::{Result, TaurusError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Schemes resolved through resource maps; the first one is canonical.
pub const RES_SCHEMES: &[&str] = &["res", "resource"];

/// Priority of maps loaded without an explicit one.
pub const DFT_RESOURCE_PRIORITY: u32 = 10;

/// Longest chain of `res:` names followed before giving up.
pub const MAX_RESOURCE_DEPTH: usize = 8;

static RES_NAME: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(?i:res|resource):(?P<key>[A-Za-z_][A-Za-z0-9_]*)$").ok()
});

/// Key of a `res:<key>` name, `None` for names of other schemes.
pub fn resource_key(name: &str) -> Option<&str> {
    RES_NAME
        .as_ref()?
        .captures(name)
        .and_then(|c| c.name("key"))
        .map(|m| m.as_str())
}

/// Whether `scheme` is resolved through resource maps.
pub fn is_resource_scheme(scheme: &str) -> bool {
    RES_SCHEMES.iter().any(|s| s.eq_ignore_ascii_case(scheme))
}

#[derive(Default)]
struct ResourceMaps {
    maps: HashMap<String, BTreeMap<String, String>>,
    // priority -> map names in load order
    priorities: BTreeMap<u32, Vec<String>>,
}

/// Prioritized resource maps.
#[derive(Default)]
pub struct ResourceTable {
    inner: RwLock<ResourceMaps>,
}

impl ResourceTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the configured values and files.
    ///
    /// Inline values get priority 1. Files follow in listed order, starting
    /// at [`DFT_RESOURCE_PRIORITY`].
    pub fn from_config(config: &ResourcesConfig) -> Result<Self> {
        let table = Self::new();
        if !config.values.is_empty() {
            table.load(Some("config"), config.values.clone(), 1)?;
        }
        for (path, priority) in config.files.iter().zip(DFT_RESOURCE_PRIORITY..) {
            table.load_file(path, priority)?;
        }
        Ok(table)
    }

    /// Load `map` with `priority`, replacing a map loaded under the same
    /// name. Unnamed maps are called `DICT<priority>`.
    pub fn load(
        &self,
        name: Option<&str>,
        map: BTreeMap<String, String>,
        priority: u32,
    ) -> Result<()> {
        if priority < 1 {
            return Err(TaurusError::Configuration(
                "resource priority must be at least 1".into(),
            ));
        }
        let name = name.map_or_else(|| format!("DICT{:02}", priority), str::to_string);
        let mut inner = self.inner.write();
        inner.maps.insert(name.clone(), map);
        let names = inner.priorities.entry(priority).or_default();
        if !names.contains(&name) {
            names.push(name.clone());
        }
        tracing::debug!(resource = %name, priority, "Resource loaded");
        Ok(())
    }

    /// Load the string keys at the top level of the TOML file `path`.
    pub fn load_file<P: AsRef<Path>>(&self, path: P, priority: u32) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let table: toml::Table = toml::from_str(&text).map_err(|e| {
            TaurusError::Configuration(format!("resource file {}: {}", path.display(), e))
        })?;
        let map = table
            .into_iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .filter_map(|(k, v)| match v {
                toml::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();
        tracing::info!(path = %path.display(), "(Re)loading resource file");
        self.load(Some(&path.display().to_string()), map, priority)
    }

    /// Value stored under `key` in the highest-priority map holding it.
    pub fn value(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        inner
            .priorities
            .values()
            .flatten()
            .filter_map(|name| inner.maps.get(name))
            .find_map(|map| map.get(key).cloned())
    }

    /// Number of loaded maps.
    pub fn len(&self) -> usize {
        self.inner.read().maps.len()
    }

    /// Whether no map is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every map.
    pub fn clear(&self) {
        *self.inner.write() = ResourceMaps::default();
    }

    /// Follow `res:` indirections from `name` to a model name of another
    /// scheme. Names of other schemes are returned unchanged.
    pub fn resolve(&self, name: &str) -> Result<String> {
        let mut current = name.to_string();
        for _ in 0..MAX_RESOURCE_DEPTH {
            let Some(key) = resource_key(&current) else {
                if is_resource_scheme(current.split(':').next().unwrap_or_default()) {
                    return Err(TaurusError::invalid_name("resource", current));
                }
                return Ok(current);
            };
            current = self
                .value(key)
                .ok_or_else(|| TaurusError::invalid_name("resource", name))?;
        }
        Err(TaurusError::invalid_name("resource", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keys_parse_for_both_schemes() {
        assert_eq!(resource_key("res:attr_1"), Some("attr_1"));
        assert_eq!(resource_key("Resource:dev1"), Some("dev1"));
        assert_eq!(resource_key("res:1bad"), None);
        assert_eq!(resource_key("sim:a/b/c"), None);
    }

    #[test]
    fn lower_priority_number_wins() {
        let table = ResourceTable::new();
        table
            .load(None, map(&[("attr_1", "eval:1"), ("attr_3", "eval:3")]), 3)
            .unwrap();
        table.load(None, map(&[("attr_3", "eval:4")]), 2).unwrap();
        assert_eq!(table.value("attr_3").as_deref(), Some("eval:4"));
        assert_eq!(table.value("attr_1").as_deref(), Some("eval:1"));
        assert_eq!(table.value("missing"), None);
    }

    #[test]
    fn unnamed_maps_of_one_priority_replace_each_other() {
        let table = ResourceTable::new();
        table.load(None, map(&[("attr_3", "eval:3")]), 5).unwrap();
        table.load(None, map(&[("attr_3", "eval:4")]), 5).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.value("attr_3").as_deref(), Some("eval:4"));
    }

    #[test]
    fn zero_priority_is_rejected() {
        let table = ResourceTable::new();
        assert!(table.load(None, BTreeMap::new(), 0).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn chains_resolve_and_cycles_fail() {
        let table = ResourceTable::new();
        table
            .load(
                None,
                map(&[
                    ("alias", "res:target"),
                    ("target", "sim:a/b/c/voltage"),
                    ("loop_a", "res:loop_b"),
                    ("loop_b", "res:loop_a"),
                ]),
                1,
            )
            .unwrap();
        assert_eq!(table.resolve("res:alias").unwrap(), "sim:a/b/c/voltage");
        assert_eq!(table.resolve("a/b/c").unwrap(), "a/b/c");
        assert!(table.resolve("res:loop_a").is_err());
        assert!(table.resolve("res:unknown").is_err());
        assert!(table.resolve("res:not a key").is_err());
    }

    #[test]
    fn files_keep_only_public_string_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        std::fs::write(
            &path,
            "dev1 = \"sim:a/b/c\"\n_hidden = \"sim:x/y/z\"\nperiod = 3\n",
        )
        .unwrap();
        let table = ResourceTable::new();
        table.load_file(&path, 1).unwrap();
        assert_eq!(table.value("dev1").as_deref(), Some("sim:a/b/c"));
        assert_eq!(table.value("_hidden"), None);
        assert_eq!(table.value("period"), None);
    }
}
