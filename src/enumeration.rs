//! Runtime enumerations.
//!
//! An [`Enumeration`] is an immutable bijection between symbolic names and
//! integer values, built once at construction. It is the runtime counterpart
//! of the closed sets in [`crate::basetypes`] and is used where the set of
//! symbols is only known at runtime (e.g. enumerated attribute labels).
//!
//! # Example
//! ```
//! use taurus_core::enumeration::Enumeration;
//!
//! let e = Enumeration::new("E", ["ON", "OFF"]).unwrap();
//! assert_eq!(e["ON"], 0);
//! assert_eq!(e.get("OFF"), Some(1));
//! assert_eq!(e.whatis(0), Some("ON"));
//! ```

use crate::error::{Result, TaurusError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Index;

/// One construction item: a bare name or a name with an explicit value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumItem {
    /// Value assigned automatically.
    Auto(String),
    /// Value given explicitly.
    Valued(String, i64),
}

impl EnumItem {
    fn name(&self) -> &str {
        match self {
            EnumItem::Auto(name) | EnumItem::Valued(name, _) => name,
        }
    }
}

impl From<&str> for EnumItem {
    fn from(name: &str) -> Self {
        EnumItem::Auto(name.to_string())
    }
}

impl From<String> for EnumItem {
    fn from(name: String) -> Self {
        EnumItem::Auto(name)
    }
}

impl From<(&str, i64)> for EnumItem {
    fn from((name, value): (&str, i64)) -> Self {
        EnumItem::Valued(name.to_string(), value)
    }
}

impl From<(String, i64)> for EnumItem {
    fn from((name, value): (String, i64)) -> Self {
        EnumItem::Valued(name, value)
    }
}

/// Immutable name/value enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    name: String,
    flaggable: bool,
    by_name: HashMap<String, i64>,
    by_value: BTreeMap<i64, String>,
    order: Vec<String>,
}

impl Enumeration {
    /// Build an enumeration with automatically assigned values.
    pub fn new<I, S>(name: &str, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_items(name, names.into_iter().map(|n| EnumItem::Auto(n.into())), false)
    }

    /// Build an enumeration from a mix of bare and explicitly valued items.
    ///
    /// Explicit values are reserved first; automatic values then take the
    /// lowest unused non-negative integer, or the lowest unused power of two
    /// when `flaggable` is set.
    pub fn with_items<I, T>(name: &str, items: I, flaggable: bool) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<EnumItem>,
    {
        let items: Vec<EnumItem> = items.into_iter().map(Into::into).collect();

        let mut names = HashSet::new();
        let mut used = HashSet::new();
        for item in &items {
            if !names.insert(item.name().to_string()) {
                return Err(TaurusError::Enumeration(format!(
                    "duplicate name '{}' in {}",
                    item.name(),
                    name
                )));
            }
            if let EnumItem::Valued(item_name, value) = item {
                if *value < 0 {
                    return Err(TaurusError::Enumeration(format!(
                        "negative value {} for '{}' in {}",
                        value, item_name, name
                    )));
                }
                if flaggable && !is_power_of_two(*value) {
                    return Err(TaurusError::Enumeration(format!(
                        "value {} for '{}' in flaggable {} is not a power of two",
                        value, item_name, name
                    )));
                }
                if !used.insert(*value) {
                    return Err(TaurusError::Enumeration(format!(
                        "duplicate value {} in {}",
                        value, name
                    )));
                }
            }
        }

        let mut by_name = HashMap::with_capacity(items.len());
        let mut by_value = BTreeMap::new();
        let mut order = Vec::with_capacity(items.len());
        for item in items {
            let (item_name, value) = match item {
                EnumItem::Valued(n, v) => (n, v),
                EnumItem::Auto(n) => {
                    let v = next_free(&used, flaggable).ok_or_else(|| {
                        TaurusError::Enumeration(format!("no free value left in {}", name))
                    })?;
                    used.insert(v);
                    (n, v)
                }
            };
            by_name.insert(item_name.clone(), value);
            by_value.insert(value, item_name.clone());
            order.push(item_name);
        }

        Ok(Self {
            name: name.to_string(),
            flaggable,
            by_name,
            by_value,
            order,
        })
    }

    /// Enumeration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether automatic values were assigned as powers of two.
    pub fn is_flaggable(&self) -> bool {
        self.flaggable
    }

    /// Value of a symbol.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    /// Symbol of a value.
    pub fn whatis(&self, value: i64) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    /// Whether `name` is one of the symbols.
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Whether `value` is one of the values.
    pub fn contains_value(&self, value: i64) -> bool {
        self.by_value.contains_key(&value)
    }

    /// Symbols in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Values in ascending order.
    pub fn values(&self) -> Vec<i64> {
        self.by_value.keys().copied().collect()
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the enumeration is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.order
            .iter()
            .filter_map(|n| self.by_name.get(n).map(|v| (n.as_str(), *v)))
    }
}

impl Index<&str> for Enumeration {
    type Output = i64;

    #[allow(clippy::panic)]
    fn index(&self, name: &str) -> &i64 {
        match self.by_name.get(name) {
            Some(value) => value,
            None => panic!("'{}' is not a member of enumeration {}", name, self.name),
        }
    }
}

impl fmt::Display for Enumeration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Enumeration({}, [", self.name)?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "])")
    }
}

fn is_power_of_two(value: i64) -> bool {
    value > 0 && (value & (value - 1)) == 0
}

fn next_free(used: &HashSet<i64>, flaggable: bool) -> Option<i64> {
    if flaggable {
        (0..63).map(|shift| 1i64 << shift).find(|v| !used.contains(v))
    } else {
        (0..i64::MAX).find(|v| !used.contains(v))
    }
}
