//! Scheme prefix helpers for model names.

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static SCHEME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*):").expect("scheme pattern compiles")
});

/// Scheme of a model name.
///
/// Returns the explicit `scheme:` prefix if present. Otherwise returns
/// `default` when `implicit` is set, or `None`.
pub fn scheme_from_name(name: &str, implicit: bool, default: &str) -> Option<String> {
    match SCHEME_RE.captures(name) {
        Some(caps) => caps.name("scheme").map(|m| m.as_str().to_lowercase()),
        None if implicit => Some(default.to_lowercase()),
        None => None,
    }
}

/// Prefix `name` with `default:` unless it already carries a scheme.
pub fn make_scheme_explicit(name: &str, default: &str) -> String {
    if SCHEME_RE.is_match(name) {
        name.to_string()
    } else {
        format!("{}:{}", default, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_scheme_is_detected() {
        assert_eq!(scheme_from_name("Tango://h:1/a/b/c", false, "sim"), Some("tango".into()));
        assert_eq!(scheme_from_name("a/b/c", false, "sim"), None);
        assert_eq!(scheme_from_name("a/b/c", true, "sim"), Some("sim".into()));
    }

    #[test]
    fn make_explicit_only_when_missing() {
        assert_eq!(make_scheme_explicit("a/b/c", "sim"), "sim:a/b/c");
        assert_eq!(make_scheme_explicit("//h:1/a/b/c", "sim"), "sim://h:1/a/b/c");
        assert_eq!(make_scheme_explicit("eval:1+2", "sim"), "eval:1+2");
    }
}
