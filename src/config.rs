//! The configuration bridge (spec.md §4.8 / §6).
//!
//! The sectioned `[tag1,tag2,!tag3]` file format and the command-line tag
//! collection that produce a merged key/value map are external
//! collaborators per spec.md §1 — out of scope here. What the orchestrator
//! actually consumes is this narrow contract: string/array/bool lookups
//! with defaults, and template expansion. `Config` implements exactly that,
//! over data that's already been merged by whatever loader the caller
//! plugs in.

use std::collections::BTreeMap;

/// A merged key → value(s) map, as produced by an external config loader.
///
/// Every key maps to an ordered list of strings; `getStr` takes the last
/// one (consistent with "last declaration wins" used elsewhere, e.g. the
/// compile-variant priority in spec.md §4.4), `getArray` returns the whole
/// list, and `getBool` parses the last one.
#[derive(Clone, Debug, Default)]
pub struct Config {
    entries: BTreeMap<String, Vec<String>>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `Config` from already-merged key/value(s) pairs, as an
    /// external loader would hand off after resolving sections and tags.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: IntoIterator<Item = String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            map.insert(k.into(), v.into_iter().collect());
        }
        Self { entries: map }
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), vec![value.into()]);
        self
    }

    pub fn set_array(&mut self, key: impl Into<String>, values: Vec<String>) -> &mut Self {
        self.entries.insert(key.into(), values);
        self
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Overlays `other`'s entries on top of `self` (used when a sub-target
    /// inherits a project's top-level config and specializes it).
    pub fn merged_with(&self, other: &Config) -> Config {
        let mut merged = self.entries.clone();
        for (k, v) in &other.entries {
            merged.insert(k.clone(), v.clone());
        }
        Config { entries: merged }
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.entries.get(key).and_then(|v| v.last()).map(|s| s.as_str()).unwrap_or(default)
    }

    pub fn get_array(&self, key: &str, default: &[&str]) -> Vec<String> {
        self.entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.entries
            .get(key)
            .and_then(|v| v.last())
            .map(|s| matches!(s.as_str(), "yes" | "true" | "1" | "on"))
            .unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Replaces each `<name>` occurrence in `template` with the first match
    /// from `extra`, then `self`, then the empty string. Arrays join with a
    /// single space.
    pub fn expand_vars(&self, template: &str, extra: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(template.len());
        let bytes = template.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'<' {
                if let Some(end) = template[i..].find('>') {
                    let name = &template[i + 1..i + end];
                    if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        out.push_str(&self.resolve_var(name, extra));
                        i += end + 1;
                        continue;
                    }
                }
            }
            // push one char (handles multi-byte UTF-8 safely)
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
        out
    }

    fn resolve_var(&self, name: &str, extra: &BTreeMap<String, String>) -> String {
        if let Some(v) = extra.get(name) {
            return v.clone();
        }
        if let Some(values) = self.entries.get(name) {
            return values.join(" ");
        }
        String::new()
    }
}
