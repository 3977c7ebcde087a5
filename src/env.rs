//! Environment-variable directive merging (spec.md §4.6).
//!
//! Builds an immutable, key-ordered snapshot by merging the current
//! process environment with `env` directives from config: `NAME=value`
//! (replace), `NAME<=value` (prepend), `NAME=>value` (append). The
//! separator used for prepend/append is `;` on Windows, `:` elsewhere.

use cfg_if::cfg_if;
use std::collections::BTreeMap;

#[inline]
pub fn path_separator() -> char {
    cfg_if! {
        if #[cfg(windows)] {
            ';'
        } else {
            ':'
        }
    }
}

/// One parsed `env` directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvDirective {
    Replace(String, String),
    Prepend(String, String),
    Append(String, String),
}

impl EnvDirective {
    pub fn parse(directive: &str) -> Option<Self> {
        if let Some((name, value)) = directive.split_once("<=") {
            return Some(Self::Prepend(name.to_string(), value.to_string()));
        }
        if let Some((name, value)) = directive.split_once("=>") {
            return Some(Self::Append(name.to_string(), value.to_string()));
        }
        if let Some((name, value)) = directive.split_once('=') {
            return Some(Self::Replace(name.to_string(), value.to_string()));
        }
        None
    }
}

/// Builds the environment snapshot a child process inherits: the current
/// process environment, overlaid with the given directives in order.
pub fn build_env(directives: &[String]) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    let sep = path_separator();

    for raw in directives {
        let Some(directive) = EnvDirective::parse(raw) else {
            tracing::warn!(directive = raw, "malformed env directive, ignoring");
            continue;
        };
        match directive {
            EnvDirective::Replace(name, value) => {
                env.insert(name, value);
            }
            EnvDirective::Prepend(name, value) => {
                let entry = env.entry(name).or_default();
                *entry = if entry.is_empty() { value } else { format!("{value}{sep}{entry}") };
            }
            EnvDirective::Append(name, value) => {
                let entry = env.entry(name).or_default();
                *entry = if entry.is_empty() { value } else { format!("{entry}{sep}{value}") };
            }
        }
    }
    env
}
