//! Minimal wildcard matcher.
//!
//! spec.md §1 lists the ignore-pattern matcher as an external collaborator;
//! this is a small stand-in good enough to drive `ignore`/`compile`
//! wildcard matching in tests and a default build, supporting `*` (any
//! run of characters, including none) and `?` (exactly one character).
//! Nothing fancier (character classes, `**`) is attempted — a real build
//! driver would plug in a proper glob crate here.

#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, text: &str) -> bool {
        matches_glob(self.raw.as_bytes(), text.as_bytes())
    }
}

fn matches_glob(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            matches_glob(&pattern[1..], text)
                || (!text.is_empty() && matches_glob(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => matches_glob(&pattern[1..], &text[1..]),
        (Some(&p), Some(&t)) if p == t => matches_glob(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        assert!(Pattern::new("*.gen.h").matches("foo.gen.h"));
        assert!(!Pattern::new("*.gen.h").matches("foo.h"));
    }

    #[test]
    fn question_matches_one_char() {
        assert!(Pattern::new("a?c").matches("abc"));
        assert!(!Pattern::new("a?c").matches("ac"));
    }

    #[test]
    fn exact_match_without_wildcards() {
        assert!(Pattern::new("main.cpp").matches("main.cpp"));
        assert!(!Pattern::new("main.cpp").matches("main2.cpp"));
    }
}
