//! Command-line fingerprint cache (spec.md §4.2).
//!
//! Maps an absolute source path to the exact command string last used to
//! compile it. A changed compile command (flags, output layout, anything)
//! forces a recompile even if every timestamp says the unit is clean —
//! this is what makes Testable Property 4 hold.

use crate::error::{MymakeError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Separator between path and command in the on-disk format. Chosen to be
/// illegal in Windows paths; accepted on POSIX on the basis that no real
/// build path uses a bare colon.
const SEP: char = ':';

#[derive(Default)]
pub struct CommandCache {
    entries: Mutex<BTreeMap<PathBuf, String>>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the path has no entry yet (first compile is allowed) or
    /// the stored command exactly equals `command`.
    pub fn check(&self, path: &Path, command: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(existing) => existing == command,
            None => true,
        }
    }

    pub fn set(&self, path: impl Into<PathBuf>, command: impl Into<String>) {
        self.entries.lock().unwrap().insert(path.into(), command.into());
    }

    /// Merges a persisted cache into the in-memory one — a later-loaded
    /// entry for a given path replaces an earlier one — so that multiple
    /// targets sharing one `CommandCache` can each load their own on-disk
    /// cache without clobbering what another target already loaded.
    pub fn load(&self, cache_file: &Path) -> Result<()> {
        let content = match fs::read_to_string(cache_file) {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let mut entries = self.entries.lock().unwrap();
        for line in content.lines() {
            if let Some((path, command)) = line.split_once(SEP) {
                entries.insert(PathBuf::from(path), command.to_string());
            }
        }
        Ok(())
    }

    pub fn save(&self, cache_file: &Path) -> Result<()> {
        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent).map_err(|e| MymakeError::io(e, parent))?;
        }
        let entries = self.entries.lock().unwrap();
        // already sorted: `entries` is a BTreeMap, so iteration is stable
        // and diff-friendly without a separate sort pass.
        let mut out = fs::File::create(cache_file).map_err(|e| MymakeError::io(e, cache_file))?;
        for (path, command) in entries.iter() {
            writeln!(out, "{}{}{}", path.display(), SEP, command)
                .map_err(|e| MymakeError::io(e, cache_file))?;
        }
        Ok(())
    }
}
