//! Value types at the bottom of the dependency graph: [`Path`], a
//! simplified, platform-aware path representation, [`FileInfo`], a
//! stat-style snapshot, and [`TimeCache`], a per-run memoization of
//! [`FileInfo`] by [`Path`].
//!
//! This is deliberately not `std::path::Path` wrapped: the orchestrator
//! needs equality and hashing to agree with the platform's case policy
//! (case-insensitive on Windows, case-sensitive elsewhere) and needs the
//! simplification rules spelled out (dropping `.`, collapsing `..`)
//! applied eagerly so two differently-spelled references to the same file
//! compare equal everywhere a `Path` is used as a map key.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path as StdPath, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microsecond timestamp from a platform-stable epoch. Comparison is total.
pub type Timestamp = i64;

fn to_timestamp(t: SystemTime) -> Timestamp {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as Timestamp,
        // Pre-epoch mtimes: still order them, just below zero.
        Err(e) => -(e.duration().as_micros() as Timestamp),
    }
}

/// Whether the platform's filesystem compares paths case-insensitively.
/// Only Windows is treated as case-insensitive here, matching spec.md §3's
/// "case-insensitive on the OS that uses back-slashes" rule.
#[inline]
pub fn case_insensitive_platform() -> bool {
    cfg!(windows)
}

/// A simplified path: an ordered list of segments plus a directory flag.
///
/// Invariants (spec.md §3):
/// - empty segments are suppressed, except a single leading empty segment
///   meaning "POSIX-absolute".
/// - `.` segments are removed.
/// - `..` cancels a preceding non-`..` segment.
#[derive(Clone, Debug, Default)]
pub struct Path {
    segments: Vec<String>,
    is_directory: bool,
}

impl Path {
    /// Builds a simplified `Path` from any path-like input.
    pub fn new(path: impl AsRef<StdPath>, is_directory: bool) -> Self {
        let raw = path.as_ref();
        let absolute = is_posix_absolute(raw);
        let mut segments: Vec<String> = Vec::new();
        for part in raw_segments(raw) {
            match part.as_str() {
                "" | "." => continue,
                ".." => {
                    if segments.last().map(|s| s != "..").unwrap_or(false) {
                        segments.pop();
                    } else if !absolute {
                        segments.push("..".to_string());
                    }
                    // an absolute path's ".." at the root is simply dropped
                }
                seg => segments.push(seg.to_string()),
            }
        }
        if absolute {
            segments.insert(0, String::new());
        }
        Self { segments, is_directory }
    }

    pub fn from_std(path: &StdPath) -> Self {
        Self::new(path, path.to_string_lossy().ends_with(['/', '\\']))
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn with_directory(mut self, is_directory: bool) -> Self {
        self.is_directory = is_directory;
        self
    }

    pub fn is_absolute(&self) -> bool {
        self.segments.first().map(|s| s.is_empty()).unwrap_or(false)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Joins `other` onto `self`, treating `self` as a directory regardless
    /// of its stored flag (matching how `parent(F) + X` is used throughout
    /// §4.1/§4.3).
    pub fn join(&self, other: impl AsRef<StdPath>) -> Self {
        let other_ref = other.as_ref();
        if is_posix_absolute(other_ref) {
            return Self::new(other_ref, false);
        }
        let mut buf = self.to_path_buf();
        buf.push(other_ref);
        Self::from_std(&buf).with_directory(false)
    }

    /// The parent directory, or `self` if it has no segments left to pop.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        if segments.len() > usize::from(self.is_absolute()) {
            segments.pop();
        }
        Self { segments, is_directory: true }
    }

    /// File/directory name (last segment), if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().filter(|s| !s.is_empty()).map(|s| s.as_str())
    }

    /// File stem (name without extension).
    pub fn file_stem(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => Some(name),
            Some(idx) => Some(&name[..idx]),
        }
    }

    /// Extension, without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Returns a copy with the extension replaced (or added).
    pub fn with_extension(&self, ext: &str) -> Self {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            let stem = match last.rfind('.') {
                Some(0) | None => last.clone(),
                Some(idx) => last[..idx].to_string(),
            };
            *last = if ext.is_empty() { stem } else { format!("{stem}.{ext}") };
        }
        Self { segments, is_directory: self.is_directory }
    }

    /// Returns the path relative to `base`, or `None` if `self` is not a
    /// descendant of `base` (used by §4.3's sibling-target detection).
    pub fn strip_prefix(&self, base: &Self) -> Option<Self> {
        if self.is_absolute() != base.is_absolute() {
            return None;
        }
        let base_segs = &base.segments;
        if self.segments.len() < base_segs.len() {
            return None;
        }
        let insensitive = case_insensitive_platform();
        for (a, b) in self.segments.iter().zip(base_segs.iter()) {
            if !segment_eq(a, b, insensitive) {
                return None;
            }
        }
        Some(Self {
            segments: self.segments[base_segs.len()..].to_vec(),
            is_directory: self.is_directory,
        })
    }

    pub fn is_descendant_of(&self, base: &Self) -> bool {
        self.strip_prefix(base).is_some()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        let mut s = String::new();
        let abs = self.is_absolute();
        let parts: Vec<&str> =
            self.segments.iter().map(|s| s.as_str()).filter(|s| !s.is_empty()).collect();
        if abs {
            s.push('/');
        }
        s.push_str(&parts.join("/"));
        if parts.is_empty() && !abs {
            s.push('.');
        }
        PathBuf::from(s)
    }

    pub fn display(&self) -> String {
        self.to_path_buf().display().to_string()
    }
}

fn segment_eq(a: &str, b: &str, insensitive: bool) -> bool {
    if insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn is_posix_absolute(p: &StdPath) -> bool {
    let s = p.to_string_lossy();
    s.starts_with('/') || s.starts_with('\\')
}

fn raw_segments(p: &StdPath) -> Vec<String> {
    p.to_string_lossy().split(['/', '\\']).map(|s| s.to_string()).collect()
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        if self.is_directory != other.is_directory || self.segments.len() != other.segments.len()
        {
            return false;
        }
        let insensitive = case_insensitive_platform();
        self.segments.iter().zip(other.segments.iter()).all(|(a, b)| segment_eq(a, b, insensitive))
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_directory.hash(state);
        let insensitive = case_insensitive_platform();
        for seg in &self.segments {
            if insensitive {
                seg.to_ascii_lowercase().hash(state);
            } else {
                seg.hash(state);
            }
        }
        // sentinel to prevent ["ab", "c"] hashing the same as ["a", "bc"]
        0u8.hash(state);
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_path_buf().cmp(&other.to_path_buf())
    }
}
impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl From<&StdPath> for Path {
    fn from(p: &StdPath) -> Self {
        Self::from_std(p)
    }
}
impl From<PathBuf> for Path {
    fn from(p: PathBuf) -> Self {
        Self::from_std(&p)
    }
}

/// Stat-style snapshot of a path: existence plus modify/change times.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub exists: bool,
    pub m_time: Timestamp,
    pub c_time: Timestamp,
}

impl FileInfo {
    pub fn missing() -> Self {
        Self { exists: false, m_time: Timestamp::MIN, c_time: Timestamp::MIN }
    }

    pub fn stat(path: &StdPath) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let m_time = meta.modified().map(to_timestamp).unwrap_or(0);
                // Not all platforms expose a change time distinct from modify time;
                // `std::fs::Metadata` doesn't, so we treat them as equal here.
                let c_time = m_time;
                Self { exists: true, m_time, c_time }
            }
            Err(_) => Self::missing(),
        }
    }
}

/// Memoizes [`FileInfo`] per [`Path`] for the duration of a single build
/// run. Not thread-safe by design: spec.md §5 says "single-threaded per
/// Target; each Target owns its own."
#[derive(Debug, Default)]
pub struct TimeCache {
    entries: std::collections::HashMap<Path, FileInfo>,
}

impl TimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (possibly cached) [`FileInfo`] for `path`, stat'ing at
    /// most once per run.
    pub fn stat(&mut self, path: &Path) -> FileInfo {
        if let Some(info) = self.entries.get(path) {
            return *info;
        }
        let info = FileInfo::stat(&path.to_path_buf());
        self.entries.insert(path.clone(), info);
        info
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplifies_dot_and_dotdot() {
        let p = Path::new("a/./b/../c", false);
        assert_eq!(p.segments(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn absolute_marker_preserved() {
        let p = Path::new("/a/b", false);
        assert!(p.is_absolute());
        assert_eq!(p.segments(), &["".to_string(), "a".to_string(), "b".to_string()]);
    }

    #[test]
    fn dotdot_at_absolute_root_is_dropped() {
        let p = Path::new("/../a", false);
        assert_eq!(p.segments(), &["".to_string(), "a".to_string()]);
    }

    #[test]
    fn equality_respects_directory_flag() {
        let a = Path::new("a/b", false);
        let b = Path::new("a/b", true);
        assert_ne!(a, b);
    }

    #[test]
    fn strip_prefix_detects_siblings() {
        let wd = Path::new("/proj/app", true);
        let sibling = Path::new("/proj/lib/api.h", false);
        assert!(sibling.strip_prefix(&wd).is_none());
        let child = Path::new("/proj/app/src/a.cpp", false);
        let rel = child.strip_prefix(&wd).unwrap();
        assert_eq!(rel.segments(), &["src".to_string(), "a.cpp".to_string()]);
    }

    #[test]
    fn with_extension_swaps_suffix() {
        let p = Path::new("build/a.cpp", false);
        assert_eq!(p.with_extension("o").to_path_buf(), PathBuf::from("build/a.o"));
    }
}
