//! The include scanner (spec.md §4.1).
//!
//! Produces, for any source file, the transitive set of locally-included
//! files (the "include closure") and persists a per-file cache across
//! runs so unchanged files aren't re-read. Textual only: comments, `#if`
//! and line continuations are not understood, and angle-bracketed
//! includes are ignored by design. See spec.md §9's "textual include
//! scanning" note — this is a documented simplification, not a bug.

use crate::error::{MymakeError, Result};
use crate::path::Path;
use crate::wildcard::Pattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*#\s*include\s+"([^"]+)"\s*$"#).unwrap());

/// One cached entry: direct includes and metadata for a single file.
#[derive(Clone, Debug)]
pub struct IncludeRecord {
    pub file: Path,
    pub last_modified: crate::path::Timestamp,
    pub first_include: String,
    pub includes: HashSet<Path>,
    pub ignored: bool,
    pub valid: bool,
}

impl IncludeRecord {
    fn empty(file: Path) -> Self {
        Self {
            file,
            last_modified: 0,
            first_include: String::new(),
            includes: HashSet::new(),
            ignored: false,
            valid: false,
        }
    }
}

/// Result of [`IncludeScanner::info`]: the transitive include closure of a
/// file plus the bits callers need (pch ordering, ignore propagation).
#[derive(Clone, Debug, Default)]
pub struct IncludeInfo {
    pub file: Path,
    pub first_include: String,
    pub includes: HashSet<Path>,
    pub ignored: bool,
}

pub struct IncludeScanner {
    include_paths: Vec<Path>,
    ignore_patterns: Vec<Pattern>,
    cache: Mutex<std::collections::HashMap<Path, IncludeRecord>>,
}

impl IncludeScanner {
    pub fn new(include_paths: Vec<Path>) -> Self {
        Self { include_paths, ignore_patterns: Vec::new(), cache: Mutex::new(Default::default()) }
    }

    pub fn ignore(&mut self, patterns: impl IntoIterator<Item = String>) {
        self.ignore_patterns = patterns.into_iter().map(Pattern::new).collect();
    }

    pub fn is_ignored(&self, file: &Path) -> bool {
        let name = file.display();
        self.ignore_patterns.iter().any(|p| p.matches(&name))
    }

    /// Returns the transitive include closure of `file`.
    pub fn info(&self, file: &Path) -> Result<IncludeInfo> {
        let mut visited: HashSet<Path> = HashSet::new();
        let mut queue: VecDeque<Path> = VecDeque::new();
        queue.push_back(file.clone());
        visited.insert(file.clone());

        let mut closure: HashSet<Path> = HashSet::new();
        let mut any_ignored = false;
        let mut first_include = String::new();
        let mut first = true;

        while let Some(node) = queue.pop_front() {
            let record = self.scan_file(&node)?;
            if first {
                first_include = record.first_include.clone();
                first = false;
            }
            if record.ignored {
                any_ignored = true;
                // don't descend into an ignored file's includes
                continue;
            }
            for inc in &record.includes {
                if visited.insert(inc.clone()) {
                    closure.insert(inc.clone());
                    queue.push_back(inc.clone());
                }
            }
        }

        Ok(IncludeInfo { file: file.clone(), first_include, includes: closure, ignored: any_ignored })
    }

    /// Scans (or returns the cached scan of) a single file's direct
    /// includes, without descending. Pure function of `file`'s contents and
    /// the configured include paths.
    fn scan_file(&self, file: &Path) -> Result<IncludeRecord> {
        let on_disk = crate::path::FileInfo::stat(&file.to_path_buf());

        {
            let cache = self.cache.lock().unwrap();
            if let Some(existing) = cache.get(file) {
                if on_disk.exists && existing.valid && on_disk.m_time <= existing.last_modified {
                    return Ok(existing.clone());
                }
            }
        }

        if self.is_ignored(file) {
            let record = IncludeRecord {
                file: file.clone(),
                last_modified: on_disk.m_time,
                first_include: String::new(),
                includes: HashSet::new(),
                ignored: true,
                valid: true,
            };
            self.cache.lock().unwrap().insert(file.clone(), record.clone());
            return Ok(record);
        }

        let record = match self.parse_file(file) {
            Ok(mut record) => {
                record.last_modified = on_disk.m_time;
                record.valid = true;
                record
            }
            Err(_) => IncludeRecord::empty(file.clone()),
        };

        self.cache.lock().unwrap().insert(file.clone(), record.clone());
        Ok(record)
    }

    fn parse_file(&self, file: &Path) -> Result<IncludeRecord> {
        let path_buf = file.to_path_buf();
        let f = fs::File::open(&path_buf).map_err(|e| MymakeError::io(e, &path_buf))?;
        let reader = BufReader::new(f);

        let mut first_include = String::new();
        let mut seen_first_line = false;
        let mut includes = HashSet::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| MymakeError::io(e, &path_buf))?;
            let trimmed = line.trim_start();

            if !seen_first_line && !trimmed.is_empty() && !trimmed.starts_with("//") {
                seen_first_line = true;
                if let Some(caps) = INCLUDE_RE.captures(&line) {
                    first_include = caps[1].to_string();
                }
            }

            if let Some(caps) = INCLUDE_RE.captures(&line) {
                let name = &caps[1];
                match self.resolve(file, name) {
                    Some(resolved) => {
                        includes.insert(resolved);
                    }
                    None => {
                        tracing::warn!(
                            file = %path_buf.display(),
                            line = idx + 1,
                            include = name,
                            "include not found"
                        );
                    }
                }
            }
        }

        Ok(IncludeRecord {
            file: file.clone(),
            last_modified: 0,
            first_include,
            includes,
            ignored: false,
            valid: false,
        })
    }

    /// Resolves an unresolved `"X"` include from `file`: first against
    /// `file`'s own directory, then each configured include path in order.
    fn resolve(&self, file: &Path, name: &str) -> Option<Path> {
        let candidate = file.parent().join(name);
        if candidate.to_path_buf().exists() {
            return Some(candidate);
        }
        for include_path in &self.include_paths {
            let candidate = include_path.join(name);
            if candidate.to_path_buf().exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// Loads a persisted cache and merges it into the in-memory one (a
    /// later-loaded record for a given file replaces an earlier one). If
    /// the recorded include-path list differs from the current one (count
    /// or any entry), this file is skipped entirely — any previously
    /// cached resolution in it may now be wrong. Takes `&self`: every field
    /// it touches is either read-only (`include_paths`) or guarded by the
    /// cache mutex, so multiple targets sharing one scanner can each load
    /// their own on-disk cache without needing exclusive access.
    pub fn load(&self, cache_file: &std::path::Path) -> Result<()> {
        let content = match fs::read_to_string(cache_file) {
            Ok(c) => c,
            Err(_) => return Ok(()), // missing/unreadable cache: start clean
        };

        let mut lines = content.lines().peekable();
        let mut stored_include_paths = Vec::new();
        while let Some(line) = lines.peek() {
            if let Some(rest) = line.strip_prefix('i') {
                stored_include_paths.push(rest.to_string());
                lines.next();
            } else {
                break;
            }
        }

        let current: Vec<String> = self.include_paths.iter().map(|p| p.display()).collect();
        if stored_include_paths != current {
            return Ok(());
        }

        let mut parsed = std::collections::HashMap::new();
        let mut pending: Option<IncludeRecord> = None;

        for line in lines {
            if let Some(rest) = line.strip_prefix('+') {
                if let Some(rec) = pending.take() {
                    parsed.insert(rec.file.clone(), rec);
                }
                let mut parts = rest.splitn(2, ' ');
                let m_time: crate::path::Timestamp =
                    parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let path_str = parts.next().unwrap_or_default();
                let file = Path::new(path_str, false);
                pending = Some(IncludeRecord {
                    file,
                    last_modified: m_time,
                    first_include: String::new(),
                    includes: HashSet::new(),
                    ignored: false,
                    valid: true,
                });
            } else if let Some(rest) = line.strip_prefix('>') {
                if let Some(rec) = pending.as_mut() {
                    rec.first_include = rest.to_string();
                }
            } else if let Some(rest) = line.strip_prefix('-') {
                if let Some(rec) = pending.as_mut() {
                    rec.includes.insert(Path::new(rest, false));
                }
            }
        }
        if let Some(rec) = pending.take() {
            parsed.insert(rec.file.clone(), rec);
        }

        self.cache.lock().unwrap().extend(parsed);
        Ok(())
    }

    pub fn save(&self, cache_file: &std::path::Path) -> Result<()> {
        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent).map_err(|e| MymakeError::io(e, parent))?;
        }
        let mut out =
            fs::File::create(cache_file).map_err(|e| MymakeError::io(e, cache_file))?;

        for ip in &self.include_paths {
            writeln!(out, "i{}", ip.display()).map_err(|e| MymakeError::io(e, cache_file))?;
        }

        let cache = self.cache.lock().unwrap();
        let mut entries: Vec<_> = cache.values().filter(|r| r.valid).collect();
        entries.sort_by(|a, b| a.file.cmp(&b.file));
        for record in entries {
            writeln!(out, "+{} {}", record.last_modified, record.file.display())
                .map_err(|e| MymakeError::io(e, cache_file))?;
            if !record.first_include.is_empty() {
                writeln!(out, ">{}", record.first_include)
                    .map_err(|e| MymakeError::io(e, cache_file))?;
            }
            let mut includes: Vec<_> = record.includes.iter().collect();
            includes.sort();
            for inc in includes {
                writeln!(out, "-{}", inc.display()).map_err(|e| MymakeError::io(e, cache_file))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn write(dir: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        p
    }

    #[test]
    fn finds_direct_includes_only_in_record() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.h", "");
        write(dir.path(), "a.cpp", "#include \"b.h\"\nint main(){}\n");

        let scanner = IncludeScanner::new(vec![]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let record = scanner.scan_file(&a).unwrap();
        assert_eq!(record.includes.len(), 1);
        assert_eq!(record.first_include, "b.h");
    }

    #[test]
    fn info_is_transitive() {
        let dir = tempdir().unwrap();
        write(dir.path(), "c.h", "");
        write(dir.path(), "b.h", "#include \"c.h\"\n");
        write(dir.path(), "a.cpp", "#include \"b.h\"\n");

        let scanner = IncludeScanner::new(vec![]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let info = scanner.info(&a).unwrap();
        assert_eq!(info.includes.len(), 2);
    }

    #[test]
    fn determinism_property_1() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.h", "");
        write(dir.path(), "a.cpp", "#include \"b.h\"\n");

        let scanner = IncludeScanner::new(vec![]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let first = scanner.info(&a).unwrap();
        let second = scanner.info(&a).unwrap();
        assert_eq!(first.includes, second.includes);
        assert_eq!(first.first_include, second.first_include);
    }

    #[test]
    fn cache_fidelity_property_2() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.h", "");
        write(dir.path(), "a.cpp", "#include \"b.h\"\n");

        let scanner = IncludeScanner::new(vec![]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let before = scanner.info(&a).unwrap();

        let cache_path = dir.path().join("includes.cache");
        scanner.save(&cache_path).unwrap();

        let reloaded = IncludeScanner::new(vec![]);
        reloaded.load(&cache_path).unwrap();
        let after = reloaded.info(&a).unwrap();

        assert_eq!(before.includes, after.includes);
        assert_eq!(before.first_include, after.first_include);
    }

    #[test]
    fn differing_include_paths_discard_cache() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.cpp", "");
        let cache_path = dir.path().join("includes.cache");

        let scanner = IncludeScanner::new(vec![Path::new("/usr/include", true)]);
        scanner.info(&Path::new(dir.path().join("a.cpp"), false)).unwrap();
        scanner.save(&cache_path).unwrap();

        let reloaded = IncludeScanner::new(vec![Path::new("/other/include", true)]);
        reloaded.load(&cache_path).unwrap();
        assert!(reloaded.cache.lock().unwrap().is_empty());
    }

    #[test]
    fn ignored_file_does_not_descend() {
        let dir = tempdir().unwrap();
        write(dir.path(), "b.h", "");
        write(dir.path(), "skip.h", "#include \"b.h\"\n");
        write(dir.path(), "a.cpp", "#include \"skip.h\"\n");

        let mut scanner = IncludeScanner::new(vec![]);
        scanner.ignore(vec!["*skip.h".to_string()]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let info = scanner.info(&a).unwrap();
        assert!(info.ignored);
        assert!(info.includes.is_empty());
    }

    #[test]
    fn missing_include_is_warned_not_fatal() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.cpp", "#include \"missing.h\"\n");
        let scanner = IncludeScanner::new(vec![]);
        let a = Path::new(dir.path().join("a.cpp"), false);
        let info = scanner.info(&a).unwrap();
        assert!(info.includes.is_empty());
    }
}
