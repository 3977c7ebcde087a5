//! A single compilation unit group in one directory with one
//! configuration (spec.md §3 `Target`, §4.3 `find`, §4.4 `compile`).

use crate::command_cache::CommandCache;
use crate::config::Config;
use crate::env;
use crate::error::{MymakeError, Result};
use crate::path::{Path, TimeCache};
use crate::process::{OutputSpec, ProcessGroup, ProcessPool};
use crate::scanner::IncludeScanner;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

/// One translation unit discovered for a target.
#[derive(Clone, Debug)]
pub struct CompileUnit {
    pub path: Path,
    pub is_pch: bool,
    pub auto_found: bool,
}

pub struct Target {
    pub name: String,
    pub wd: Path,
    pub config: Config,
    scanner: Arc<IncludeScanner>,
    commands: Arc<CommandCache>,
    pub to_compile: Vec<CompileUnit>,
    pub output: Path,
    pub depends_on: BTreeSet<String>,
    pub link_output: bool,
    pub forward_deps: bool,
    time_cache: TimeCache,
}

struct QueueItem {
    path: Path,
    auto_found: bool,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        wd: Path,
        config: Config,
        scanner: Arc<IncludeScanner>,
        commands: Arc<CommandCache>,
    ) -> Self {
        let link_output = config.get_bool("linkOutput", true);
        let forward_deps = config.get_bool("forwardDeps", false);
        Self {
            name: name.into(),
            wd,
            config,
            scanner,
            commands,
            to_compile: Vec::new(),
            output: Path::default(),
            depends_on: BTreeSet::new(),
            link_output,
            forward_deps,
            time_cache: TimeCache::new(),
        }
    }

    fn valid_extensions(&self) -> Vec<String> {
        self.config.get_array("ext", &["cpp", "cc", "cxx", "c"])
    }

    /// Resolves an extensionless input by trying each valid extension in
    /// order; the first that exists on disk wins.
    fn resolve_input(&self, input: &str, exts: &[String]) -> Result<Path> {
        let candidate = self.wd.join(input);
        if candidate.extension().is_some() || candidate.to_path_buf().exists() {
            return Ok(candidate);
        }
        for ext in exts {
            let with_ext = candidate.with_extension(ext);
            if with_ext.to_path_buf().exists() {
                return Ok(with_ext);
            }
        }
        Ok(candidate)
    }

    /// `input = "*"`: every file under `wd` whose extension is valid,
    /// sorted by path for build reproducibility (spec.md §9 open question).
    fn discover_wildcard_sources(&self, exts: &[String]) -> Result<Vec<Path>> {
        let mut found = Vec::new();
        for entry in walkdir::WalkDir::new(self.wd.to_path_buf()) {
            let entry = entry.map_err(|e| {
                let io_err = e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                });
                MymakeError::io(io_err, self.wd.to_path_buf())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let p = Path::from_std(entry.path());
            if let Some(ext) = p.extension() {
                if exts.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                    found.push(p);
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn resolve_pch_source(&self, pch_header: &str, exts: &[String]) -> Option<Path> {
        let header_path = self.wd.join(pch_header);
        let stem = header_path.file_stem()?.to_string();
        for ext in exts {
            let candidate = header_path.parent().join(&stem).with_extension(ext);
            if candidate.to_path_buf().exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// Discovers the transitive set of translation units to compile
    /// (spec.md §4.3). Returns success iff at least one unit was found.
    #[tracing::instrument(skip(self), fields(target = %self.name))]
    pub fn find(&mut self) -> Result<()> {
        let exts = self.valid_extensions();
        let pch_header = self.config.get_str("pch", "").to_string();
        let pch_source =
            if pch_header.is_empty() { None } else { self.resolve_pch_source(&pch_header, &exts) };

        let mut queue: VecDeque<QueueItem> = VecDeque::new();
        let mut seen: HashSet<Path> = HashSet::new();

        if let Some(pch) = &pch_source {
            seen.insert(pch.clone());
            queue.push_back(QueueItem { path: pch.clone(), auto_found: false });
        }

        let inputs = self.config.get_array("input", &[]);
        for input in &inputs {
            if input == "*" {
                for p in self.discover_wildcard_sources(&exts)? {
                    if seen.insert(p.clone()) {
                        queue.push_back(QueueItem { path: p, auto_found: false });
                    }
                }
                continue;
            }
            let resolved = self.resolve_input(input, &exts)?;
            if seen.insert(resolved.clone()) {
                queue.push_back(QueueItem { path: resolved, auto_found: false });
            }
        }

        let mut to_compile = Vec::new();
        let mut depends_on = BTreeSet::new();
        let mut first_title: Option<String> = None;

        while let Some(item) = queue.pop_front() {
            let unit = item.path;

            if !unit.is_descendant_of(&self.wd) {
                let parent_root = self.wd.parent();
                if let Some(rel) = unit.strip_prefix(&parent_root) {
                    if let Some(sibling) = rel.segments().first() {
                        depends_on.insert(sibling.clone());
                    }
                }
                // cross-target inclusion is a scheduling hint only; never
                // compiled, never descended into.
                continue;
            }

            let is_pch_unit = pch_source.as_ref() == Some(&unit);
            if first_title.is_none() && !is_pch_unit && !item.auto_found {
                first_title = unit.file_stem().map(|s| s.to_string());
            }

            let info = self.scanner.info(&unit)?;

            if !pch_header.is_empty() && !is_pch_unit && info.first_include != pch_header {
                return Err(MymakeError::PchOrder { file: unit.to_path_buf() });
            }

            to_compile.push(CompileUnit { path: unit.clone(), is_pch: is_pch_unit, auto_found: item.auto_found });

            for h in &info.includes {
                if let Some(ext) =
                    exts.iter().find(|e| h.with_extension(e.as_str()).to_path_buf().exists())
                {
                    let candidate = h.with_extension(ext.as_str());
                    if seen.insert(candidate.clone()) {
                        queue.push_back(QueueItem { path: candidate, auto_found: true });
                    }
                }
            }
        }

        for explicit in self.config.get_array("deps", &[]) {
            depends_on.insert(explicit);
        }

        self.depends_on = depends_on;
        self.output = self.resolve_output(first_title);

        if to_compile.is_empty() {
            return Err(MymakeError::EmptyTarget(self.name.clone()));
        }
        self.to_compile = to_compile;
        Ok(())
    }

    fn resolve_output(&self, first_title: Option<String>) -> Path {
        let exec_dir = self.config.get_str("execDir", ".").to_string();
        let exec_ext = self.config.get_str("execExt", "").to_string();
        let output_name = self.config.get_str("output", "").to_string();

        let name = if !output_name.is_empty() {
            output_name
        } else if let Some(t) = first_title {
            t
        } else {
            self.wd.file_name().unwrap_or("a").to_string()
        };

        let base = self.wd.join(exec_dir).join(&name);
        if exec_ext.is_empty() {
            base
        } else {
            base.with_extension(&exec_ext)
        }
    }

    fn intermediate_path(&self, unit: &Path) -> Path {
        let build_dir = self.config.get_str("buildDir", "build").to_string();
        let intermediate_ext = self.config.get_str("intermediateExt", "o").to_string();
        let rel = unit.strip_prefix(&self.wd).unwrap_or_else(|| unit.clone());
        self.wd.join(build_dir).join(rel.to_path_buf()).with_extension(&intermediate_ext)
    }

    fn pch_artifact_path(&self) -> Path {
        let build_dir = self.config.get_str("buildDir", "build").to_string();
        let pch_header = self.config.get_str("pch", "pch").to_string();
        let default_name = format!("{pch_header}.pch");
        let pch_file = self.config.get_str("pchFile", &default_name).to_string();
        self.wd.join(build_dir).join(pch_file)
    }

    fn include_cl(&self) -> String {
        self.config.get_str("includeCl", "-I").to_string()
    }

    /// This target's own on-disk cache files, one per cache, under its own
    /// `buildDir` (spec.md §3/§7).
    fn cache_paths(&self) -> (std::path::PathBuf, std::path::PathBuf) {
        let build_dir = self.wd.join(self.config.get_str("buildDir", "build")).to_path_buf();
        (build_dir.join("includes"), build_dir.join("commands"))
    }

    /// Loads this target's persisted include/command caches into the
    /// shared scanner and command cache. Called once per target before
    /// `find`, so per-target cache files merge into the caches shared
    /// across the whole project without clobbering what a sibling target
    /// already loaded.
    pub fn load_caches(&self) -> Result<()> {
        let (includes, commands) = self.cache_paths();
        self.scanner.load(&includes)?;
        self.commands.load(&commands)?;
        Ok(())
    }

    /// Writes this target's caches back to its own build directory. Called
    /// unconditionally at compile teardown, success or failure, so partial
    /// scan/command progress survives a failed build.
    fn save_caches(&self) -> Result<()> {
        let (includes, commands) = self.cache_paths();
        self.scanner.save(&includes)?;
        self.commands.save(&commands)?;
        Ok(())
    }

    /// Picks the compile command-line for `unit`. `compile` may hold either
    /// a single bare command (no wildcard matching involved) or one or more
    /// `wildcard:template` entries; in the latter shape, a unit matching
    /// none of them has no suitable compile command at all — unlike the
    /// bare-string shape, there is no sensible fallback to return.
    fn select_compile_template(&self, unit: &Path) -> Option<String> {
        let rel = unit.strip_prefix(&self.wd).map(|p| p.display()).unwrap_or_else(|| unit.display());
        let variants = self.config.get_array("compile", &[]);
        let wildcard_shaped = variants.iter().any(|v| v.contains(':'));

        if !wildcard_shaped {
            let bare = self.config.get_str("compile", "").to_string();
            return if bare.is_empty() { None } else { Some(bare) };
        }

        for variant in variants.iter().rev() {
            if let Some((wildcard, template)) = variant.split_once(':') {
                if crate::wildcard::Pattern::new(wildcard).matches(&rel) {
                    return Some(template.to_string());
                }
            }
        }
        None
    }

    fn expanded_includes(&self) -> String {
        let cl = self.include_cl();
        self.config
            .get_array("include", &[])
            .iter()
            .map(|p| format!("{cl}{p}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expand_for_unit(&self, template: &str, unit: &Path, output: &Path, pch_file: &Path) -> String {
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("file".to_string(), unit.display());
        extra.insert("output".to_string(), output.display());
        extra.insert("pchFile".to_string(), pch_file.display());
        extra.insert("includes".to_string(), self.expanded_includes());
        self.config.expand_vars(template, &extra)
    }

    fn jobs(&self) -> usize {
        let configured = self.config.get_str("maxThreads", "");
        configured.parse::<usize>().ok().filter(|&n| n > 0).unwrap_or_else(num_cpus::get).max(1)
    }

    fn env_map(&self) -> std::collections::BTreeMap<String, String> {
        env::build_env(&self.config.get_array("env", &[]))
    }

    fn run_steps(&self, key: &str, pool: &Arc<ProcessPool>) -> Result<()> {
        let steps = self.config.get_array(key, &[]);
        if steps.is_empty() {
            return Ok(());
        }
        let group = pool.group(1);
        let env = self.env_map();
        for step in &steps {
            let expanded = self.config.expand_vars(step, &Default::default());
            group.spawn(&expanded, &self.wd.to_path_buf(), &env, OutputSpec {
                banner: String::new(),
                prefix: format!("[{}] ", self.name),
                skip_stdout_lines: 0,
            })?;
            if !group.wait() {
                return Err(MymakeError::Other(format!("{key} step failed: {expanded}")));
            }
        }
        Ok(())
    }

    pub fn run_pre_build(&self, pool: &Arc<ProcessPool>) -> Result<()> {
        self.run_steps("preBuild", pool)
    }

    pub fn run_post_build(&self, pool: &Arc<ProcessPool>) -> Result<()> {
        self.run_steps("postBuild", pool)
    }

    /// Compiles all stale units and links if the output is stale
    /// (spec.md §4.4). `extra_libs` are additional link inputs propagated
    /// from dependencies by the project scheduler.
    ///
    /// The include and command caches are written back to this target's
    /// own build directory unconditionally at teardown, whether `compile`
    /// succeeds or fails, so a failed build doesn't throw away scan/command
    /// progress the next run could have reused.
    #[tracing::instrument(skip(self, pool, extra_libs), fields(target = %self.name))]
    pub fn compile(&mut self, pool: &Arc<ProcessPool>, extra_libs: &[Path]) -> Result<()> {
        let result = self.compile_inner(pool, extra_libs);
        if let Err(err) = self.save_caches() {
            tracing::warn!(target = %self.name, error = %err, "failed to persist caches at teardown");
        }
        result
    }

    fn compile_inner(&mut self, pool: &Arc<ProcessPool>, extra_libs: &[Path]) -> Result<()> {
        // fresh stats for this run: a long-lived process that calls
        // `compile` more than once must see filesystem changes made
        // between calls, not whatever was true the first time a path
        // was stat'd.
        self.time_cache = TimeCache::new();
        let force = self.config.get_bool("force", false);
        let env = self.env_map();
        let group = pool.group(self.jobs());

        let pch_file = self.pch_artifact_path();
        let combined_pch = self.config.get_bool("pchCompileCombined", false);

        let mut link_inputs: Vec<Path> = Vec::new();

        let units: Vec<CompileUnit> = self.to_compile.clone();
        for unit in &units {
            let intermediate = self.intermediate_path(&unit.path);
            if let Some(parent) = intermediate.to_path_buf().parent() {
                std::fs::create_dir_all(parent).map_err(|e| MymakeError::io(e, parent))?;
            }

            let info = self.scanner.info(&unit.path)?;
            let mut last_modified = self.time_cache.stat(&unit.path).m_time;
            for inc in &info.includes {
                last_modified = last_modified.max(self.time_cache.stat(inc).m_time);
            }

            let intermediate_info = self.time_cache.stat(&intermediate);
            let pch_stale = unit.is_pch && {
                let pch_info = self.time_cache.stat(&pch_file);
                !pch_info.exists || pch_info.m_time < last_modified
            };
            let mtime_stale = force
                || !intermediate_info.exists
                || intermediate_info.m_time < last_modified
                || pch_stale;

            if self.scanner.is_ignored(&unit.path) {
                // never compiled, so a command-line fingerprint change can't
                // be the reason to drop it from the link; only an
                // mtime-stale (and therefore unusable) intermediate does.
                if !mtime_stale {
                    link_inputs.push(intermediate.clone());
                }
                continue;
            }

            // A pch source uses the dedicated `pchCompile` template only
            // when one invocation must produce both outputs; otherwise the
            // pch artifact is built as a separate first phase below and
            // this unit's object is produced by a normal compile, same as
            // any other source.
            let template = if unit.is_pch && combined_pch {
                self.config.get_str("pchCompile", "").to_string()
            } else {
                self.select_compile_template(&unit.path).ok_or_else(|| {
                    MymakeError::config(
                        "compile",
                        format!("no suitable compile command-line for {}", unit.path.display()),
                    )
                })?
            };
            let expanded =
                self.expand_for_unit(&template, &unit.path, &intermediate, &pch_file);

            let stale = mtime_stale || !self.commands.check(&unit.path.to_path_buf(), &expanded);

            if !stale {
                link_inputs.push(intermediate.clone());
                continue;
            }

            if unit.is_pch && !combined_pch {
                let pch_template = self.config.get_str("pchCompile", "").to_string();
                let pch_expanded =
                    self.expand_for_unit(&pch_template, &unit.path, &pch_file, &pch_file);
                // must finish before the object compile below starts, so
                // it runs in its own single-process group rather than
                // sharing this target's parallel compile group.
                let pch_group = pool.group(1);
                pch_group.spawn(&pch_expanded, &self.wd.to_path_buf(), &env, OutputSpec {
                    banner: String::new(),
                    prefix: format!("[{}] ", self.name),
                    skip_stdout_lines: 0,
                })?;
                if !pch_group.wait() {
                    return Err(MymakeError::CompileFailed(pch_file.to_path_buf()));
                }
            }

            self.commands.set(unit.path.to_path_buf(), expanded.clone());
            group.spawn(&expanded, &self.wd.to_path_buf(), &env, OutputSpec {
                banner: String::new(),
                prefix: format!("[{}] ", self.name),
                skip_stdout_lines: 0,
            })?;

            link_inputs.push(intermediate.clone());
        }

        if !group.wait() {
            return Err(MymakeError::CompileFailed(self.wd.to_path_buf()));
        }

        // Freshly produced intermediates need re-stating; `time_cache`
        // would otherwise still report the pre-compile snapshot.
        for path in &link_inputs {
            self.time_cache.invalidate(path);
        }
        let mut latest = 0i64;
        for path in &link_inputs {
            latest = latest.max(self.time_cache.stat(path).m_time);
        }

        let mut libraries: Vec<Path> = self
            .config
            .get_array("library", &[])
            .into_iter()
            .chain(self.config.get_array("localLibrary", &[]))
            .map(|l| self.wd.join(l))
            .collect();
        libraries.extend(extra_libs.iter().cloned());
        for lib in &libraries {
            let info = self.time_cache.stat(lib);
            if info.exists {
                latest = latest.max(info.m_time);
            }
        }

        let output_info = self.time_cache.stat(&self.output);
        let needs_link = force || !output_info.exists || output_info.m_time < latest;

        if needs_link {
            if let Some(parent) = self.output.to_path_buf().parent() {
                std::fs::create_dir_all(parent).map_err(|e| MymakeError::io(e, parent))?;
            }
            let link_template = self.config.get_str("link", "").to_string();
            let lib_cl = self.config.get_str("libraryCl", "-l").to_string();
            let mut extra = std::collections::BTreeMap::new();
            extra.insert(
                "files".to_string(),
                link_inputs.iter().map(|p| p.display()).collect::<Vec<_>>().join(" "),
            );
            extra.insert("output".to_string(), self.output.display());
            extra.insert(
                "libs".to_string(),
                libraries.iter().map(|l| format!("{lib_cl}{l}")).collect::<Vec<_>>().join(" "),
            );
            let link_cmd = self.config.expand_vars(&link_template, &extra);

            let link_group = pool.group(1);
            link_group.spawn(&link_cmd, &self.wd.to_path_buf(), &env, OutputSpec {
                banner: String::new(),
                prefix: format!("[{}] ", self.name),
                skip_stdout_lines: 0,
            })?;
            if !link_group.wait() {
                return Err(MymakeError::LinkFailed(self.output.to_path_buf()));
            }
        }

        Ok(())
    }

}
