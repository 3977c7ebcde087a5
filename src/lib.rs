//! `mymake`: an incremental, dependency-aware build driver for C-family
//! source trees.
//!
//! A build is a tree of directories, each optionally carrying its own
//! [`Config`]. [`scanner::IncludeScanner`] resolves local `#include`
//! closures, [`target::Target`] turns one directory's configuration into
//! a set of stale/fresh compile units and links them, and
//! [`project::Project`] orders and dispatches many targets by their
//! discovered dependencies.
//!
//! ```no_run
//! use mymake::{init_tracing, ProcessPool, OutputMux};
//! use std::sync::Arc;
//!
//! init_tracing();
//! let pool = ProcessPool::new(num_cpus::get(), Arc::new(OutputMux::stdio()));
//! // build `Target`s via `mymake::build_project`, then:
//! // let mut project = Project::new(targets, pool);
//! // project.discover_all()?;
//! // let report = project.build()?;
//! # Ok::<(), mymake::MymakeError>(())
//! ```

pub mod command_cache;
pub mod config;
pub mod env;
pub mod error;
pub mod output_mux;
pub mod path;
pub mod process;
pub mod project;
pub mod scanner;
pub mod target;
pub mod wildcard;

pub use command_cache::CommandCache;
pub use config::Config;
pub use error::{MymakeError, Result};
pub use output_mux::OutputMux;
pub use path::Path;
pub use process::ProcessPool;
pub use project::{BuildReport, Project, TargetOutcome};
pub use scanner::IncludeScanner;
pub use target::Target;

use std::sync::Arc;

/// Installs a [`tracing_subscriber`] format layer reading verbosity from
/// `MYMAKE_LOG` (falling back to `info`). Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("MYMAKE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Canonicalizes a user-supplied project root. Uses [`dunce::canonicalize`]
/// rather than [`std::fs::canonicalize`] so Windows roots don't end up
/// carrying a `\\?\` prefix that then fails to compare equal against
/// paths written by hand in config files.
pub fn resolve_root(root: impl AsRef<std::path::Path>) -> Result<Path> {
    let canonical =
        dunce::canonicalize(root.as_ref()).map_err(|e| MymakeError::io(e, root.as_ref()))?;
    Ok(Path::from_std(&canonical).with_directory(true))
}

/// One configured target directory, as handed to [`build_project`] by
/// whatever external config loader assembled it (spec.md §1's sectioned
/// config format is out of scope here; see [`config::Config`]).
pub struct TargetSpec {
    pub name: String,
    pub wd: Path,
    pub config: Config,
}

/// Builds a [`Project`] from a flat list of target specs, sharing one
/// [`IncludeScanner`] and one [`CommandCache`] across every target so a
/// header scanned for one target isn't rescanned for another.
///
/// `include_paths` seeds the scanner's search path (spec.md §4.1). Cache
/// persistence is per-target, not project-wide: [`Project::discover_all`]
/// loads each target's own `buildDir` caches before scanning it, and
/// [`Target::compile`] writes them back to that same directory
/// unconditionally at teardown (spec.md §3/§7).
pub fn build_project(
    specs: Vec<TargetSpec>,
    include_paths: Vec<Path>,
    jobs: usize,
) -> Result<(Project, Arc<IncludeScanner>, Arc<CommandCache>)> {
    let mut scanner = IncludeScanner::new(include_paths);
    let commands = CommandCache::new();

    // `ignore` is a per-target config key, but the scanner is shared
    // across every target in the project, so the patterns that actually
    // take effect are the union of all of them.
    let ignore_patterns: Vec<String> =
        specs.iter().flat_map(|spec| spec.config.get_array("ignore", &[])).collect();
    scanner.ignore(ignore_patterns);

    let scanner = Arc::new(scanner);
    let commands = Arc::new(commands);

    let targets = specs
        .into_iter()
        .map(|spec| Target::new(spec.name, spec.wd, spec.config, scanner.clone(), commands.clone()))
        .collect();

    let pool = ProcessPool::new(jobs.max(1), Arc::new(OutputMux::stdio()));
    Ok((Project::new(targets, pool), scanner, commands))
}
