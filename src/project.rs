//! Multi-target scheduling (spec.md §4.5).
//!
//! A [`Project`] owns every [`Target`] in a build, discovers their
//! dependency edges (via each target's own `find`), topologically orders
//! them, and drives compilation wave by wave: every target in a wave has
//! had all its prerequisites finished, so waves run in parallel and are
//! only serialized where the dependency graph actually requires it.

use crate::error::{MymakeError, Result};
use crate::path::Path;
use crate::process::ProcessPool;
use crate::target::Target;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of one target within a [`Project::build`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    Built,
    Failed(String),
    Skipped,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub outcomes: Vec<(String, TargetOutcome)>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| matches!(o, TargetOutcome::Built))
    }
}

pub struct Project {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    pool: Arc<ProcessPool>,
}

impl Project {
    pub fn new(targets: Vec<Target>, pool: Arc<ProcessPool>) -> Self {
        let index = targets.iter().enumerate().map(|(i, t)| (t.name.clone(), i)).collect();
        Self { targets, index, pool }
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    /// Runs `find` on every target, discovering each one's compile units
    /// and sibling dependencies.
    pub fn discover_all(&mut self) -> Result<()> {
        for target in &mut self.targets {
            target.load_caches()?;
            target.run_pre_build(&self.pool)?;
            target.find()?;
        }
        Ok(())
    }

    /// Dependency edges restricted to names that are actually known
    /// targets in this project; a `depends_on` entry naming something
    /// else is informational only (e.g. a sibling that isn't itself
    /// built by this invocation) and contributes no ordering edge.
    fn known_prerequisites(&self, idx: usize) -> Vec<usize> {
        self.targets[idx]
            .depends_on
            .iter()
            .filter_map(|name| self.index.get(name).copied())
            .filter(|&p| p != idx)
            .collect()
    }

    /// Groups targets into waves where every target in a wave has all its
    /// prerequisites in an earlier wave. Returns [`MymakeError::Cycle`] if
    /// any target's prerequisites can never be fully satisfied.
    fn topological_waves(&self) -> Result<Vec<Vec<usize>>> {
        let n = self.targets.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for i in 0..n {
            let prereqs = self.known_prerequisites(i);
            in_degree[i] = prereqs.len();
            for p in prereqs {
                dependents[p].push(i);
            }
        }

        let mut waves = Vec::new();
        let mut remaining: HashSet<usize> = (0..n).collect();
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

        while !ready.is_empty() {
            ready.sort_by(|a, b| self.targets[*a].name.cmp(&self.targets[*b].name));
            for &i in &ready {
                remaining.remove(&i);
            }
            let mut next_ready = Vec::new();
            for &i in &ready {
                for &dep in &dependents[i] {
                    in_degree[dep] -= 1;
                    if in_degree[dep] == 0 {
                        next_ready.push(dep);
                    }
                }
            }
            waves.push(ready);
            ready = next_ready;
        }

        if !remaining.is_empty() {
            let mut nodes: Vec<String> =
                remaining.iter().map(|&i| self.targets[i].name.clone()).collect();
            nodes.sort();
            return Err(MymakeError::Cycle { nodes });
        }

        Ok(waves)
    }

    /// Builds every target in dependency order, running independent
    /// targets within a wave in parallel. A failed target's dependents are
    /// reported [`TargetOutcome::Skipped`] rather than attempted.
    pub fn build(&mut self) -> Result<BuildReport> {
        let waves = self.topological_waves()?;
        let mut outcomes = vec![None; self.targets.len()];
        let mut forwarded: Vec<Vec<Path>> = vec![Vec::new(); self.targets.len()];
        let mut blocked: HashSet<usize> = HashSet::new();

        for wave in waves {
            let runnable: Vec<usize> = wave.iter().copied().filter(|i| !blocked.contains(i)).collect();
            let skipped: Vec<usize> = wave.iter().copied().filter(|i| blocked.contains(i)).collect();

            for &i in &skipped {
                outcomes[i] = Some(TargetOutcome::Skipped);
            }

            let results = self.compile_wave(&runnable, &forwarded);

            for (i, result) in results {
                match result {
                    Ok(()) => {
                        if let Err(err) = self.targets[i].run_post_build(&self.pool) {
                            outcomes[i] = Some(TargetOutcome::Failed(err.to_string()));
                            self.block_dependents(i, &mut blocked);
                            continue;
                        }
                        outcomes[i] = Some(TargetOutcome::Built);
                        self.propagate_forwarded(i, &mut forwarded);
                    }
                    Err(err) => {
                        outcomes[i] = Some(TargetOutcome::Failed(err.to_string()));
                        self.block_dependents(i, &mut blocked);
                    }
                }
            }
        }

        let report = BuildReport {
            outcomes: self
                .targets
                .iter()
                .zip(outcomes)
                .map(|(t, o)| (t.name.clone(), o.unwrap_or(TargetOutcome::Skipped)))
                .collect(),
        };
        Ok(report)
    }

    fn compile_wave(&mut self, runnable: &[usize], forwarded: &[Vec<Path>]) -> Vec<(usize, Result<()>)> {
        let mut ordered: Vec<usize> = runnable.to_vec();
        ordered.sort_unstable();
        let runnable_set: HashSet<usize> = ordered.iter().copied().collect();
        let pool = &self.pool;
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .targets
                .iter_mut()
                .enumerate()
                .filter(|(i, _)| runnable_set.contains(i))
                .map(|(i, target)| {
                    let libs = forwarded[i].clone();
                    scope.spawn(move || target.compile(pool, &libs))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(MymakeError::Other("target build thread panicked".to_string()))
                    })
                })
                .collect()
        });
        ordered.into_iter().zip(results).collect()
    }

    fn propagate_forwarded(&self, i: usize, forwarded: &mut [Vec<Path>]) {
        let target = &self.targets[i];
        // `linkOutput` and `forwardDeps` are independent: a pure pass-through
        // node (linkOutput=false, forwardDeps=true) contributes nothing of
        // its own but still relays what it received.
        let mut outgoing = Vec::new();
        if target.link_output {
            outgoing.push(target.output.clone());
        }
        if target.forward_deps {
            outgoing.extend(forwarded[i].iter().cloned());
        }
        let outgoing = dedup_keep_last(outgoing);
        for &dep in &self.known_dependents(i) {
            forwarded[dep].extend(outgoing.iter().cloned());
            let deduped = dedup_keep_last(std::mem::take(&mut forwarded[dep]));
            forwarded[dep] = deduped;
        }
    }

    fn known_dependents(&self, i: usize) -> Vec<usize> {
        (0..self.targets.len()).filter(|&j| self.known_prerequisites(j).contains(&i)).collect()
    }

    fn block_dependents(&self, i: usize, blocked: &mut HashSet<usize>) {
        let mut stack = vec![i];
        while let Some(cur) = stack.pop() {
            for dep in self.known_dependents(cur) {
                if blocked.insert(dep) {
                    stack.push(dep);
                }
            }
        }
    }
}

/// Removes earlier duplicates, keeping each path at the position of its
/// last occurrence (spec.md §9 open question on duplicate library order).
fn dedup_keep_last(paths: Vec<Path>) -> Vec<Path> {
    let mut seen = HashSet::new();
    let mut rev = Vec::with_capacity(paths.len());
    for p in paths.into_iter().rev() {
        if seen.insert(p.clone()) {
            rev.push(p);
        }
    }
    rev.reverse();
    rev
}
