//! Bounded-concurrency process pool (spec.md §4.6).
//!
//! [`ProcessPool`] enforces a single global cap on live child processes.
//! [`ProcessGroup`] is a scoped sub-pool — per-target parallelism plus a
//! shared failure flag — that blocks `spawn` until both the global and
//! local permits are available.
//!
//! Rather than the source's linked list of waiters with a rotating
//! "manager" thread (spec.md §9), the global cap here is a plain counter
//! guarded by a `Condvar`, and each spawned child gets its own reaper
//! thread blocked in `Child::wait()`. This keeps the invariant the source
//! actually cares about — at most `procLimit` live children, fair
//! wake-up on exit — without the hand-rolled manager-handoff machinery;
//! see DESIGN.md.

use crate::error::{MymakeError, Result};
use crate::output_mux::{OutputMux, OutputState};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};

/// Global cap on live child processes across the whole run.
pub struct ProcessPool {
    limit: usize,
    live: Mutex<usize>,
    cv: Condvar,
    mux: Arc<OutputMux>,
}

impl ProcessPool {
    pub fn new(limit: usize, mux: Arc<OutputMux>) -> Arc<Self> {
        Arc::new(Self { limit: limit.max(1), live: Mutex::new(0), cv: Condvar::new(), mux })
    }

    fn acquire(&self) {
        let mut live = self.live.lock().unwrap();
        while *live >= self.limit {
            live = self.cv.wait(live).unwrap();
        }
        *live += 1;
    }

    fn release(&self) {
        let mut live = self.live.lock().unwrap();
        *live -= 1;
        self.cv.notify_all();
    }

    pub fn live_count(&self) -> usize {
        *self.live.lock().unwrap()
    }

    pub fn group(self: &Arc<Self>, limit: usize) -> ProcessGroup {
        ProcessGroup::new(self.clone(), limit)
    }
}

#[derive(Default)]
struct GroupState {
    pending: usize,
    failed: bool,
}

/// The part of a [`ProcessGroup`] a reaper thread needs to outlive the
/// borrow of the group itself.
struct GroupSync {
    limit: usize,
    state: Mutex<GroupState>,
    cv: Condvar,
}

/// A scoped sub-pool with its own local cap and a shared failure flag.
pub struct ProcessGroup {
    pool: Arc<ProcessPool>,
    sync: Arc<GroupSync>,
}

/// What to prefix/banner a spawned process's output with.
#[derive(Clone, Debug, Default)]
pub struct OutputSpec {
    pub banner: String,
    pub prefix: String,
    pub skip_stdout_lines: usize,
}

impl ProcessGroup {
    pub fn new(pool: Arc<ProcessPool>, limit: usize) -> Self {
        let sync =
            Arc::new(GroupSync { limit: limit.max(1), state: Mutex::new(GroupState::default()), cv: Condvar::new() });
        Self { pool, sync }
    }

    pub fn has_failed(&self) -> bool {
        self.sync.state.lock().unwrap().failed
    }

    fn synchronous(&self) -> bool {
        self.sync.limit == 1 || self.pool.limit == 1
    }

    /// Blocks until a local permit is free, then a global one, then spawns
    /// the command under the platform shell. Returns `Ok(false)` without
    /// launching if the group has already failed.
    pub fn spawn(
        &self,
        command: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        output: OutputSpec,
    ) -> Result<bool> {
        {
            let mut state = self.sync.state.lock().unwrap();
            while !state.failed && state.pending >= self.sync.limit {
                state = self.sync.cv.wait(state).unwrap();
            }
            if state.failed {
                return Ok(false);
            }
            state.pending += 1;
        }

        self.pool.acquire();

        let mut cmd = shell_command(command);
        cmd.current_dir(cwd);
        cmd.env_clear();
        cmd.envs(env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(%command, "spawning");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.pool.release();
                let mut state = self.sync.state.lock().unwrap();
                state.pending -= 1;
                state.failed = true;
                self.sync.cv.notify_all();
                return Err(MymakeError::Spawn { command: command.to_string(), source: err });
            }
        };

        let out_state = OutputState::new(output.banner, output.prefix);
        if let Some(stdout) = child.stdout.take() {
            self.pool.mux.register_reader(stdout, out_state.clone(), false, output.skip_stdout_lines);
        }
        if let Some(stderr) = child.stderr.take() {
            self.pool.mux.register_reader(stderr, out_state, true, 0);
        }

        if self.synchronous() {
            let ok = wait_and_release(&mut child, &self.pool)?;
            let mut state = self.sync.state.lock().unwrap();
            state.pending -= 1;
            if !ok {
                state.failed = true;
            }
            self.sync.cv.notify_all();
            return Ok(true);
        }

        let pool = self.pool.clone();
        let sync = self.sync.clone();
        std::thread::spawn(move || {
            let ok = wait_and_release(&mut child, &pool).unwrap_or(false);
            let mut state = sync.state.lock().unwrap();
            state.pending -= 1;
            if !ok {
                state.failed = true;
            }
            sync.cv.notify_all();
        });

        Ok(true)
    }

    /// Blocks until every spawned process in this group has exited.
    /// Returns `true` iff none of them failed.
    pub fn wait(&self) -> bool {
        let mut state = self.sync.state.lock().unwrap();
        while state.pending > 0 {
            state = self.sync.cv.wait(state).unwrap();
        }
        !state.failed
    }
}

fn wait_and_release(child: &mut std::process::Child, pool: &Arc<ProcessPool>) -> Result<bool> {
    let status = child.wait().map_err(MymakeError::Wait)?;
    pool.release();
    if let Some(code) = status.code() {
        Ok(code == 0)
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                tracing::warn!(signal = -signal, "child killed by signal");
            }
        }
        Ok(false)
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_mux::OutputMux;

    fn pool(limit: usize) -> Arc<ProcessPool> {
        ProcessPool::new(limit, Arc::new(OutputMux::stdio()))
    }

    #[test]
    fn respects_global_cap_property_7() {
        let pool = pool(2);
        let group = pool.group(8);
        let env = BTreeMap::new();
        for _ in 0..5 {
            group.spawn("true", Path::new("."), &env, OutputSpec::default()).unwrap();
            assert!(pool.live_count() <= 2);
        }
        assert!(group.wait());
    }

    #[test]
    fn failure_marks_group_failed() {
        let pool = pool(4);
        let group = pool.group(4);
        let env = BTreeMap::new();
        group.spawn("exit 1", Path::new("."), &env, OutputSpec::default()).unwrap();
        assert!(!group.wait());
        assert!(group.has_failed());
    }

    #[test]
    fn spawn_after_failure_is_skipped() {
        let pool = pool(4);
        let group = pool.group(4);
        let env = BTreeMap::new();
        group.spawn("exit 1", Path::new("."), &env, OutputSpec::default()).unwrap();
        group.wait();
        let launched = group.spawn("true", Path::new("."), &env, OutputSpec::default()).unwrap();
        assert!(!launched);
    }

    #[test]
    fn synchronous_mode_waits_inline_when_limit_is_one() {
        let pool = pool(1);
        let group = pool.group(1);
        let env = BTreeMap::new();
        group.spawn("true", Path::new("."), &env, OutputSpec::default()).unwrap();
        // by the time spawn() returns in synchronous mode the child is done
        assert_eq!(pool.live_count(), 0);
    }
}
