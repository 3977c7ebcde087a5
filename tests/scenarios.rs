//! End-to-end scenario tests (spec.md §8, S1-S6).
//!
//! Every "compiler" here is a trivial shell one-liner (`touch`, `echo`)
//! standing in for a real C/C++ toolchain, so these tests exercise the
//! staleness, scheduling, and output-multiplexing logic without depending
//! on `cc` being installed.

use mymake::{
    build_project, Config, IncludeScanner, OutputMux, Path, Project, ProcessPool, Target,
    TargetOutcome, TargetSpec,
};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

fn write(dir: &std::path::Path, rel: &str, content: &str) {
    let full = dir.join(rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

fn simple_config(input: &str, compile: &str, link: &str) -> Config {
    let mut config = Config::new();
    config.set_array("input", vec![input.to_string()]);
    config.set_str("compile", compile);
    config.set_str("link", link);
    config
}

fn bump_mtime(path: &std::path::Path) {
    // coarse mtime resolution on some filesystems: sleep past it rather
    // than risk a same-tick write comparing equal.
    std::thread::sleep(Duration::from_millis(1100));
    let content = fs::read_to_string(path).unwrap();
    fs::write(path, content).unwrap();
}

fn mtime(path: &std::path::Path) -> std::time::SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

/// S1: a single target compiles once and links; an unchanged rebuild
/// recompiles and relinks nothing.
#[test]
fn s1_clean_build_then_noop_rebuild() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.cpp", "#include \"b.h\"\nint main(){}\n");
    write(dir.path(), "b.h", "");

    let wd = Path::new(dir.path(), true);
    let config = simple_config("a.cpp", "touch <output>", "touch <output>");
    let specs = vec![TargetSpec { name: "app".to_string(), wd, config }];
    let (mut project, _scanner, _commands) = build_project(specs, vec![], 2).unwrap();

    project.discover_all().unwrap();
    let report = project.build().unwrap();
    assert!(report.is_success());

    let output = project.target("app").unwrap().output.to_path_buf();
    assert!(output.exists());
    let first_build = mtime(&output);

    std::thread::sleep(Duration::from_millis(50));
    let report = project.build().unwrap();
    assert!(report.is_success());
    assert_eq!(mtime(&output), first_build, "unchanged rebuild must not relink");
}

/// S2: touching an included header triggers exactly one recompile and a
/// re-link, even though the source file itself didn't change.
#[test]
fn s2_header_touch_triggers_recompile() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.cpp", "#include \"b.h\"\nint main(){}\n");
    write(dir.path(), "b.h", "");

    let wd = Path::new(dir.path(), true);
    let config = simple_config("a.cpp", "touch <output>", "touch <output>");
    let specs = vec![TargetSpec { name: "app".to_string(), wd, config }];
    let (mut project, _scanner, _commands) = build_project(specs, vec![], 2).unwrap();

    project.discover_all().unwrap();
    assert!(project.build().unwrap().is_success());

    let output = project.target("app").unwrap().output.to_path_buf();
    let before = mtime(&output);

    bump_mtime(&dir.path().join("b.h"));

    assert!(project.build().unwrap().is_success());
    let after = mtime(&output);
    assert!(after > before, "touching an included header must trigger a re-link");
}

/// S3: changing the compile template forces a recompile of every unit
/// even with unchanged mtimes, because the command-cache fingerprint
/// no longer matches. Modeled as two separate process invocations, each
/// building the same target directory (and so loading/saving the same
/// on-disk caches under its `buildDir`), the way a real rebuild would.
#[test]
fn s3_changed_compile_template_forces_recompile() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.cpp", "int main(){}\n");

    let wd = Path::new(dir.path(), true);
    let config = simple_config("a.cpp", "touch <output>", "touch <output>");
    let specs = vec![TargetSpec { name: "app".to_string(), wd: wd.clone(), config }];
    let (mut project, _scanner, _commands) = build_project(specs, vec![], 2).unwrap();
    project.discover_all().unwrap();
    assert!(project.build().unwrap().is_success());

    let output = project.target("app").unwrap().output.to_path_buf();
    let before = mtime(&output);
    std::thread::sleep(Duration::from_millis(50));

    // a fresh process with the same sources, same mtimes, but a
    // different compile template (the one knob the command cache
    // actually guards against). Its command cache is loaded fresh from
    // the `buildDir` the first process wrote at teardown.
    let config = simple_config("a.cpp", "touch <output> # -O2", "touch <output>");
    let specs = vec![TargetSpec { name: "app".to_string(), wd, config }];
    let (mut project2, _scanner2, _commands2) = build_project(specs, vec![], 2).unwrap();
    project2.discover_all().unwrap();
    assert!(project2.build().unwrap().is_success());

    let after = mtime(&project2.target("app").unwrap().output.to_path_buf());
    assert!(after > before, "a changed compile template must force a recompile and re-link");
}

/// S4: a project with `lib` and `app`, where `app`'s source includes a
/// header from `lib`'s directory. The scheduler must discover the
/// dependency, build `lib` first, and forward `lib`'s output into
/// `app`'s link command.
#[test]
fn s4_cross_target_dependency_is_discovered_and_linked() {
    let dir = tempdir().unwrap();
    write(dir.path(), "lib/api.h", "");
    write(dir.path(), "lib/api.cpp", "#include \"api.h\"\n");
    write(dir.path(), "app/src.cpp", "#include \"../lib/api.h\"\nint main(){}\n");

    let lib_wd = Path::new(dir.path().join("lib"), true);
    let lib_config = simple_config("api.cpp", "touch <output>", "touch <output>");

    let app_wd = Path::new(dir.path().join("app"), true);
    let app_config = simple_config("src.cpp", "touch <output>", "echo <libs> > <output>");

    let specs = vec![
        TargetSpec { name: "lib".to_string(), wd: lib_wd, config: lib_config },
        TargetSpec { name: "app".to_string(), wd: app_wd, config: app_config },
    ];
    let (mut project, _scanner, _commands) = build_project(specs, vec![], 2).unwrap();
    project.discover_all().unwrap();

    assert!(project.target("app").unwrap().depends_on.contains("lib"));

    let report = project.build().unwrap();
    assert!(report.is_success());

    let built_order: Vec<&str> =
        report.outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(built_order, vec!["lib", "app"]);
    for (_, outcome) in &report.outcomes {
        assert_eq!(*outcome, TargetOutcome::Built);
    }

    let lib_output = project.target("lib").unwrap().output.display();
    let app_output = project.target("app").unwrap().output.to_path_buf();
    let linked = fs::read_to_string(app_output).unwrap();
    assert!(linked.contains(&lib_output), "app's link line must carry lib's output: {linked}");
}

/// S5: independent targets with no dependency edge compile in parallel,
/// bounded by the process pool's global cap, and each one's output lines
/// stay whole and correctly prefixed.
#[test]
fn s5_independent_targets_respect_global_cap_and_prefix() {
    let dir = tempdir().unwrap();
    for name in ["a", "b", "c"] {
        write(dir.path(), &format!("{name}/main.cpp"), "int main(){}\n");
    }

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = lines.clone();
    let mux = OutputMux::new(move |_is_stderr, line| {
        sink_lines.lock().unwrap().push(line.to_string());
    });
    let pool = ProcessPool::new(2, Arc::new(mux));

    let scanner = Arc::new(IncludeScanner::new(vec![]));
    let commands = Arc::new(mymake::CommandCache::new());

    let targets: Vec<Target> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let wd = Path::new(dir.path().join(name), true);
            let config = simple_config(
                "main.cpp",
                &format!("echo hello-from-{name}; sleep 0.3; touch <output>"),
                "touch <output>",
            );
            Target::new(name, wd, config, scanner.clone(), commands.clone())
        })
        .collect();

    let mut project = Project::new(targets, pool.clone());
    project.discover_all().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let max_live: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

    let monitor_pool = pool.clone();
    let monitor_done = done.clone();
    let monitor_max = max_live.clone();
    let monitor = std::thread::spawn(move || {
        while !monitor_done.load(Ordering::SeqCst) {
            let live = monitor_pool.live_count();
            let mut max = monitor_max.lock().unwrap();
            if live > *max {
                *max = live;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    let report = project.build().unwrap();
    done.store(true, Ordering::SeqCst);
    monitor.join().unwrap();

    assert!(report.is_success());
    assert!(*max_live.lock().unwrap() <= 2, "global process cap was exceeded");

    std::thread::sleep(Duration::from_millis(100));
    let captured = lines.lock().unwrap();
    for name in ["a", "b", "c"] {
        let expected = format!("[{name}] hello-from-{name}");
        assert!(
            captured.contains(&expected),
            "expected a whole, correctly prefixed line for {name}: {captured:?}"
        );
    }
}

/// S6: a non-pch source whose first include isn't the configured pch
/// header is a fatal ordering violation, reported before any process is
/// spawned for that target.
#[test]
fn s6_pch_order_violation_is_fatal() {
    let dir = tempdir().unwrap();
    write(dir.path(), "pch.h", "");
    write(dir.path(), "a.cpp", "#include \"pch.h\"\nint main(){}\n");
    write(dir.path(), "other.h", "");
    write(dir.path(), "b.cpp", "#include \"other.h\"\nvoid f(){}\n");

    let wd = Path::new(dir.path(), true);
    let mut config = simple_config("a.cpp", "touch <output>", "touch <output>");
    config.set_array("input", vec!["a.cpp".to_string(), "b.cpp".to_string()]);
    config.set_str("pch", "pch.h");

    let specs = vec![TargetSpec { name: "app".to_string(), wd, config }];
    let (mut project, _scanner, _commands) = build_project(specs, vec![], 2).unwrap();

    let err = project.discover_all().unwrap_err();
    assert!(matches!(err, mymake::MymakeError::PchOrder { .. }));
}

