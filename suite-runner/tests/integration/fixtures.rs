// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use std::{
    collections::HashMap,
    fs,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use suite_runner::{
    config::RunnerConfig,
    errors::ExecuteError,
    executor::{JobContext, SuiteExecutor},
    plan::Pass,
};

pub(crate) fn test_init() {
    // Ignore the error if another test already installed the handler.
    let _ = color_eyre::install();
}

/// Returns the file name of a test binary on this platform.
pub(crate) fn exe(name: &str) -> String {
    format!("{name}{}", std::env::consts::EXE_SUFFIX)
}

/// A scratch test directory, result directory and config file.
pub(crate) struct TestEnv {
    dir: Utf8TempDir,
}

impl TestEnv {
    pub(crate) fn new(binaries: &[&str]) -> Self {
        let dir = Utf8TempDir::new().expect("created temp dir");
        fs::create_dir(dir.path().join("tests")).expect("created test dir");
        fs::create_dir(dir.path().join("results")).expect("created result dir");
        let env = Self { dir };
        for name in binaries {
            env.add_binary(name);
        }
        env
    }

    pub(crate) fn add_binary(&self, rel: &str) {
        let path = self.test_dir().join(exe(rel));
        fs::create_dir_all(path.parent().expect("path has a parent")).expect("created parent");
        fs::write(path, b"").expect("wrote binary");
    }

    pub(crate) fn test_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("tests")
    }

    pub(crate) fn result_dir(&self) -> Utf8PathBuf {
        self.dir.path().join("results")
    }

    pub(crate) fn config(&self, contents: &str) -> RunnerConfig {
        let path = self.dir.path().join("suite-run.toml");
        fs::write(&path, contents).expect("wrote config");
        RunnerConfig::from_sources(Some(&path)).expect("config is valid")
    }
}

/// What a scripted suite does when run.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) enum Behavior {
    #[default]
    Pass,
    Fail,
    Timeout,
    Panic,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Script {
    pub(crate) duration: Duration,
    pub(crate) behavior: Behavior,
    /// The bytes written to the fragment. Defaults to one line naming the suite and pass.
    pub(crate) fragment: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum CallKind {
    Framework { filter: Option<String> },
    Standalone { args: Vec<String> },
}

#[derive(Clone, Debug)]
pub(crate) struct Call {
    pub(crate) name: String,
    pub(crate) pass: Pass,
    pub(crate) kind: CallKind,
    pub(crate) started: Instant,
    pub(crate) finished: Instant,
}

/// An in-memory executor: sleeps, writes fragments and fails as scripted, and records every call.
#[derive(Debug, Default)]
pub(crate) struct MockExecutor {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripts the binary with the given base name.
    pub(crate) fn script(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(exe(name), script);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("lock not poisoned").clone()
    }

    pub(crate) fn calls_for(&self, name: &str) -> Vec<Call> {
        let name = exe(name);
        self.calls().into_iter().filter(|call| call.name == name).collect()
    }

    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub(crate) fn expected_fragment(name: &str, pass: Pass) -> Vec<u8> {
        format!("{} {pass}\n", exe(name)).into_bytes()
    }

    fn run(&self, cx: &JobContext<'_>, kind: CallKind) -> Result<(), ExecuteError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let started = Instant::now();
        let name = cx.binary.name();
        let script = self.scripts.get(name).cloned().unwrap_or_default();
        std::thread::sleep(script.duration);

        let fragment = script
            .fragment
            .unwrap_or_else(|| format!("{name} {}\n", cx.pass).into_bytes());
        write_fragment(cx.fragment, &fragment);

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().expect("lock not poisoned").push(Call {
            name: name.to_owned(),
            pass: cx.pass,
            kind,
            started,
            finished: Instant::now(),
        });

        match script.behavior {
            Behavior::Pass => Ok(()),
            Behavior::Fail => Err(ExecuteError::Failed {
                binary: cx.binary.path().to_owned(),
                exit_code: 1,
            }),
            Behavior::Timeout => Err(ExecuteError::Timeout {
                binary: cx.binary.path().to_owned(),
                timeout: cx.timeout,
            }),
            Behavior::Panic => panic!("scripted panic in {name}"),
        }
    }
}

fn write_fragment(path: &Utf8Path, bytes: &[u8]) {
    assert!(!path.exists(), "fragment {path} is unique to its job");
    fs::write(path, bytes).expect("wrote fragment");
}

impl SuiteExecutor for MockExecutor {
    fn run_framework(&self, cx: &JobContext<'_>, filter: Option<&str>) -> Result<(), ExecuteError> {
        self.run(
            cx,
            CallKind::Framework {
                filter: filter.map(ToOwned::to_owned),
            },
        )
    }

    fn run_standalone(&self, cx: &JobContext<'_>, args: &[String]) -> Result<(), ExecuteError> {
        self.run(
            cx,
            CallKind::Standalone {
                args: args.to_vec(),
            },
        )
    }
}
