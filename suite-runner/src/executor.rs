// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution of a single suite.
//!
//! The scheduler does not launch processes itself: it hands every job to a [`SuiteExecutor`].
//! [`ProcessExecutor`] is the executor used by `suite-run`.

use crate::{
    discovery::{TestBinary, TestKind},
    errors::ExecuteError,
    plan::Pass,
    rules::SuiteFilter,
    stopwatch::StopwatchStart,
};
use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::RecvTimeoutError;
use duct::{Handle, cmd};
use serde::Serialize;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    process::ExitStatus,
    time::Duration,
};
use tracing::debug;

/// Everything an executor needs to know about one job, apart from how to invoke the binary.
#[derive(Clone, Debug)]
pub struct JobContext<'a> {
    /// The binary to run.
    pub binary: &'a TestBinary,

    /// The pass the job belongs to.
    pub pass: Pass,

    /// The position of the job in dispatch order within its pass.
    pub index: usize,

    /// A directory for per-suite output such as logs. Shared by all jobs.
    pub output_dir: &'a Utf8Path,

    /// The path of this job's result fragment. Unique to the job.
    pub fragment: &'a Utf8Path,

    /// The wall-clock timeout for the suite.
    pub timeout: Duration,
}

/// Launches test binaries and writes their result fragments.
///
/// Implementations must enforce the timeout in [`JobContext`] themselves, and report every
/// failure (including a timeout) as an error.
pub trait SuiteExecutor: Sync {
    /// Runs a framework binary, optionally restricted by a gtest filter expression.
    fn run_framework(&self, cx: &JobContext<'_>, filter: Option<&str>) -> Result<(), ExecuteError>;

    /// Runs a standalone binary with its fixed arguments.
    fn run_standalone(&self, cx: &JobContext<'_>, args: &[String]) -> Result<(), ExecuteError>;
}

impl<E: SuiteExecutor + ?Sized> SuiteExecutor for &E {
    fn run_framework(&self, cx: &JobContext<'_>, filter: Option<&str>) -> Result<(), ExecuteError> {
        (**self).run_framework(cx, filter)
    }

    fn run_standalone(&self, cx: &JobContext<'_>, args: &[String]) -> Result<(), ExecuteError> {
        (**self).run_standalone(cx, args)
    }
}

/// How a job invokes its binary, decided once from the suite's kind and filter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Invocation {
    /// A framework binary with an optional gtest filter.
    Framework {
        /// The filter expression, or `None` to run every sub-test.
        filter: Option<String>,
    },

    /// A standalone binary with fixed arguments.
    Standalone {
        /// The arguments.
        args: Vec<String>,
    },
}

impl Invocation {
    /// Creates the invocation for a suite of the given kind, run with the given filter.
    ///
    /// Standalone binaries cannot be filtered, so their filter is dropped.
    pub fn new(kind: &TestKind, filter: &SuiteFilter) -> Self {
        match kind {
            TestKind::Framework => Invocation::Framework {
                filter: filter.to_gtest_filter(),
            },
            TestKind::Standalone { args } => {
                if !filter.is_all() {
                    debug!(%filter, "standalone suites cannot be filtered, ignoring filter");
                }
                Invocation::Standalone { args: args.clone() }
            }
        }
    }

    /// Runs the invocation with the given executor.
    pub fn execute(
        &self,
        executor: &(impl SuiteExecutor + ?Sized),
        cx: &JobContext<'_>,
    ) -> Result<(), ExecuteError> {
        match self {
            Invocation::Framework { filter } => executor.run_framework(cx, filter.as_deref()),
            Invocation::Standalone { args } => executor.run_standalone(cx, args),
        }
    }
}

/// Runs suites as child processes.
///
/// Combined stdout and stderr of each suite go to `<output-dir>/<index>-<name>.<pass>.log`. A single
/// JSON line describing the suite is appended to the job's fragment once the process has been
/// started, whatever its outcome.
#[derive(Clone, Debug, Default)]
pub struct ProcessExecutor {
    _private: (),
}

impl ProcessExecutor {
    /// The argument used to pass a filter expression to framework binaries.
    pub const FILTER_ARG: &'static str = "--gtest_filter";

    /// Creates a new process executor.
    pub fn new() -> Self {
        Self::default()
    }

    fn run(
        &self,
        cx: &JobContext<'_>,
        kind: &'static str,
        args: Vec<String>,
        filter: Option<&str>,
    ) -> Result<(), ExecuteError> {
        let binary = cx.binary.path();
        let log = log_path(cx.output_dir, cx.binary, cx.pass, cx.index);

        let stopwatch = StopwatchStart::now();
        let handle = cmd(binary.as_std_path(), &args)
            .dir(cx.binary.parent().as_std_path())
            .stderr_to_stdout()
            .stdout_path(log.as_std_path())
            .unchecked()
            .start()
            .map_err(|error| ExecuteError::Spawn {
                binary: binary.to_owned(),
                error,
            })?;

        let waited = wait_with_timeout(&handle, cx.timeout);
        let end = stopwatch.end();

        let (status, result) = match waited {
            Ok(Some(status)) if status.success() => (SuiteStatus::Pass, Ok(())),
            Ok(Some(status)) => (
                SuiteStatus::Fail,
                Err(match status.code() {
                    Some(exit_code) => ExecuteError::Failed {
                        binary: binary.to_owned(),
                        exit_code,
                    },
                    None => ExecuteError::Terminated {
                        binary: binary.to_owned(),
                    },
                }),
            ),
            Ok(None) => (
                SuiteStatus::Timeout,
                Err(ExecuteError::Timeout {
                    binary: binary.to_owned(),
                    timeout: cx.timeout,
                }),
            ),
            Err(error) => (
                SuiteStatus::Fail,
                Err(ExecuteError::Wait {
                    binary: binary.to_owned(),
                    error,
                }),
            ),
        };

        let record = SuiteRecord {
            name: cx.binary.name(),
            path: binary,
            kind,
            pass: cx.pass,
            filter,
            status,
            exit_code: waited_code(&result),
            start_time: end.start_unix_secs(),
            duration_secs: end.duration.as_secs_f64(),
            log: &log,
        };
        append_record(cx.fragment, &record)?;

        debug!(
            name = cx.binary.name(),
            ?status,
            elapsed = ?end.duration,
            "suite process finished"
        );
        result
    }
}

impl SuiteExecutor for ProcessExecutor {
    fn run_framework(&self, cx: &JobContext<'_>, filter: Option<&str>) -> Result<(), ExecuteError> {
        let args = filter
            .map(|filter| vec![format!("{}={filter}", Self::FILTER_ARG)])
            .unwrap_or_default();
        self.run(cx, "framework", args, filter)
    }

    fn run_standalone(&self, cx: &JobContext<'_>, args: &[String]) -> Result<(), ExecuteError> {
        self.run(cx, "standalone", args.to_vec(), None)
    }
}

/// Waits for the process to exit, killing it once the timeout elapses.
///
/// Returns `Ok(None)` if the process was killed because of the timeout.
fn wait_with_timeout(handle: &Handle, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    std::thread::scope(|s| {
        let (sender, receiver) = crossbeam_channel::bounded(1);

        // This thread only waits for the process to exit. Killing the process makes it return.
        s.spawn(move || {
            let status = handle.wait().map(|output| output.status);
            // We don't care if the receiver got the message or not.
            let _ = sender.send(status);
        });

        match receiver.recv_timeout(timeout) {
            Ok(status) => status.map(Some),
            Err(RecvTimeoutError::Timeout) => {
                handle.kill()?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::other(
                "waiter thread exited without reporting a status",
            )),
        }
    })
}

fn waited_code(result: &Result<(), ExecuteError>) -> Option<i32> {
    match result {
        Ok(()) => Some(0),
        Err(ExecuteError::Failed { exit_code, .. }) => Some(*exit_code),
        Err(_) => None,
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
enum SuiteStatus {
    Pass,
    Fail,
    Timeout,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct SuiteRecord<'a> {
    name: &'a str,
    path: &'a Utf8Path,
    kind: &'static str,
    pass: Pass,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    status: SuiteStatus,
    exit_code: Option<i32>,
    start_time: f64,
    duration_secs: f64,
    log: &'a Utf8Path,
}

fn append_record(fragment: &Utf8Path, record: &SuiteRecord<'_>) -> Result<(), ExecuteError> {
    let io_error = |error| ExecuteError::Io {
        path: fragment.to_owned(),
        error,
    };
    let mut line = serde_json::to_vec(record).map_err(|error| io_error(error.into()))?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(fragment)
        .map_err(io_error)?;
    file.write_all(&line).map_err(io_error)
}

/// Returns the log path [`ProcessExecutor`] uses for the job at `index` in a pass.
///
/// Binaries in different directories may share a name, so the dispatch index is part of the path.
pub fn log_path(output_dir: &Utf8Path, binary: &TestBinary, pass: Pass, index: usize) -> Utf8PathBuf {
    output_dir.join(format!("{index:05}-{}.{pass}.log", binary.name()))
}
