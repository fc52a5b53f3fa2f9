// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs real processes through [`ProcessExecutor`].

use crate::fixtures::*;
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Result, ensure};
use std::{fs, os::unix::fs::PermissionsExt, time::Duration};
use suite_runner::{
    discovery::{TestBinary, TestKind, TestSuite},
    errors::ExecuteError,
    executor::{JobContext, ProcessExecutor, SuiteExecutor, log_path},
    plan::{Pass, PlannedJob},
    rules::SuiteFilter,
    runner::{Job, PassRunner, RunState},
};

fn script(dir: &Utf8Path, name: &str, body: &str) -> TestBinary {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("wrote script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("made script executable");
    TestBinary::new(path).expect("path has a file name")
}

fn read_record(fragment: &Utf8Path) -> Result<serde_json::Value> {
    let contents = fs::read_to_string(fragment)?;
    let line = contents.lines().next().unwrap_or_default();
    Ok(serde_json::from_str(line)?)
}

#[test]
fn test_framework_filter_and_log() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let binary = script(dir.path(), "unittest_echo", r#"echo "args: $*""#);
    let fragment = dir.path().join("subunit-echo.part");
    let cx = JobContext {
        binary: &binary,
        pass: Pass::Parallel,
        index: 0,
        output_dir: dir.path(),
        fragment: &fragment,
        timeout: Duration::from_secs(30),
    };

    ProcessExecutor::new().run_framework(&cx, Some("-A.B:C.D"))?;

    let log = fs::read_to_string(log_path(dir.path(), &binary, Pass::Parallel, 0))?;
    ensure!(
        log.trim() == "args: --gtest_filter=-A.B:C.D",
        "unexpected log contents: {log:?}"
    );

    let record = read_record(&fragment)?;
    ensure!(record["status"] == "pass", "record: {record}");
    ensure!(record["exit-code"] == 0, "record: {record}");
    ensure!(record["filter"] == "-A.B:C.D", "record: {record}");
    ensure!(record["kind"] == "framework", "record: {record}");
    Ok(())
}

#[test]
fn test_standalone_failure() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let binary = script(dir.path(), "ceph_test_exit", r#"echo "$1 $2" >&2; exit 3"#);
    let fragment = dir.path().join("subunit-exit.part");
    let cx = JobContext {
        binary: &binary,
        pass: Pass::Isolated,
        index: 0,
        output_dir: dir.path(),
        fragment: &fragment,
        timeout: Duration::from_secs(30),
    };

    let args = ["--pool".to_owned(), "rbd".to_owned()];
    let err = ProcessExecutor::new()
        .run_standalone(&cx, &args)
        .expect_err("script exits with 3");
    ensure!(
        matches!(err, ExecuteError::Failed { exit_code: 3, .. }),
        "unexpected error: {err:?}"
    );

    let log = fs::read_to_string(log_path(dir.path(), &binary, Pass::Isolated, 0))?;
    ensure!(log.trim() == "--pool rbd", "stderr is captured: {log:?}");
    let record = read_record(&fragment)?;
    ensure!(record["status"] == "fail", "record: {record}");
    ensure!(record["exit-code"] == 3, "record: {record}");
    Ok(())
}

#[test]
fn test_timeout_kills_suite() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let binary = script(dir.path(), "unittest_hang", "exec sleep 30");
    let fragment = dir.path().join("subunit-hang.part");
    let cx = JobContext {
        binary: &binary,
        pass: Pass::Parallel,
        index: 0,
        output_dir: dir.path(),
        fragment: &fragment,
        timeout: Duration::from_millis(300),
    };

    let start = std::time::Instant::now();
    let err = ProcessExecutor::new()
        .run_framework(&cx, None)
        .expect_err("suite times out");
    ensure!(
        matches!(err, ExecuteError::Timeout { .. }),
        "unexpected error: {err:?}"
    );
    ensure!(
        start.elapsed() < Duration::from_secs(10),
        "suite was killed, took {:?}",
        start.elapsed()
    );
    let record = read_record(&fragment)?;
    ensure!(record["status"] == "timeout", "record: {record}");
    Ok(())
}

#[test]
fn test_missing_binary() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let binary = TestBinary::new(dir.path().join("unittest_missing")).expect("path has a file name");
    let fragment = dir.path().join("subunit-missing.part");
    let cx = JobContext {
        binary: &binary,
        pass: Pass::Parallel,
        index: 0,
        output_dir: dir.path(),
        fragment: &fragment,
        timeout: Duration::from_secs(5),
    };

    let err = ProcessExecutor::new()
        .run_framework(&cx, None)
        .expect_err("binary does not exist");
    ensure!(
        matches!(err, ExecuteError::Spawn { .. }),
        "unexpected error: {err:?}"
    );
    ensure!(!fragment.exists(), "no fragment for a suite that never started");
    Ok(())
}

#[test]
fn test_same_name_in_different_dirs() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let (bin_a, bin_b) = (dir.path().join("a"), dir.path().join("b"));
    let (out_dir, result_dir) = (dir.path().join("out"), dir.path().join("results"));
    for d in [&bin_a, &bin_b, &out_dir, &result_dir] {
        fs::create_dir(d)?;
    }
    let binaries = [
        script(&bin_a, "unittest_same", "echo OUTPUT_FROM_A"),
        script(&bin_b, "unittest_same", "sleep 0.1; echo OUTPUT_FROM_B"),
    ];
    let planned = binaries.iter().map(|binary| PlannedJob {
        suite: TestSuite {
            binary: binary.clone(),
            kind: TestKind::Framework,
        },
        filter: SuiteFilter::All,
    });
    let jobs = Job::for_pass(Pass::Parallel, planned, &result_dir, Duration::from_secs(30));

    let executor = ProcessExecutor::new();
    let state = RunState::new();
    let runner = PassRunner::new(&executor, &state, &out_dir, Duration::from_secs(1));
    let outcome = runner.run_pass(Pass::Parallel, jobs, 2)?;
    ensure!(outcome.passed() == 2, "both suites pass: {outcome:?}");

    let mut logs: Vec<_> = fs::read_dir(&out_dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<Result<_, _>>()?;
    logs.sort();
    ensure!(logs.len() == 2, "one log per suite: {logs:?}");

    for (index, (binary, expected)) in binaries.iter().zip(["OUTPUT_FROM_A", "OUTPUT_FROM_B"]).enumerate() {
        let log = fs::read_to_string(log_path(&out_dir, binary, Pass::Parallel, index))?;
        ensure!(log.trim() == expected, "log {index} has {log:?}");
    }
    Ok(())
}
