// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{fs, time::Duration};
use suite_runner::{
    aggregator::RESULT_STREAM_NAME,
    discovery::{TestBinary, TestKind, TestSuite},
    errors::RunError,
    plan::{Pass, PlannedJob},
    rules::SuiteFilter,
    run::{RunDirs, RunSummary, TestRun},
    runner::{Job, PassRunner, RunState},
};
use test_case::test_case;

const RULES: &str = indoc! {r#"
    [run]
    test-threads = 4
    progress-interval = "50ms"

    [excluded]
    "unittest_bar{.exe,}" = "*"
    "unittest_partial{.exe,}" = ["Flaky.A", "Flaky.B"]
    "unittest_both{.exe,}" = "Both.Excluded"

    [isolated]
    "unittest_bl{.exe,}" = "TestA"
    "unittest_both{.exe,}" = "Both.Isolated"
    "unittest_alone{.exe,}" = "*"

    [manual]
    "ceph_test_manual*" = "*"

    [slow]
    "ceph_test_slow*" = "*"

    [standalone]
    "ceph_test_rados_api*" = "--pool rbd"
"#};

const BINARIES: &[&str] = &[
    "unittest_foo",
    "unittest_bar",
    "unittest_partial",
    "unittest_both",
    "unittest_bl",
    "unittest_alone",
    "ceph_test_manual",
    "ceph_test_slow",
    "sub/ceph_test_rados_api_io",
    "not_a_test",
];

fn run_env(env: &TestEnv, config: &str, executor: &MockExecutor) -> Result<RunSummary> {
    let config = env.config(config);
    let run = TestRun::new(RunDirs::new(env.test_dir(), env.result_dir()), &config, executor);
    Ok(run.execute()?)
}

fn framework(filter: Option<&str>) -> CallKind {
    CallKind::Framework {
        filter: filter.map(ToOwned::to_owned),
    }
}

#[test]
fn test_routing() -> Result<()> {
    test_init();

    let env = TestEnv::new(BINARIES);
    let executor = MockExecutor::new();
    let summary = run_env(&env, RULES, &executor)?;
    ensure!(summary.is_success(), "all suites passed");

    let dispatched = |name: &str| -> Vec<(Pass, CallKind)> {
        executor
            .calls_for(name)
            .into_iter()
            .map(|call| (call.pass, call.kind))
            .collect()
    };

    // Unmatched suites run once, unfiltered, in the parallel pass.
    assert_eq!(dispatched("unittest_foo"), vec![(Pass::Parallel, framework(None))]);
    // Wildcard exclusions never run.
    assert_eq!(dispatched("unittest_bar"), vec![]);
    // Partial exclusions run everything else.
    assert_eq!(
        dispatched("unittest_partial"),
        vec![(Pass::Parallel, framework(Some("-Flaky.A:Flaky.B")))]
    );
    // Isolated suites run once, in the isolated pass.
    assert_eq!(
        dispatched("unittest_bl"),
        vec![(Pass::Isolated, framework(Some("TestA")))]
    );
    assert_eq!(
        dispatched("unittest_both"),
        vec![(Pass::Isolated, framework(Some("Both.Isolated")))]
    );
    assert_eq!(dispatched("unittest_alone"), vec![(Pass::Isolated, framework(None))]);
    // Manual suites never run, and slow suites run unless skipped.
    assert_eq!(dispatched("ceph_test_manual"), vec![]);
    assert_eq!(dispatched("ceph_test_slow"), vec![(Pass::Parallel, framework(None))]);
    // Standalone suites get their fixed arguments.
    assert_eq!(
        dispatched("ceph_test_rados_api_io"),
        vec![(
            Pass::Parallel,
            CallKind::Standalone {
                args: vec!["--pool".to_owned(), "rbd".to_owned()]
            }
        )]
    );
    assert_eq!(dispatched("not_a_test"), vec![]);

    assert_eq!(summary.parallel.dispatched, 4);
    assert_eq!(summary.isolated.dispatched, 3);
    assert_eq!(summary.excluded, 2);
    Ok(())
}

#[test]
fn test_skip_slow() -> Result<()> {
    test_init();

    let env = TestEnv::new(BINARIES);
    let executor = MockExecutor::new();
    let config = RULES.replace("test-threads = 4", "test-threads = 4\nskip-slow = true");
    let summary = run_env(&env, &config, &executor)?;

    ensure!(executor.calls_for("ceph_test_slow").is_empty(), "slow suite skipped");
    assert_eq!(summary.excluded, 3);
    Ok(())
}

#[test]
fn test_pass_barrier_and_isolation() -> Result<()> {
    test_init();

    let env = TestEnv::new(&["unittest_a", "unittest_b", "unittest_c", "unittest_i1", "unittest_i2"]);
    let slow = Script {
        duration: Duration::from_millis(100),
        ..Script::default()
    };
    let executor = MockExecutor::new()
        .script("unittest_a", slow.clone())
        .script("unittest_b", slow.clone())
        .script("unittest_c", slow.clone())
        .script("unittest_i1", slow.clone())
        .script("unittest_i2", slow);
    let config = indoc! {r#"
        [run]
        test-threads = 3

        [isolated]
        "unittest_i*" = "*"
    "#};
    run_env(&env, config, &executor)?;

    let calls = executor.calls();
    let last_parallel = calls
        .iter()
        .filter(|call| call.pass == Pass::Parallel)
        .map(|call| call.finished)
        .max()
        .expect("parallel suites ran");
    let mut isolated: Vec<_> = calls.iter().filter(|call| call.pass == Pass::Isolated).collect();
    assert_eq!(isolated.len(), 2);
    isolated.sort_by_key(|call| call.started);

    ensure!(
        isolated[0].started >= last_parallel,
        "isolated pass starts after the parallel pass is done"
    );
    ensure!(
        isolated[1].started >= isolated[0].finished,
        "isolated suites run one at a time"
    );
    Ok(())
}

#[test]
fn test_failures_are_contained() -> Result<()> {
    test_init();

    let env = TestEnv::new(&["unittest_ok", "unittest_fail", "unittest_panic", "unittest_hang", "unittest_iso"]);
    let executor = MockExecutor::new()
        .script(
            "unittest_fail",
            Script {
                behavior: Behavior::Fail,
                ..Script::default()
            },
        )
        .script(
            "unittest_panic",
            Script {
                behavior: Behavior::Panic,
                ..Script::default()
            },
        )
        .script(
            "unittest_hang",
            Script {
                behavior: Behavior::Timeout,
                ..Script::default()
            },
        );
    let config = indoc! {r#"
        [isolated]
        "unittest_iso{.exe,}" = "*"
    "#};
    let summary = run_env(&env, config, &executor)?;

    ensure!(!summary.is_success(), "the run failed");
    ensure!(summary.check().is_err(), "the verdict is an error");
    assert_eq!(summary.job_count(), 5, "every job produced an outcome");
    assert_eq!(summary.failed(), 3);
    assert_eq!(summary.isolated.passed, 1, "the isolated pass still ran");

    let mut failed: Vec<_> = summary.failures.iter().map(|f| f.name.clone()).collect();
    failed.sort();
    assert_eq!(failed, vec![exe("unittest_fail"), exe("unittest_hang"), exe("unittest_panic")]);
    Ok(())
}

#[test_case(&[] ; "no failures")]
#[test_case(&["unittest_b"] ; "one failure")]
#[test_case(&["unittest_a", "unittest_c"] ; "several failures")]
fn test_failure_flag(failing: &[&str]) -> Result<()> {
    test_init();

    let env = TestEnv::new(&["unittest_a", "unittest_b", "unittest_c"]);
    let executor = failing.iter().fold(MockExecutor::new(), |executor, name| {
        executor.script(
            name,
            Script {
                behavior: Behavior::Fail,
                ..Script::default()
            },
        )
    });
    let summary = run_env(&env, "", &executor)?;
    assert_eq!(summary.is_success(), failing.is_empty());
    assert_eq!(summary.failed(), failing.len());
    Ok(())
}

#[test]
fn test_result_stream() -> Result<()> {
    test_init();

    let env = TestEnv::new(&["unittest_a", "unittest_big", "unittest_c", "unittest_iso"]);
    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let executor = MockExecutor::new().script(
        "unittest_big",
        Script {
            fragment: Some(big.clone()),
            ..Script::default()
        },
    );
    // A fragment left over from an earlier run must not end up in this run's stream.
    fs::write(
        env.result_dir().join("subunit-1-parallel-99999-stale.part"),
        b"stale",
    )?;
    fs::write(env.result_dir().join(RESULT_STREAM_NAME), b"previous run")?;

    let config = indoc! {r#"
        [run]
        test-threads = 2

        [isolated]
        "unittest_iso{.exe,}" = "*"
    "#};
    let summary = run_env(&env, config, &executor)?;

    let mut expected = MockExecutor::expected_fragment("unittest_a", Pass::Parallel);
    expected.extend_from_slice(&big);
    expected.extend(MockExecutor::expected_fragment("unittest_c", Pass::Parallel));
    expected.extend(MockExecutor::expected_fragment("unittest_iso", Pass::Isolated));

    let stream = fs::read(env.result_dir().join(RESULT_STREAM_NAME))?;
    ensure!(stream == expected, "stream holds every fragment once, in dispatch order");

    let merge = summary.merge.expect("merge succeeded");
    assert_eq!(merge.fragments, 4);
    assert_eq!(merge.bytes, expected.len() as u64);

    let leftovers: Vec<_> = fs::read_dir(env.result_dir())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
        .collect();
    ensure!(leftovers.is_empty(), "fragments are deleted after merging");
    Ok(())
}

#[test]
fn test_empty_run() -> Result<()> {
    test_init();

    let env = TestEnv::new(&["not_a_test"]);
    let executor = MockExecutor::new();
    let summary = run_env(&env, "", &executor)?;

    ensure!(summary.is_empty(), "nothing ran");
    ensure!(summary.is_success(), "an empty run has no failures");
    let stream = fs::read(env.result_dir().join(RESULT_STREAM_NAME))?;
    ensure!(stream.is_empty(), "the stream exists and is empty");
    Ok(())
}

#[test]
fn test_missing_test_dir() -> Result<()> {
    test_init();

    let env = TestEnv::new(&[]);
    let config = env.config("");
    let executor = MockExecutor::new();
    let run = TestRun::new(
        RunDirs::new(env.test_dir().join("missing"), env.result_dir()),
        &config,
        &executor,
    );
    let err = run.execute().expect_err("discovery fails");
    ensure!(matches!(err, RunError::Discovery(_)), "unexpected error: {err:?}");
    ensure!(executor.calls().is_empty(), "nothing ran");
    Ok(())
}

#[test]
fn test_worker_pool_bound() -> Result<()> {
    test_init();

    let names = ["unittest_1", "unittest_2", "unittest_3"];
    let durations = [200, 200, 1000];
    let executor = names
        .iter()
        .zip(durations)
        .fold(MockExecutor::new(), |executor, (name, millis)| {
            executor.script(
                name,
                Script {
                    duration: Duration::from_millis(millis),
                    ..Script::default()
                },
            )
        });

    let env = TestEnv::new(&[]);
    let planned = names.iter().map(|name| PlannedJob {
        suite: TestSuite {
            binary: TestBinary::new(env.test_dir().join(exe(name))).expect("path has a file name"),
            kind: TestKind::Framework,
        },
        filter: SuiteFilter::All,
    });
    let jobs = Job::for_pass(Pass::Parallel, planned, &env.result_dir(), Duration::from_secs(60));

    let state = RunState::new();
    let output_dir = env.result_dir();
    let runner = PassRunner::new(&executor, &state, &output_dir, Duration::from_millis(100));
    let outcome = runner.run_pass(Pass::Parallel, jobs, 2)?;

    // Two suites start together; the third starts when the first worker frees up.
    ensure!(
        outcome.duration >= Duration::from_millis(1150),
        "pass took {:?}, the third job must wait for a worker",
        outcome.duration
    );
    ensure!(
        outcome.duration < Duration::from_millis(1900),
        "pass took {:?}, the first two jobs must run concurrently",
        outcome.duration
    );
    assert_eq!(executor.max_running(), 2);
    assert_eq!(outcome.passed(), 3);
    Ok(())
}
