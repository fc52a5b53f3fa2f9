// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run controller: drives discovery, both passes and aggregation, and computes the verdict.

use crate::{
    aggregator::{self, FRAGMENT_GLOB, MergeSummary, RESULT_STREAM_NAME, StreamState},
    config::RunnerConfig,
    discovery,
    errors::{DisplayErrorChain, RunError, TestRunFailed},
    executor::SuiteExecutor,
    plan::{Pass, RunPlan},
    runner::{Job, PassOutcome, PassRunner, RunState},
    stopwatch::StopwatchStart,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fs, io, time::Duration};
use tracing::{debug, error, info, warn};

/// The directories a run reads from and writes to.
#[derive(Clone, Debug)]
pub struct RunDirs {
    /// The root of the tree of test binaries.
    pub test_dir: Utf8PathBuf,

    /// The directory that receives result fragments, the merged result stream, and suite logs.
    pub result_dir: Utf8PathBuf,
}

impl RunDirs {
    /// Creates a new set of run directories.
    pub fn new(test_dir: impl Into<Utf8PathBuf>, result_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            test_dir: test_dir.into(),
            result_dir: result_dir.into(),
        }
    }

    /// Returns the directory for per-suite output.
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.result_dir.join("out")
    }

    /// Returns the path of the merged result stream.
    pub fn result_stream(&self) -> Utf8PathBuf {
        self.result_dir.join(RESULT_STREAM_NAME)
    }
}

/// A single run over a test directory.
pub struct TestRun<'cfg, E> {
    dirs: RunDirs,
    config: &'cfg RunnerConfig,
    executor: E,
}

impl<'cfg, E: SuiteExecutor> TestRun<'cfg, E> {
    /// Creates a new run.
    pub fn new(dirs: RunDirs, config: &'cfg RunnerConfig, executor: E) -> Self {
        Self {
            dirs,
            config,
            executor,
        }
    }

    /// Returns the run's directories.
    pub fn dirs(&self) -> &RunDirs {
        &self.dirs
    }

    /// Discovers the test binaries and routes each one, without running anything.
    pub fn plan(&self) -> Result<RunPlan, RunError> {
        let suites = discovery::discover_suites(
            &self.dirs.test_dir,
            &self.config.matcher(),
            self.config.standalone(),
        )?;
        Ok(RunPlan::new(suites, &self.config.rule_set()))
    }

    /// Runs the parallel pass, then the isolated pass, then merges the results.
    ///
    /// Returns an error only if the run could not be started. Suite failures are reported through
    /// the returned summary, and a failed merge is logged along with what is known about the
    /// result stream.
    pub fn execute(&self) -> Result<RunSummary, RunError> {
        let stopwatch = StopwatchStart::now();
        let output_dir = self.dirs.output_dir();
        self.prepare_dirs(&output_dir)?;

        let plan = self.plan()?;
        for excluded in plan.excluded() {
            debug!(
                name = excluded.suite.binary.name(),
                reason = %excluded.reason,
                "skipping suite"
            );
        }
        let excluded = plan.excluded().len();
        let (parallel, isolated) = plan.into_passes();

        let settings = &self.config.run;
        let state = RunState::new();
        let runner = PassRunner::new(
            &self.executor,
            &state,
            &output_dir,
            settings.progress_interval,
        );

        let parallel = runner.run_pass(
            Pass::Parallel,
            Job::for_pass(Pass::Parallel, parallel, &self.dirs.result_dir, settings.timeout),
            settings.worker_count(),
        )?;
        // The isolated pass starts only once every parallel job has reported.
        let isolated = runner.run_pass(
            Pass::Isolated,
            Job::for_pass(Pass::Isolated, isolated, &self.dirs.result_dir, settings.timeout),
            1,
        )?;

        let merge = self.merge_results();

        let summary = RunSummary::new(
            &parallel,
            &isolated,
            excluded,
            merge,
            state.any_failed(),
            stopwatch.elapsed(),
        );
        info!(
            "run finished in {:.3?}: {} suites run, {} passed, {} failed, {} skipped",
            summary.duration,
            summary.job_count(),
            summary.passed(),
            summary.failed(),
            summary.excluded,
        );
        Ok(summary)
    }

    fn prepare_dirs(&self, output_dir: &Utf8Path) -> Result<(), RunError> {
        for dir in [self.dirs.result_dir.as_path(), output_dir] {
            fs::create_dir_all(dir).map_err(|error| RunError::PrepareDir {
                path: dir.to_owned(),
                error,
            })?;
        }

        let removed = aggregator::remove_fragments(&self.dirs.result_dir, FRAGMENT_GLOB)
            .map_err(RunError::CleanFragments)?;
        if removed > 0 {
            warn!("removed {removed} stale result fragments from {}", self.dirs.result_dir);
        }

        let stream = self.dirs.result_stream();
        match fs::remove_file(&stream) {
            Ok(()) => debug!(%stream, "removed previous result stream"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(RunError::PrepareDir {
                    path: stream,
                    error,
                });
            }
        }
        Ok(())
    }

    fn merge_results(&self) -> Option<MergeSummary> {
        let stream = self.dirs.result_stream();
        match aggregator::merge(&self.dirs.result_dir, FRAGMENT_GLOB, &stream) {
            Ok(merge) => {
                info!(
                    "merged {} result fragments ({} bytes) into {stream}",
                    merge.fragments, merge.bytes
                );
                Some(merge)
            }
            Err(merge_error) => {
                error!("{}", DisplayErrorChain::new(&merge_error));
                match StreamState::inspect(&stream) {
                    StreamState::Missing => error!("result stream {stream} does not exist"),
                    StreamState::Present { len, sha256 } => {
                        warn!("result stream {stream} exists: {len} bytes, sha256 {sha256}")
                    }
                    StreamState::Unreadable { message } => {
                        error!("result stream {stream} exists but is unreadable: {message}")
                    }
                }
                None
            }
        }
    }
}

/// Counts for a completed pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PassStats {
    /// The number of jobs dispatched.
    pub dispatched: usize,

    /// The number of jobs that succeeded.
    pub passed: usize,

    /// The number of jobs that failed.
    pub failed: usize,

    /// How long the pass took.
    pub duration: Duration,
}

impl PassStats {
    fn new(outcome: &PassOutcome) -> Self {
        Self {
            dispatched: outcome.outcomes.len(),
            passed: outcome.passed(),
            failed: outcome.failed(),
            duration: outcome.duration,
        }
    }
}

/// A suite that failed, as reported in a [`RunSummary`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailedSuite {
    /// The binary name.
    pub name: String,

    /// The pass it failed in.
    pub pass: Pass,

    /// The error text.
    pub message: String,
}

/// The result of a completed run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Counts for the parallel pass.
    pub parallel: PassStats,

    /// Counts for the isolated pass.
    pub isolated: PassStats,

    /// The number of suites that ran in neither pass.
    pub excluded: usize,

    /// The merge statistics, or `None` if merging failed.
    pub merge: Option<MergeSummary>,

    /// Every failed suite, parallel pass first, each in dispatch order.
    pub failures: Vec<FailedSuite>,

    /// How long the run took.
    pub duration: Duration,

    any_failed: bool,
}

impl RunSummary {
    fn new(
        parallel: &PassOutcome,
        isolated: &PassOutcome,
        excluded: usize,
        merge: Option<MergeSummary>,
        any_failed: bool,
        duration: Duration,
    ) -> Self {
        let failures = parallel
            .outcomes
            .iter()
            .chain(&isolated.outcomes)
            .filter_map(|outcome| {
                Some(FailedSuite {
                    name: outcome.binary.name().to_owned(),
                    pass: outcome.pass,
                    message: outcome.error_message()?,
                })
            })
            .collect();
        Self {
            parallel: PassStats::new(parallel),
            isolated: PassStats::new(isolated),
            excluded,
            merge,
            failures,
            duration,
            any_failed,
        }
    }

    /// Returns the total number of jobs dispatched across both passes.
    pub fn job_count(&self) -> usize {
        self.parallel.dispatched + self.isolated.dispatched
    }

    /// Returns the total number of jobs that succeeded.
    pub fn passed(&self) -> usize {
        self.parallel.passed + self.isolated.passed
    }

    /// Returns the total number of jobs that failed.
    pub fn failed(&self) -> usize {
        self.parallel.failed + self.isolated.failed
    }

    /// Returns true if no jobs were dispatched.
    pub fn is_empty(&self) -> bool {
        self.job_count() == 0
    }

    /// Returns true if no job failed in either pass.
    ///
    /// The result of merging has no bearing on this.
    pub fn is_success(&self) -> bool {
        !self.any_failed
    }

    /// Returns the run's verdict as a result.
    pub fn check(&self) -> Result<(), TestRunFailed> {
        if self.is_success() {
            Ok(())
        } else {
            Err(TestRunFailed)
        }
    }
}
