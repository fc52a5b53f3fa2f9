// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scheduler: runs the jobs of a pass on a bounded worker pool.
//!
//! Each job runs on a pool thread and reports its [`JobOutcome`] over a channel. Failures of any
//! kind, including panics in the executor, are contained at the job boundary. A pass only returns
//! once every job has reported.

use crate::{
    aggregator,
    discovery::TestBinary,
    errors::{DisplayErrorChain, ExecuteError, RunError},
    executor::{Invocation, JobContext, SuiteExecutor},
    plan::{Pass, PlannedJob},
    stopwatch::StopwatchStart,
};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::ThreadPoolBuilder;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tracing::{error, info};

/// One scheduled execution of a suite.
#[derive(Clone, Debug)]
pub struct Job {
    /// The binary to run.
    pub binary: TestBinary,

    /// How the binary is invoked.
    pub invocation: Invocation,

    /// The pass this job belongs to.
    pub pass: Pass,

    /// The position of this job in dispatch order within its pass.
    pub index: usize,

    /// The result fragment for this job. No other job writes to it.
    pub fragment: Utf8PathBuf,

    /// The wall-clock timeout for the suite.
    pub timeout: Duration,
}

impl Job {
    /// Creates the jobs for a pass from planned jobs, in order.
    pub fn for_pass(
        pass: Pass,
        planned: impl IntoIterator<Item = PlannedJob>,
        result_dir: &Utf8Path,
        timeout: Duration,
    ) -> Vec<Job> {
        planned
            .into_iter()
            .enumerate()
            .map(|(index, planned)| Job {
                fragment: aggregator::fragment_path(result_dir, pass, index, planned.suite.binary.name()),
                invocation: Invocation::new(&planned.suite.kind, &planned.filter),
                binary: planned.suite.binary,
                pass,
                index,
                timeout,
            })
            .collect()
    }
}

/// The result of a single job. Produced exactly once per dispatched job.
#[derive(Debug)]
pub struct JobOutcome {
    /// The binary that was run.
    pub binary: TestBinary,

    /// The pass the job belonged to.
    pub pass: Pass,

    /// The position of the job in dispatch order.
    pub index: usize,

    /// How long the job took.
    pub duration: Duration,

    /// The error, if the job failed.
    pub error: Option<ExecuteError>,
}

impl JobOutcome {
    /// Returns true if the job succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns the error text of a failed job, including its sources.
    pub fn error_message(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|error| DisplayErrorChain::new(error).to_string())
    }
}

/// Process-wide run state shared by all jobs of both passes.
///
/// The failure flag starts unset and is set by every failed outcome. It is never cleared.
#[derive(Debug, Default)]
pub struct RunState {
    failed: AtomicBool,
}

impl RunState {
    /// Creates a new run state with the failure flag unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, setting the failure flag if it failed.
    pub fn record(&self, outcome: &JobOutcome) {
        if !outcome.is_success() {
            self.failed.store(true, Ordering::Release);
        }
    }

    /// Returns true if any recorded outcome failed.
    pub fn any_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// The outcomes of a completed pass.
#[derive(Debug)]
pub struct PassOutcome {
    /// The pass.
    pub pass: Pass,

    /// One outcome per dispatched job, in dispatch order.
    pub outcomes: Vec<JobOutcome>,

    /// The wall-clock time the pass took.
    pub duration: Duration,
}

impl PassOutcome {
    /// Returns the number of jobs that succeeded.
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Returns the number of jobs that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }
}

/// Runs passes against an executor.
pub struct PassRunner<'a, E: ?Sized> {
    executor: &'a E,
    state: &'a RunState,
    output_dir: &'a Utf8Path,
    progress_interval: Duration,
}

impl<'a, E: SuiteExecutor + ?Sized> PassRunner<'a, E> {
    /// Creates a new pass runner.
    ///
    /// `output_dir` is handed to the executor for per-suite output, and `progress_interval` is the
    /// period at which progress is logged while a pass runs.
    pub fn new(
        executor: &'a E,
        state: &'a RunState,
        output_dir: &'a Utf8Path,
        progress_interval: Duration,
    ) -> Self {
        Self {
            executor,
            state,
            output_dir,
            progress_interval,
        }
    }

    /// Runs every job on a pool of `worker_count` threads, and waits for all of them.
    ///
    /// Jobs are dispatched in order. A failed job never stops the others.
    pub fn run_pass(&self, pass: Pass, jobs: Vec<Job>, worker_count: usize) -> Result<PassOutcome, RunError> {
        let stopwatch = StopwatchStart::now();
        let total = jobs.len();
        if total == 0 {
            info!("{pass} pass: no suites to run");
            return Ok(PassOutcome {
                pass,
                outcomes: Vec::new(),
                duration: stopwatch.elapsed(),
            });
        }

        let worker_count = worker_count.clamp(1, total);
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count)
            .thread_name(move |idx| format!("suite-run-{pass}-{idx}"))
            .build()
            .map_err(|error| RunError::ThreadPool { pass, error })?;
        info!("{pass} pass: running {total} suites with {worker_count} workers");

        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut outcomes = Vec::with_capacity(total);

        pool.in_place_scope(|scope| {
            for job in jobs {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    let outcome = self.run_job(&job);
                    self.state.record(&outcome);
                    // The receiver outlives the scope, so this cannot fail.
                    let _ = sender.send(outcome);
                });
            }
            // Drop the original sender so that the channel disconnects once every job is done.
            drop(sender);

            // Progress is reported on a fixed period, however often outcomes arrive.
            let ticker = crossbeam_channel::tick(self.progress_interval);
            loop {
                crossbeam_channel::select! {
                    recv(receiver) -> outcome => match outcome {
                        Ok(outcome) => outcomes.push(outcome),
                        // Every job has reported.
                        Err(_) => break,
                    },
                    recv(ticker) -> _ => {
                        info!("{pass} pass: {} of {total} complete", outcomes.len());
                    }
                }
            }
        });

        outcomes.sort_by_key(|outcome| outcome.index);
        let duration = stopwatch.elapsed();
        let outcome = PassOutcome {
            pass,
            outcomes,
            duration,
        };
        info!(
            "{pass} pass: {} of {total} complete, {} passed, {} failed in {:.3?}",
            outcome.outcomes.len(),
            outcome.passed(),
            outcome.failed(),
            duration,
        );
        Ok(outcome)
    }

    fn run_job(&self, job: &Job) -> JobOutcome {
        let name = job.binary.name();
        info!("{} pass: START {name}", job.pass);

        let cx = JobContext {
            binary: &job.binary,
            pass: job.pass,
            index: job.index,
            output_dir: self.output_dir,
            fragment: &job.fragment,
            timeout: job.timeout,
        };
        let stopwatch = StopwatchStart::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            job.invocation.execute(self.executor, &cx)
        }))
        .unwrap_or_else(|payload| {
            Err(ExecuteError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        });
        let duration = stopwatch.elapsed();

        let outcome = JobOutcome {
            binary: job.binary.clone(),
            pass: job.pass,
            index: job.index,
            duration,
            error: result.err(),
        };
        match outcome.error_message() {
            None => info!("{} pass: PASS {name} in {duration:.3?}", job.pass),
            Some(message) => error!("{} pass: FAIL {name} in {duration:.3?}: {message}", job.pass),
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "(non-string panic payload)".to_owned()
    }
}
