// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, OutputWriter, StderrStyles, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use std::{io::Write, num::NonZeroUsize, time::Duration};
use suite_runner::{
    config::RunnerConfig,
    discovery,
    errors::WritePlanError,
    executor::ProcessExecutor,
    exit_codes::SuiteRunExitCode,
    plan::{OutputFormat, RunPlan},
    run::{RunDirs, RunSummary, TestRun},
};
use tracing::{error, info, warn};

/// Runs a directory of compiled test suites.
///
/// Test binaries are discovered by name, routed through the excluded, isolated, manual and slow
/// tables, and run in two passes: a parallel pass bounded by the worker count, then an isolated
/// pass with one worker. Result fragments are merged into a single result stream at the end.
#[derive(Debug, Parser)]
#[command(version, name = "suite-run", styles = clap_styles::style())]
pub struct SuiteRunApp {
    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl SuiteRunApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let config = self.config_opts.make_config()?;
        match self.command {
            Command::Run(opts) => opts.exec(config, &output.stderr_styles()),
            Command::List(opts) => opts.exec(config, output_writer),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file, layered over the built-in defaults
    #[arg(long, global = true, value_name = "PATH", env = "SUITE_RUN_CONFIG")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<RunnerConfig> {
        Ok(RunnerConfig::from_sources(self.config_file.as_deref())?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover and run test suites
    ///
    /// Every matching binary under the test directory is run once, in either the parallel or the
    /// isolated pass. The exit code is non-zero if any suite failed.
    Run(RunOpts),

    /// Show how each discovered test suite would be routed, without running anything
    List(ListOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Directory to search for test binaries
    #[arg(long, value_name = "DIR", env = "SUITE_RUN_TEST_DIR")]
    test_dir: Utf8PathBuf,

    /// Directory to write result fragments, suite logs and the merged result stream to
    #[arg(long, value_name = "DIR", env = "SUITE_RUN_RESULT_DIR")]
    result_dir: Utf8PathBuf,

    /// Number of suites to run simultaneously in the parallel pass [default: logical CPU count]
    #[arg(
        long,
        short = 'j',
        value_name = "THREADS",
        help_heading = "RUNNER OPTIONS",
        env = "SUITE_RUN_TEST_THREADS"
    )]
    test_threads: Option<NonZeroUsize>,

    /// Time limit for each suite, e.g. 90s or 10m
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = parse_timeout,
        help_heading = "RUNNER OPTIONS"
    )]
    timeout: Option<Duration>,

    /// Skip suites listed in the slow table
    #[arg(long, help_heading = "RUNNER OPTIONS")]
    skip_slow: bool,

    /// Behavior if there are no suites to run
    #[arg(
        long,
        value_enum,
        value_name = "ACTION",
        default_value_t,
        help_heading = "RUNNER OPTIONS"
    )]
    no_tests: NoTestsBehavior,
}

impl RunOpts {
    fn exec(self, mut config: RunnerConfig, styles: &StderrStyles) -> Result<i32> {
        if let Some(test_threads) = self.test_threads {
            config.run.test_threads = Some(test_threads);
        }
        if let Some(timeout) = self.timeout {
            config.run.timeout = timeout;
        }
        config.run.skip_slow |= self.skip_slow;

        let dirs = RunDirs::new(self.test_dir, self.result_dir);
        let run = TestRun::new(dirs, &config, ProcessExecutor::new());
        let summary = run.execute()?;

        if summary.is_empty() {
            return match self.no_tests {
                NoTestsBehavior::Pass => Ok(SuiteRunExitCode::OK),
                NoTestsBehavior::Warn => {
                    warn!("no suites to run");
                    Ok(SuiteRunExitCode::OK)
                }
                NoTestsBehavior::Fail => Err(ExpectedError::NoTestsRun),
            };
        }

        report_summary(&summary, run.dirs().result_stream().as_path(), styles);
        summary.check()?;
        Ok(SuiteRunExitCode::OK)
    }
}

fn report_summary(summary: &RunSummary, stream: &Utf8Path, styles: &StderrStyles) {
    for failure in &summary.failures {
        error!(
            "{} {} ({} pass): {}",
            "FAILED".style(styles.fail),
            failure.name.style(styles.bold),
            failure.pass,
            failure.message,
        );
    }
    if summary.is_success() {
        info!(
            "{} suites {}, results in {stream}",
            summary.passed(),
            "passed".style(styles.pass),
        );
    } else {
        info!(
            "{} of {} suites {}, results in {stream}",
            summary.failed(),
            summary.job_count(),
            "failed".style(styles.fail),
        );
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    /// Directory to search for test binaries
    #[arg(long, value_name = "DIR", env = "SUITE_RUN_TEST_DIR")]
    test_dir: Utf8PathBuf,

    /// List suites in the slow table as excluded
    #[arg(long)]
    skip_slow: bool,

    /// Output format
    #[arg(
        short = 'T',
        long,
        value_enum,
        default_value_t,
        help_heading = "OUTPUT OPTIONS",
        value_name = "FMT"
    )]
    message_format: MessageFormatOpts,
}

impl ListOpts {
    fn exec(self, mut config: RunnerConfig, output_writer: &mut OutputWriter) -> Result<i32> {
        config.run.skip_slow |= self.skip_slow;

        let suites =
            discovery::discover_suites(&self.test_dir, &config.matcher(), config.standalone())?;
        let plan = RunPlan::new(suites, &config.rule_set());

        let mut writer = output_writer.stdout_writer();
        plan.write(self.message_format.into(), &mut writer)?;
        writer.flush().map_err(WritePlanError::Io)?;
        Ok(SuiteRunExitCode::OK)
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormatOpts {
    #[default]
    Plain,
    Json,
    JsonPretty,
}

impl From<MessageFormatOpts> for OutputFormat {
    fn from(format: MessageFormatOpts) -> Self {
        match format {
            MessageFormatOpts::Plain => Self::Plain,
            MessageFormatOpts::Json => Self::Json,
            MessageFormatOpts::JsonPretty => Self::JsonPretty,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
enum NoTestsBehavior {
    /// Silently exit with code 0.
    Pass,

    /// Produce a warning and exit with code 0.
    #[default]
    Warn,

    /// Produce an error message and exit with a non-zero code.
    Fail,
}

fn parse_timeout(input: &str) -> Result<Duration, String> {
    let timeout = humantime::parse_duration(input).map_err(|error| error.to_string())?;
    if timeout.is_zero() {
        return Err("timeout must be greater than zero".to_owned());
    }
    Ok(timeout)
}
