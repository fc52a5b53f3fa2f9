// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use owo_colors::OwoColorize;
use std::error::Error;
use suite_runner::{
    errors::{ConfigReadError, DiscoveryError, RunError, TestRunFailed, WritePlanError},
    exit_codes::SuiteRunExitCode,
};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected failure of a suite-run invocation.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("failed to read config")]
    ConfigRead {
        #[from]
        err: ConfigReadError,
    },
    #[error("failed to discover test binaries")]
    Discovery {
        #[from]
        err: DiscoveryError,
    },
    #[error("failed to start run")]
    Run {
        #[from]
        err: RunError,
    },
    #[error("failed to write output")]
    WriteOutput {
        #[from]
        err: WritePlanError,
    },
    #[error("no suites to run")]
    NoTestsRun,
    #[error("test run failed")]
    TestRunFailed {
        #[from]
        err: TestRunFailed,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigRead { .. } => SuiteRunExitCode::SETUP_ERROR,
            Self::Discovery { .. }
            | Self::Run {
                err: RunError::Discovery(_),
            } => SuiteRunExitCode::DISCOVERY_FAILED,
            Self::Run { .. } => SuiteRunExitCode::SETUP_ERROR,
            Self::WriteOutput { .. } => SuiteRunExitCode::WRITE_OUTPUT_ERROR,
            Self::NoTestsRun => SuiteRunExitCode::NO_TESTS_RUN,
            Self::TestRunFailed { .. } => SuiteRunExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::ConfigRead { err } => {
                error!("failed to read suite-run config");
                Some(err as &dyn Error)
            }
            Self::Discovery { err } => {
                error!("{err}");
                err.source()
            }
            Self::Run { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutput { err } => {
                error!("{err}");
                err.source()
            }
            Self::NoTestsRun => {
                error!(
                    "no suites to run (use {} to allow this)",
                    "--no-tests=pass".style(styles.bold)
                );
                None
            }
            Self::TestRunFailed { err } => {
                error!("test run failed: {}", err.style(styles.fail));
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
