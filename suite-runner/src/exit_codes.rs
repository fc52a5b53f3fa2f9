// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documented exit codes for `suite-run`.

/// Documented exit codes for `suite-run` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum SuiteRunExitCode {}

impl SuiteRunExitCode {
    /// Every suite passed.
    pub const OK: i32 = 0;

    /// No suites were selected to run, and `--no-tests=fail` was passed.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a run, for example an invalid config file.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more suites failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The test directory could not be walked.
    pub const DISCOVERY_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
