// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the suite runner.

use crate::plan::Pass;
use camino::Utf8PathBuf;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// An error that occurred while walking the test directory.
///
/// Discovery errors are fatal: a run cannot start without knowing the full set of test binaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// A directory under the test root could not be read.
    #[error("failed to read test directory `{path}`")]
    ReadDir {
        /// The root or subdirectory that failed.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: walkdir::Error,
    },

    /// A path under the test root was not valid UTF-8.
    #[error("test directory contains a non-UTF-8 path: `{}`", .path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },
}

/// A rule or classification pattern could not be compiled.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum RulePatternError {
    /// The pattern is not a valid glob.
    #[error("invalid name pattern `{pattern}`")]
    InvalidGlob {
        /// The pattern as written.
        pattern: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// The glob could not be converted to a regex.
    #[error("name pattern `{pattern}` could not be compiled: {message}")]
    Regex {
        /// The pattern as written.
        pattern: String,

        /// The error message produced by the regex engine.
        message: String,
    },
}

/// An error that occurred while reading suite-run configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigReadError {
    /// The config file could not be read.
    #[error("failed to read config file `{file}`")]
    Read {
        /// The config file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The config is not valid TOML, or does not have the expected shape.
    #[error("failed to parse config at `{source_name}`")]
    Parse {
        /// The file name, or `<default config>` for the built-in config.
        source_name: String,

        /// The underlying error.
        #[source]
        error: Box<toml::de::Error>,
    },

    /// A key in one of the rule tables is not a valid pattern.
    #[error("in config at `{source_name}`, table `[{table}]`")]
    InvalidPattern {
        /// The file name, or `<default config>` for the built-in config.
        source_name: String,

        /// The table the pattern was found in.
        table: &'static str,

        /// The underlying error.
        #[source]
        error: RulePatternError,
    },

    /// A standalone entry's launch arguments could not be split into words.
    #[error(
        "in config at `{source_name}`, standalone arguments for `{pattern}` are not valid shell words"
    )]
    InvalidArgs {
        /// The file name, or `<default config>` for the built-in config.
        source_name: String,

        /// The pattern whose arguments are invalid.
        pattern: String,

        /// The underlying error.
        #[source]
        error: shell_words::ParseError,
    },

    /// A setting has an out-of-range value.
    #[error("in config at `{source_name}`, `{setting}` must be {expected}")]
    InvalidValue {
        /// The file name, or `<default config>` for the built-in config.
        source_name: String,

        /// The setting, as written in the config.
        setting: &'static str,

        /// A description of the accepted values.
        expected: &'static str,
    },
}

/// An error that occurred while executing a single test suite.
///
/// These errors never escape the job that produced them: the scheduler turns every one of them
/// into a failed [`JobOutcome`](crate::runner::JobOutcome).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The test process could not be started.
    #[error("failed to start `{binary}`")]
    Spawn {
        /// The test binary.
        binary: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Waiting on, or killing, the test process failed.
    #[error("failed to wait for `{binary}`")]
    Wait {
        /// The test binary.
        binary: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The test process did not finish within its timeout and was killed.
    #[error("`{binary}` timed out after {timeout:?}")]
    Timeout {
        /// The test binary.
        binary: Utf8PathBuf,

        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The test process exited with a non-zero exit code.
    #[error("`{binary}` exited with code {exit_code}")]
    Failed {
        /// The test binary.
        binary: Utf8PathBuf,

        /// The exit code.
        exit_code: i32,
    },

    /// The test process was terminated without an exit code, e.g. by a signal.
    #[error("`{binary}` was terminated abnormally")]
    Terminated {
        /// The test binary.
        binary: Utf8PathBuf,
    },

    /// Writing a log or result fragment failed.
    #[error("failed to write `{path}`")]
    Io {
        /// The file being written.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The executor panicked while running the suite.
    #[error("executor panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// An error that occurred while merging result fragments into the final result stream.
///
/// Merge failures do not affect the verdict of a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeError {
    /// The fragment pattern is not a valid glob.
    #[error("invalid fragment pattern `{pattern}`")]
    InvalidPattern {
        /// The pattern.
        pattern: String,

        /// The underlying error.
        #[source]
        error: globset::Error,
    },

    /// The fragment directory could not be listed.
    #[error("failed to list fragments in `{dir}`")]
    ListFragments {
        /// The fragment directory.
        dir: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The final result stream could not be opened or written to.
    #[error("failed to write result stream `{path}`")]
    WriteStream {
        /// The final result stream.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A fragment could not be read.
    #[error("failed to read fragment `{path}`")]
    ReadFragment {
        /// The fragment.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A fragment could not be removed after it was merged.
    #[error("failed to remove merged fragment `{path}`")]
    RemoveFragment {
        /// The fragment.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// A fatal error that stops a run before its verdict can be computed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// A directory needed for results could not be created or cleaned.
    #[error("failed to prepare result directory `{path}`")]
    PrepareDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Result fragments left over from a previous run could not be removed.
    #[error("failed to remove stale result fragments")]
    CleanFragments(#[source] MergeError),

    /// The set of test binaries could not be discovered.
    #[error("failed to discover test binaries")]
    Discovery(#[from] DiscoveryError),

    /// The worker pool for a pass could not be created.
    #[error("failed to create worker pool for the {pass} pass")]
    ThreadPool {
        /// The pass the pool was for.
        pass: Pass,

        /// The underlying error.
        #[source]
        error: rayon::ThreadPoolBuildError,
    },
}

/// The final verdict of a run: one or more suites failed.
///
/// Details about individual failures are in the log and in the merged result stream.
#[derive(Clone, Copy, Debug, Error)]
#[error("one or more suites failed")]
pub struct TestRunFailed;

/// An error that occurs while parsing an [`OutputFormat`](crate::plan::OutputFormat) value.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for message format: {input}\n(known values: {})",
    crate::plan::OutputFormat::variants().join(", "),
)]
pub struct OutputFormatParseError {
    input: String,
}

impl OutputFormatParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while writing a run plan.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WritePlanError {
    /// An error occurred while writing the plan to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing JSON, or while writing it to the provided output.
    #[error("error serializing to JSON")]
    Json(#[source] serde_json::Error),
}

/// Displays an error followed by each of its sources, separated by `: `.
#[derive(Clone, Copy, Debug)]
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Wraps an error for display.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> std::fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
