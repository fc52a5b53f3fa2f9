// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `suite-run`: runs a directory tree of compiled test binaries.
//!
//! The basic flow of a run is:
//!
//! 1. [`discovery`] walks the test directory and classifies every binary as framework-based or
//!    standalone.
//! 2. [`rules`] resolves the exclusion, isolation, manual and slow tables against each binary
//!    name, and [`plan`] routes every binary to the parallel pass, the isolated pass, or neither.
//! 3. [`runner`] executes each pass on a bounded worker pool.
//! 4. [`aggregator`] merges the per-job result fragments into a single result stream.
//! 5. [`run`] drives all of the above and computes the verdict.

pub mod aggregator;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod executor;
pub mod exit_codes;
pub mod plan;
pub mod rules;
pub mod run;
pub mod runner;
mod stopwatch;
