// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs a directory of compiled test suites in a parallel pass and an isolated pass.
//!
//! This crate contains the command-line interface. The discovery, routing, scheduling and
//! aggregation logic lives in [`suite_runner`].

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
