// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing of discovered suites to passes.
//!
//! Every suite ends up in exactly one of these places:
//!
//! * the parallel pass,
//! * the isolated pass, or
//! * neither pass.
//!
//! Isolated patterns are excluded from the parallel pass as a whole, so no suite runs twice.

use crate::{
    discovery::{TestKind, TestSuite},
    errors::{OutputFormatParseError, WritePlanError},
    rules::{ExclusionReason, RuleSet, SuiteFilter},
};
use serde::Serialize;
use std::{fmt, io, str::FromStr};

/// One of the two passes of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    /// Suites run concurrently, skipping anything excluded or isolated.
    Parallel,

    /// Isolated suites run one at a time.
    Isolated,
}

impl Pass {
    /// Returns the pass name as used in logs and fragment names.
    pub fn as_str(self) -> &'static str {
        match self {
            Pass::Parallel => "parallel",
            Pass::Isolated => "isolated",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A suite scheduled to run in a pass, with its filter for that pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PlannedJob {
    /// The suite.
    #[serde(flatten)]
    pub suite: TestSuite,

    /// The filter it runs with.
    pub filter: SuiteFilter,
}

/// A suite that runs in neither pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExcludedSuite {
    /// The suite.
    #[serde(flatten)]
    pub suite: TestSuite,

    /// Why it was excluded.
    pub reason: ExclusionReason,
}

/// The routing of every discovered suite, in discovery order.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunPlan {
    parallel: Vec<PlannedJob>,
    isolated: Vec<PlannedJob>,
    excluded: Vec<ExcludedSuite>,
}

impl RunPlan {
    /// Routes every suite according to the rules.
    pub fn new(suites: impl IntoIterator<Item = TestSuite>, rules: &RuleSet) -> Self {
        let mut plan = Self::default();
        for suite in suites {
            let name = suite.binary.name();
            if let Some(filter) = rules.isolated_filter(name) {
                plan.isolated.push(PlannedJob { suite, filter });
            } else if let Some(filter) = rules.parallel_filter(name) {
                plan.parallel.push(PlannedJob { suite, filter });
            } else {
                let reason = rules.exclusion_reason(name);
                plan.excluded.push(ExcludedSuite { suite, reason });
            }
        }

        plan
    }

    /// Returns the jobs of the parallel pass.
    pub fn parallel(&self) -> &[PlannedJob] {
        &self.parallel
    }

    /// Returns the jobs of the isolated pass.
    pub fn isolated(&self) -> &[PlannedJob] {
        &self.isolated
    }

    /// Returns the suites that run in neither pass.
    pub fn excluded(&self) -> &[ExcludedSuite] {
        &self.excluded
    }

    /// Returns the total number of jobs across both passes.
    pub fn job_count(&self) -> usize {
        self.parallel.len() + self.isolated.len()
    }

    /// Splits the plan into the jobs of each pass.
    pub fn into_passes(self) -> (Vec<PlannedJob>, Vec<PlannedJob>) {
        (self.parallel, self.isolated)
    }

    /// Writes the plan in the given format.
    pub fn write(&self, format: OutputFormat, mut writer: impl io::Write) -> Result<(), WritePlanError> {
        match format {
            OutputFormat::Plain => self.write_plain(&mut writer).map_err(WritePlanError::Io),
            OutputFormat::Json => {
                serde_json::to_writer(&mut writer, self).map_err(WritePlanError::Json)?;
                writeln!(writer).map_err(WritePlanError::Io)
            }
            OutputFormat::JsonPretty => {
                serde_json::to_writer_pretty(&mut writer, self).map_err(WritePlanError::Json)?;
                writeln!(writer).map_err(WritePlanError::Io)
            }
        }
    }

    fn write_plain(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        for (pass, jobs) in [(Pass::Parallel, &self.parallel), (Pass::Isolated, &self.isolated)] {
            writeln!(writer, "{pass} pass ({} suites):", jobs.len())?;
            for job in jobs {
                write!(writer, "    {}", job.suite.binary.path())?;
                match &job.suite.kind {
                    TestKind::Framework if job.filter.is_all() => {}
                    TestKind::Framework => write!(writer, " [{}]", job.filter)?,
                    TestKind::Standalone { args } => {
                        write!(writer, " (standalone: {})", shell_words::join(args))?
                    }
                }
                writeln!(writer)?;
            }
        }
        writeln!(writer, "excluded ({} suites):", self.excluded.len())?;
        for excluded in &self.excluded {
            writeln!(
                writer,
                "    {} ({})",
                excluded.suite.binary.path(),
                excluded.reason
            )?;
        }
        Ok(())
    }
}

/// Output formats for a run plan.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// A human-readable listing.
    #[default]
    Plain,

    /// JSON on a single line.
    Json,

    /// Pretty-printed JSON.
    JsonPretty,
}

impl OutputFormat {
    /// Returns the string values accepted by [`FromStr`].
    pub fn variants() -> [&'static str; 3] {
        ["plain", "json", "json-pretty"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonPretty => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = OutputFormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "plain" => OutputFormat::Plain,
            "json" => OutputFormat::Json,
            "json-pretty" => OutputFormat::JsonPretty,
            other => return Err(OutputFormatParseError::new(other)),
        };
        Ok(val)
    }
}
