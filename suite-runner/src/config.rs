// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for suite-run.

use crate::{
    discovery::{BinaryMatcher, StandaloneTable},
    errors::ConfigReadError,
    rules::{NamePattern, RulePayload, RuleSet, RuleTable, RuleTables},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{num::NonZeroUsize, time::Duration};
use tracing::warn;

/// Configuration for suite-run.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Settings for a run. Command-line options override these.
    pub run: RunSettings,
    prefixes: Vec<String>,
    tables: RuleTables,
    standalone: StandaloneTable,
}

impl RunnerConfig {
    /// The name used for the default config in error messages.
    pub const DEFAULT_CONFIG_NAME: &'static str = "<default config>";

    /// Contains the default config as a TOML file.
    ///
    /// ```toml
    #[doc = include_str!("../default-config.toml")]
    /// ```
    ///
    /// A user-provided config file is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config, layering the given file, if any, over the default config.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigReadError> {
        let mut config = Self {
            run: RunSettings::default(),
            prefixes: Vec::new(),
            tables: RuleTables::default(),
            standalone: StandaloneTable::new(),
        };
        config.layer(Self::DEFAULT_CONFIG_NAME, Self::DEFAULT_CONFIG)?;

        if let Some(file) = config_file {
            let data = std::fs::read_to_string(file).map_err(|error| ConfigReadError::Read {
                file: file.to_owned(),
                error,
            })?;
            config.layer(file.as_str(), &data)?;
        }

        Ok(config)
    }

    /// Returns the matcher for test binary names.
    pub fn matcher(&self) -> BinaryMatcher {
        BinaryMatcher::new(self.prefixes.iter().cloned())
    }

    /// Returns the rule tables.
    pub fn tables(&self) -> &RuleTables {
        &self.tables
    }

    /// Composes the effective rule set, honoring `skip-slow`.
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.tables.clone(), self.run.skip_slow)
    }

    /// Returns the table of standalone binaries.
    pub fn standalone(&self) -> &StandaloneTable {
        &self.standalone
    }

    // ---
    // Helper methods
    // ---

    fn layer(&mut self, source_name: &str, data: &str) -> Result<(), ConfigReadError> {
        let file: ConfigFile = toml::from_str(data).map_err(|error| ConfigReadError::Parse {
            source_name: source_name.to_owned(),
            error: Box::new(error),
        })?;

        let ConfigFile {
            run,
            discovery,
            excluded,
            isolated,
            manual,
            slow,
            standalone,
        } = file;

        if let Some(test_threads) = run.test_threads {
            let test_threads =
                NonZeroUsize::new(test_threads).ok_or_else(|| ConfigReadError::InvalidValue {
                    source_name: source_name.to_owned(),
                    setting: "run.test-threads",
                    expected: "at least 1",
                })?;
            self.run.test_threads = Some(test_threads);
        }
        if let Some(timeout) = run.timeout {
            self.run.timeout = non_zero_duration(source_name, "run.timeout", timeout)?;
        }
        if let Some(skip_slow) = run.skip_slow {
            self.run.skip_slow = skip_slow;
        }
        if let Some(interval) = run.progress_interval {
            self.run.progress_interval =
                non_zero_duration(source_name, "run.progress-interval", interval)?;
        }
        if let Some(prefixes) = discovery.prefixes {
            self.prefixes = prefixes;
        }

        layer_table(source_name, "excluded", &mut self.tables.excluded, excluded)?;
        layer_table(source_name, "isolated", &mut self.tables.isolated, isolated)?;
        layer_table(source_name, "manual", &mut self.tables.manual, manual)?;
        layer_table(source_name, "slow", &mut self.tables.slow, slow)?;

        for (pattern, args) in standalone {
            let name_pattern = compile(source_name, "standalone", &pattern)?;
            let args = shell_words::split(&args).map_err(|error| ConfigReadError::InvalidArgs {
                source_name: source_name.to_owned(),
                pattern,
                error,
            })?;
            self.standalone.insert(name_pattern, args);
        }

        Ok(())
    }
}

/// Settings for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// The number of workers in the parallel pass, or `None` for the number of logical CPUs.
    pub test_threads: Option<NonZeroUsize>,

    /// The per-suite timeout.
    pub timeout: Duration,

    /// Whether suites in the slow table are skipped.
    pub skip_slow: bool,

    /// The period at which pass progress is logged.
    pub progress_interval: Duration,
}

impl RunSettings {
    /// Returns the number of workers for the parallel pass.
    pub fn worker_count(&self) -> usize {
        match self.test_threads {
            Some(test_threads) => test_threads.get(),
            None => match std::thread::available_parallelism() {
                Ok(count) => count.get(),
                Err(error) => {
                    warn!("unable to determine the number of logical CPUs ({error}), using 1 worker");
                    1
                }
            },
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            test_threads: None,
            timeout: Duration::from_secs(300),
            skip_slow: false,
            progress_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    run: RunSection,
    #[serde(default)]
    discovery: DiscoverySection,
    #[serde(default)]
    excluded: IndexMap<String, RulePayload>,
    #[serde(default)]
    isolated: IndexMap<String, RulePayload>,
    #[serde(default)]
    manual: IndexMap<String, RulePayload>,
    #[serde(default)]
    slow: IndexMap<String, RulePayload>,
    #[serde(default)]
    standalone: IndexMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RunSection {
    test_threads: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    skip_slow: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    progress_interval: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DiscoverySection {
    prefixes: Option<Vec<String>>,
}

fn compile(source_name: &str, table: &'static str, pattern: &str) -> Result<NamePattern, ConfigReadError> {
    NamePattern::new(pattern).map_err(|error| ConfigReadError::InvalidPattern {
        source_name: source_name.to_owned(),
        table,
        error,
    })
}

fn layer_table(
    source_name: &str,
    table: &'static str,
    rules: &mut RuleTable,
    entries: IndexMap<String, RulePayload>,
) -> Result<(), ConfigReadError> {
    for (pattern, payload) in entries {
        rules.insert(compile(source_name, table, &pattern)?, payload);
    }
    Ok(())
}

fn non_zero_duration(
    source_name: &str,
    setting: &'static str,
    duration: Duration,
) -> Result<Duration, ConfigReadError> {
    if duration.is_zero() {
        Err(ConfigReadError::InvalidValue {
            source_name: source_name.to_owned(),
            setting,
            expected: "greater than zero",
        })
    } else {
        Ok(duration)
    }
}
