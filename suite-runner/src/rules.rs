// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule tables and their resolution against test binary names.
//!
//! A rule table is an ordered list of `(pattern, payload)` records. The payload is either the
//! wildcard `"*"`, meaning the whole suite, or a set of sub-test filter tokens. Resolving a
//! binary name against a table unions the tokens of every matching record; a single matching
//! wildcard makes the whole resolution a wildcard.
//!
//! A [`RuleSet`] composes the configured tables into the effective exclusion table used by the
//! parallel pass, and the isolation table used by the isolated pass.

use crate::errors::RulePatternError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use tracing::debug;

/// The literal that marks a whole-suite rule.
pub const WILDCARD: &str = "*";

/// A glob pattern matched against the whole short name of a test binary.
///
/// `globset::GlobMatcher` has path-like semantics, so the glob is converted to a regex and
/// matched directly.
#[derive(Clone, Debug)]
pub struct NamePattern {
    pattern: String,
    regex: regex::bytes::Regex,
}

impl NamePattern {
    /// Compiles a new pattern, e.g. `unittest_bluestore.exe` or `ceph_test_libcephfs*`.
    pub fn new(pattern: impl Into<String>) -> Result<Self, RulePatternError> {
        let pattern = pattern.into();
        let glob = globset::GlobBuilder::new(&pattern)
            // Only allow escapes via [], since Windows paths may be pasted in verbatim.
            .backslash_escape(false)
            // Allow foo.{exe,} to match both foo.exe and foo.
            .empty_alternates(true)
            .build()
            .map_err(|error| RulePatternError::InvalidGlob {
                pattern: pattern.clone(),
                error,
            })?;
        let regex = regex::bytes::Regex::new(glob.regex()).map_err(|error| {
            RulePatternError::Regex {
                pattern: pattern.clone(),
                message: error.to_string(),
            }
        })?;

        Ok(Self { pattern, regex })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the pattern matches the whole name.
    pub fn is_match(&self, name: &str) -> bool {
        self.regex.is_match(name.as_bytes())
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for NamePattern {}

/// The payload of a single rule.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(from = "RawPayload")]
pub enum RulePayload {
    /// The rule covers the whole suite.
    Wildcard,

    /// The rule covers these sub-test filter tokens.
    Filters(BTreeSet<String>),
}

impl RulePayload {
    /// Creates a filter payload from the given tokens.
    ///
    /// A `"*"` token anywhere in the list turns the payload into a wildcard.
    pub fn filters(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let tokens: BTreeSet<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.contains(WILDCARD) {
            Self::Wildcard
        } else {
            Self::Filters(tokens)
        }
    }

    /// Returns true if this payload is the wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

/// The shapes a payload may take in TOML: `"*"`, `"Token"` or `["TokenA", "TokenB"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPayload {
    One(String),
    Many(Vec<String>),
}

impl From<RawPayload> for RulePayload {
    fn from(raw: RawPayload) -> Self {
        match raw {
            RawPayload::One(token) => RulePayload::filters([token]),
            RawPayload::Many(tokens) => RulePayload::filters(tokens),
        }
    }
}

/// A single `(pattern, payload)` record.
#[derive(Clone, Debug)]
pub struct Rule {
    /// The pattern matched against binary names.
    pub pattern: NamePattern,

    /// What the rule covers.
    pub payload: RulePayload,
}

/// An ordered table of rules.
#[derive(Clone, Debug, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a rule.
    ///
    /// If a rule with the same pattern already exists, it is updated in place: a wildcard on
    /// either side wins, otherwise the new payload replaces the old one. A pattern that is
    /// partially excluded in one table and partially covered in another cannot be represented;
    /// the last write wins.
    pub fn insert(&mut self, pattern: NamePattern, payload: RulePayload) {
        match self.rules.iter_mut().find(|rule| rule.pattern == pattern) {
            Some(existing) => {
                if !existing.payload.is_wildcard() {
                    existing.payload = payload;
                }
            }
            None => self.rules.push(Rule { pattern, payload }),
        }
    }

    /// Folds every pattern of `other` into this table as a wildcard.
    pub fn fold_wildcards(&mut self, other: &RuleTable) {
        for rule in &other.rules {
            self.insert(rule.pattern.clone(), RulePayload::Wildcard);
        }
    }

    /// Returns the rules in this table, in insertion order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the number of rules in this table.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if this table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolves a binary name against this table.
    ///
    /// The result does not depend on the order of the rules.
    pub fn resolve(&self, name: &str) -> Resolution {
        let mut tokens = BTreeSet::new();
        let mut matched = false;
        for rule in self.rules.iter().filter(|rule| rule.pattern.is_match(name)) {
            matched = true;
            match &rule.payload {
                RulePayload::Wildcard => return Resolution::Wildcard,
                RulePayload::Filters(filters) => tokens.extend(filters.iter().cloned()),
            }
        }

        if matched && !tokens.is_empty() {
            Resolution::Filters(tokens)
        } else {
            Resolution::Unmatched
        }
    }

    /// Returns true if any rule in this table matches the name.
    pub fn matches(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.pattern.is_match(name))
    }
}

/// The result of resolving a binary name against a [`RuleTable`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// No rule with a non-empty payload matched.
    Unmatched,

    /// At least one matching rule was a wildcard.
    Wildcard,

    /// The union of the tokens of every matching rule.
    Filters(BTreeSet<String>),
}

/// The sub-test filter a suite is run with, for one pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "mode", content = "tokens", rename_all = "kebab-case")]
pub enum SuiteFilter {
    /// Run every sub-test.
    All,

    /// Run only these sub-tests.
    Only(BTreeSet<String>),

    /// Run every sub-test except these.
    Except(BTreeSet<String>),
}

impl SuiteFilter {
    /// Returns this filter as a gtest filter expression, or `None` if every sub-test should run.
    ///
    /// Tokens are joined with `:`, and negated filters carry a leading `-`.
    pub fn to_gtest_filter(&self) -> Option<String> {
        match self {
            SuiteFilter::All => None,
            SuiteFilter::Only(tokens) => Some(join_tokens(tokens)),
            SuiteFilter::Except(tokens) => Some(format!("-{}", join_tokens(tokens))),
        }
    }

    /// Returns true if every sub-test runs.
    pub fn is_all(&self) -> bool {
        matches!(self, SuiteFilter::All)
    }
}

fn join_tokens(tokens: &BTreeSet<String>) -> String {
    tokens.iter().map(String::as_str).collect::<Vec<_>>().join(":")
}

impl fmt::Display for SuiteFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_gtest_filter() {
            Some(filter) => f.write_str(&filter),
            None => f.write_str(WILDCARD),
        }
    }
}

/// The rule tables as read from configuration.
#[derive(Clone, Debug, Default)]
pub struct RuleTables {
    /// Suites, or sub-tests, that never run in the parallel pass.
    pub excluded: RuleTable,

    /// Suites, or sub-tests, that must run alone in the isolated pass.
    pub isolated: RuleTable,

    /// Suites that are only ever run by hand.
    pub manual: RuleTable,

    /// Suites that are skipped when slow suites are skipped.
    pub slow: RuleTable,
}

/// The effective rules for a run.
#[derive(Clone, Debug)]
pub struct RuleSet {
    exclusions: RuleTable,
    tables: RuleTables,
    skip_slow: bool,
}

impl RuleSet {
    /// Composes the effective exclusion table.
    ///
    /// The excluded table comes first; manual and isolated patterns are folded in as wildcards,
    /// followed by slow patterns if `skip_slow` is set.
    pub fn new(tables: RuleTables, skip_slow: bool) -> Self {
        let mut exclusions = tables.excluded.clone();
        exclusions.fold_wildcards(&tables.manual);
        exclusions.fold_wildcards(&tables.isolated);
        if skip_slow {
            exclusions.fold_wildcards(&tables.slow);
        }

        Self {
            exclusions,
            tables,
            skip_slow,
        }
    }

    /// Returns the effective exclusion table.
    pub fn exclusions(&self) -> &RuleTable {
        &self.exclusions
    }

    /// Returns the isolation table.
    pub fn isolated(&self) -> &RuleTable {
        &self.tables.isolated
    }

    /// Returns true if slow suites are skipped.
    pub fn skip_slow(&self) -> bool {
        self.skip_slow
    }

    /// Returns the filter for the parallel pass, or `None` if the suite is skipped in that pass.
    pub fn parallel_filter(&self, name: &str) -> Option<SuiteFilter> {
        let filter = match self.exclusions.resolve(name) {
            Resolution::Wildcard => None,
            Resolution::Filters(tokens) => Some(SuiteFilter::Except(tokens)),
            Resolution::Unmatched => Some(SuiteFilter::All),
        };
        debug!(name, ?filter, "resolved parallel pass filter");
        filter
    }

    /// Returns the filter for the isolated pass, or `None` if the suite is skipped in that pass.
    pub fn isolated_filter(&self, name: &str) -> Option<SuiteFilter> {
        let filter = match self.tables.isolated.resolve(name) {
            Resolution::Unmatched => None,
            Resolution::Wildcard => Some(SuiteFilter::All),
            Resolution::Filters(tokens) => Some(SuiteFilter::Only(tokens)),
        };
        debug!(name, ?filter, "resolved isolated pass filter");
        filter
    }

    /// Returns why a suite that is skipped in the parallel pass was skipped.
    pub fn exclusion_reason(&self, name: &str) -> ExclusionReason {
        if self.tables.manual.matches(name) {
            ExclusionReason::Manual
        } else if self.tables.isolated.matches(name) {
            ExclusionReason::Isolated
        } else if self.skip_slow && self.tables.slow.matches(name) {
            ExclusionReason::Slow
        } else {
            ExclusionReason::Excluded
        }
    }
}

/// The reason a suite is skipped in the parallel pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    /// The suite is listed in the manual table.
    Manual,

    /// The suite is listed in the isolated table.
    Isolated,

    /// The suite is slow and slow suites are skipped.
    Slow,

    /// The suite is excluded as a whole.
    Excluded,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Manual => write!(f, "manual"),
            ExclusionReason::Isolated => write!(f, "isolated"),
            ExclusionReason::Slow => write!(f, "slow"),
            ExclusionReason::Excluded => write!(f, "excluded"),
        }
    }
}
