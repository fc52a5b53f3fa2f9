// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery and classification of test binaries.

use crate::{errors::DiscoveryError, rules::NamePattern};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fmt;
use tracing::debug;
use walkdir::WalkDir;

/// A test binary found under the test directory.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TestBinary {
    path: Utf8PathBuf,
    name: String,
}

impl TestBinary {
    /// Creates a new test binary from its path. Returns `None` if the path has no file name.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_owned();
        Some(Self { path, name })
    }

    /// Returns the full path to the binary.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the short name of the binary: its file name, including any executable suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory the binary lives in.
    pub fn parent(&self) -> &Utf8Path {
        self.path.parent().unwrap_or(Utf8Path::new("."))
    }
}

impl fmt::Display for TestBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// How a test binary is launched.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TestKind {
    /// A binary using the gtest conventions, runnable with a sub-test filter.
    Framework,

    /// A binary with bespoke arguments. It cannot be filtered by sub-test name.
    Standalone {
        /// The fixed arguments it is launched with.
        args: Vec<String>,
    },
}

impl TestKind {
    /// Returns a short string describing the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Framework => "framework",
            TestKind::Standalone { .. } => "standalone",
        }
    }
}

/// A discovered and classified test binary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TestSuite {
    /// The binary.
    #[serde(flatten)]
    pub binary: TestBinary,

    /// How it is launched.
    #[serde(flatten)]
    pub kind: TestKind,
}

/// Decides which files under the test directory are test binaries.
///
/// A file is a test binary if its name starts with one of the prefixes and ends with the
/// executable suffix.
#[derive(Clone, Debug)]
pub struct BinaryMatcher {
    prefixes: Vec<String>,
    suffix: String,
}

impl BinaryMatcher {
    /// The prefixes used if none are configured.
    pub const DEFAULT_PREFIXES: &'static [&'static str] = &["unittest", "ceph_test"];

    /// Creates a new matcher with the platform executable suffix.
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_suffix(prefixes, std::env::consts::EXE_SUFFIX)
    }

    /// Creates a new matcher with an explicit suffix.
    pub fn with_suffix(
        prefixes: impl IntoIterator<Item = impl Into<String>>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            suffix: suffix.into(),
        }
    }

    /// Returns true if a file with this name is a test binary.
    pub fn is_match(&self, name: &str) -> bool {
        name.ends_with(&self.suffix)
            && self
                .prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl Default for BinaryMatcher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIXES.iter().copied())
    }
}

/// Maps binary name patterns to the fixed arguments of standalone binaries.
#[derive(Clone, Debug, Default)]
pub struct StandaloneTable {
    entries: Vec<(NamePattern, Vec<String>)>,
}

impl StandaloneTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing the arguments of an existing entry with the same pattern.
    pub fn insert(&mut self, pattern: NamePattern, args: Vec<String>) {
        match self.entries.iter_mut().find(|(p, _)| *p == pattern) {
            Some((_, existing)) => *existing = args,
            None => self.entries.push((pattern, args)),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classifies a binary. The first matching entry decides the arguments; binaries that match
    /// no entry are framework binaries.
    pub fn classify(&self, binary: &TestBinary) -> TestKind {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.is_match(binary.name()))
            .map_or(TestKind::Framework, |(_, args)| TestKind::Standalone {
                args: args.clone(),
            })
    }
}

/// Recursively finds test binaries under `root`, in sorted walk order.
///
/// Any directory that cannot be read fails discovery as a whole.
pub fn discover(root: &Utf8Path, matcher: &BinaryMatcher) -> Result<Vec<TestBinary>, DiscoveryError> {
    let mut binaries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|error| DiscoveryError::ReadDir {
            path: error
                .path()
                .and_then(|path| Utf8Path::from_path(path))
                .unwrap_or(root)
                .to_owned(),
            error,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|error| DiscoveryError::NonUtf8Path {
                path: error.into_path_buf(),
            })?;
        if let Some(binary) = TestBinary::new(path)
            && matcher.is_match(binary.name())
        {
            debug!(path = %binary.path(), "discovered test binary");
            binaries.push(binary);
        }
    }

    Ok(binaries)
}

/// Discovers and classifies test binaries under `root`.
pub fn discover_suites(
    root: &Utf8Path,
    matcher: &BinaryMatcher,
    standalone: &StandaloneTable,
) -> Result<Vec<TestSuite>, DiscoveryError> {
    let suites = discover(root, matcher)?
        .into_iter()
        .map(|binary| {
            let kind = standalone.classify(&binary);
            TestSuite { binary, kind }
        })
        .collect();
    Ok(suites)
}
