// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging of per-job result fragments into the final result stream.
//!
//! Every job writes to its own fragment in the result directory. Once both passes are done,
//! [`merge`] appends the fragments to the final stream in sorted file-name order and deletes
//! them. Fragment names sort in dispatch order, see [`fragment_path`].

use crate::{errors::MergeError, plan::Pass};
use camino::{Utf8Path, Utf8PathBuf};
use globset::Glob;
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
};
use tracing::debug;

/// The glob matching every fragment file name produced by [`fragment_path`].
pub const FRAGMENT_GLOB: &str = "subunit-*.part";

/// The file name of the final result stream within the result directory.
pub const RESULT_STREAM_NAME: &str = "subunit.out";

/// The size of the buffer used to copy fragments. Fragments may be much larger than this.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Returns the fragment path for the job at `index` within `pass`.
///
/// Fragment names sort by pass (parallel first), then by dispatch index.
pub fn fragment_path(result_dir: &Utf8Path, pass: Pass, index: usize, name: &str) -> Utf8PathBuf {
    let ordinal = match pass {
        Pass::Parallel => 1,
        Pass::Isolated => 2,
    };
    result_dir.join(format!("subunit-{ordinal}-{pass}-{index:05}-{name}.part"))
}

/// Statistics about a completed merge.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MergeSummary {
    /// The number of fragments appended.
    pub fragments: usize,

    /// The number of bytes appended.
    pub bytes: u64,
}

/// Appends every file in `dir` whose name matches `pattern` to `final_path`, then deletes it.
///
/// Fragments are processed in sorted file-name order, each appended contiguously. The final stream
/// is created even if there are no fragments. Subdirectories are ignored.
pub fn merge(dir: &Utf8Path, pattern: &str, final_path: &Utf8Path) -> Result<MergeSummary, MergeError> {
    let fragments = list_fragments(dir, pattern)?;

    let write_error = |error| MergeError::WriteStream {
        path: final_path.to_owned(),
        error,
    };
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(final_path)
        .map_err(write_error)?;

    let mut summary = MergeSummary::default();
    let mut buf = vec![0u8; CHUNK_SIZE];
    for fragment in &fragments {
        let mut file = File::open(fragment).map_err(|error| MergeError::ReadFragment {
            path: fragment.clone(),
            error,
        })?;
        let copied = copy_chunked(&mut file, &mut out, &mut buf).map_err(|error| match error {
            CopyError::Read(error) => MergeError::ReadFragment {
                path: fragment.clone(),
                error,
            },
            CopyError::Write(error) => write_error(error),
        })?;
        drop(file);

        fs::remove_file(fragment).map_err(|error| MergeError::RemoveFragment {
            path: fragment.clone(),
            error,
        })?;
        debug!(%fragment, bytes = copied, "merged result fragment");

        summary.fragments += 1;
        summary.bytes += copied;
    }
    out.flush().map_err(write_error)?;

    Ok(summary)
}

/// Deletes every file in `dir` whose name matches `pattern` without merging it.
///
/// Returns the number of files deleted.
pub fn remove_fragments(dir: &Utf8Path, pattern: &str) -> Result<usize, MergeError> {
    let fragments = list_fragments(dir, pattern)?;
    for fragment in &fragments {
        fs::remove_file(fragment).map_err(|error| MergeError::RemoveFragment {
            path: fragment.clone(),
            error,
        })?;
    }
    Ok(fragments.len())
}

fn list_fragments(dir: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, MergeError> {
    let matcher = Glob::new(pattern)
        .map_err(|error| MergeError::InvalidPattern {
            pattern: pattern.to_owned(),
            error,
        })?
        .compile_matcher();

    let list_error = |error| MergeError::ListFragments {
        dir: dir.to_owned(),
        error,
    };
    let mut fragments = Vec::new();
    for entry in dir.read_dir_utf8().map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        if entry.file_type().map_err(list_error)?.is_file() && matcher.is_match(entry.file_name()) {
            fragments.push(entry.into_path());
        }
    }
    fragments.sort_unstable();
    Ok(fragments)
}

enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

fn copy_chunked(reader: &mut impl Read, writer: &mut impl Write, buf: &mut [u8]) -> Result<u64, CopyError> {
    let mut total = 0;
    loop {
        let n = match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(CopyError::Read(error)),
        };
        writer.write_all(&buf[..n]).map_err(CopyError::Write)?;
        total += n as u64;
    }
}

/// What could be observed about the final result stream after a failed merge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamState {
    /// The stream does not exist.
    Missing,

    /// The stream exists.
    Present {
        /// Its length in bytes.
        len: u64,

        /// Its SHA-256 checksum, as lowercase hex.
        sha256: String,
    },

    /// The stream exists but could not be read.
    Unreadable {
        /// The error, as text.
        message: String,
    },
}

impl StreamState {
    /// Inspects the file at `path`.
    pub fn inspect(path: &Utf8Path) -> Self {
        match fs::metadata(path) {
            Ok(metadata) => match file_checksum(path) {
                Ok(sha256) => StreamState::Present {
                    len: metadata.len(),
                    sha256,
                },
                Err(error) => StreamState::Unreadable {
                    message: error.to_string(),
                },
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => StreamState::Missing,
            Err(error) => StreamState::Unreadable {
                message: error.to_string(),
            },
        }
    }
}

/// Computes the SHA-256 checksum of a file, as lowercase hex.
pub fn file_checksum(path: &Utf8Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}
