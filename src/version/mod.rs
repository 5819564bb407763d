// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Version resolution
//!
//! Derives the library version and the image tag of a run from the fork's
//! release line, the run counter and the upstream version found in the
//! manifest. Resolution is pure: the same inputs always give the same
//! strings, which is what makes re-running a pipeline safe.
//!
//! | branch   | library version               | image tag          |
//! |----------|-------------------------------|--------------------|
//! | default  | `2.1.345+2.1.0`               | `2.1.345`          |
//! | other    | `2.1.345-dev.345+2.1.0`       | `2.1.345.dev345`   |

mod manifest;

pub use manifest::{parse_upstream_version, read_upstream_version, rewrite_version, write_version};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::ShipflowResult;

/// Identity of one pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub major: u64,
    pub minor: u64,
    /// Strictly increasing per pipeline invocation
    pub run_counter: u64,
    pub branch: String,
    pub default_branch: String,
}

impl RunIdentity {
    pub fn is_default_branch(&self) -> bool {
        self.branch == self.default_branch
    }
}

/// The two spellings of a run's version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVersion {
    /// Version of the packaged upstream library
    pub upstream: String,
    /// Package version; build metadata after `+` is traceability only
    pub library_version: String,
    /// Registry tag; never contains `+`
    pub image_tag: String,
}

/// Resolve both version strings for a run
pub fn resolve(upstream: &str, identity: &RunIdentity) -> ResolvedVersion {
    let base = format!("{}.{}.{}", identity.major, identity.minor, identity.run_counter);

    let mut library_version = if identity.is_default_branch() {
        base
    } else {
        format!("{}-dev.{}", base, identity.run_counter)
    };
    library_version.push('+');
    library_version.push_str(upstream);

    let image_tag = image_tag_for(&library_version);

    ResolvedVersion {
        upstream: upstream.to_string(),
        library_version,
        image_tag,
    }
}

/// Read the manifest and resolve
pub fn resolve_from_manifest(path: &Path, identity: &RunIdentity) -> ShipflowResult<ResolvedVersion> {
    let upstream = read_upstream_version(path)?;
    let resolved = resolve(&upstream, identity);

    tracing::info!(
        upstream = %resolved.upstream,
        library_version = %resolved.library_version,
        image_tag = %resolved.image_tag,
        "resolved version"
    );

    Ok(resolved)
}

/// Derive the image tag from a library version.
///
/// Drops the `+` build metadata and turns the `-dev.N` pre-release into the
/// `.devN` form accepted by registry tag grammars.
pub fn image_tag_for(library_version: &str) -> String {
    let without_metadata = library_version
        .split_once('+')
        .map(|(version, _)| version)
        .unwrap_or(library_version);

    match without_metadata.split_once("-dev.") {
        Some((base, counter)) => format!("{}.dev{}", base, counter),
        None => without_metadata.to_string(),
    }
}
