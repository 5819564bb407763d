// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Version literal in the library manifest
//!
//! The same pattern is used to read the upstream version and, at publish
//! time, to substitute the resolved library version in place.

use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

use crate::errors::{ShipflowError, ShipflowResult};

/// `version = "X"` or `version = 'X'`; `\b` keeps `python_version = ...` out.
fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\bversion\s*=\s*(?:"(?P<dq>[^"\n]+)"|'(?P<sq>[^'\n]+)')"#)
            .expect("version pattern is valid")
    })
}

fn literal<'a>(caps: &Captures<'a>) -> Option<&'a str> {
    caps.name("dq").or_else(|| caps.name("sq")).map(|m| m.as_str())
}

/// Extract the first version literal from manifest text
pub fn parse_upstream_version(content: &str) -> Option<String> {
    version_pattern()
        .captures(content)
        .and_then(|caps| literal(&caps).map(str::to_string))
}

/// Replace the first version literal, keeping the original quote style
pub fn rewrite_version(content: &str, new_version: &str) -> Option<String> {
    let caps = version_pattern().captures(content)?;
    let value = caps.name("dq").or_else(|| caps.name("sq"))?;

    let mut out = String::with_capacity(content.len() + new_version.len());
    out.push_str(&content[..value.start()]);
    out.push_str(new_version);
    out.push_str(&content[value.end()..]);
    Some(out)
}

/// Read the upstream version from a manifest file
pub fn read_upstream_version(path: &Path) -> ShipflowResult<String> {
    let content = std::fs::read_to_string(path).map_err(|e| ShipflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    parse_upstream_version(&content).ok_or_else(|| ShipflowError::MalformedManifest {
        path: path.to_path_buf(),
    })
}

/// Rewrite the manifest file in place with a new version literal
pub fn write_version(path: &Path, new_version: &str) -> ShipflowResult<()> {
    let content = std::fs::read_to_string(path).map_err(|e| ShipflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let updated = rewrite_version(&content, new_version).ok_or_else(|| ShipflowError::MalformedManifest {
        path: path.to_path_buf(),
    })?;

    std::fs::write(path, updated).map_err(|e| ShipflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    tracing::info!(manifest = %path.display(), version = new_version, "rewrote manifest version");
    Ok(())
}
