// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Container images
//!
//! Two image variants are built from the same Dockerfile per run. The
//! resulting repository tags are handed to the test stage, both as typed
//! values and as one-line artifact files for CI jobs that run the stages
//! separately.

mod classify;
mod publisher;

pub use classify::{PushClassifier, PushOutcome};
pub use publisher::{ImagePublisher, VariantSpec};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{ShipflowError, ShipflowResult};

/// Image variants built per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageVariant {
    /// Image the test runner and default steps use
    Primary,
    /// Image referenced by per-step overrides in the test flows
    AipStep,
}

impl ImageVariant {
    pub const ALL: [ImageVariant; 2] = [ImageVariant::Primary, ImageVariant::AipStep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::AipStep => "aip-step",
        }
    }

    /// Name of the hand-off file holding this variant's tag
    pub fn artifact_file(&self) -> &'static str {
        match self {
            Self::Primary => "image_tag",
            Self::AipStep => "aip_step_image_tag",
        }
    }
}

impl std::fmt::Display for ImageVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A published image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    pub variant: ImageVariant,
    /// Full reference, `host/repository:tag`
    pub repository_tag: String,
    pub push_outcome: PushOutcome,
}

/// Both images of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifacts {
    pub primary: ImageArtifact,
    pub aip_step: ImageArtifact,
}

impl ImageArtifacts {
    pub fn tags(&self) -> ImageTags {
        ImageTags {
            primary: self.primary.repository_tag.clone(),
            aip_step: self.aip_step.repository_tag.clone(),
        }
    }
}

/// The only data the test stage needs from the build stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTags {
    pub primary: String,
    pub aip_step: String,
}

impl ImageTags {
    /// Read both hand-off files written by the build stage
    pub fn read_from(dir: &Path) -> ShipflowResult<Self> {
        Ok(Self {
            primary: read_artifact(dir, ImageVariant::Primary)?,
            aip_step: read_artifact(dir, ImageVariant::AipStep)?,
        })
    }
}

/// Persist a variant's repository tag as a one-line file
pub fn write_artifact(dir: &Path, variant: ImageVariant, repository_tag: &str) -> ShipflowResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| ShipflowError::FileWriteError {
        path: dir.to_path_buf(),
        error: e.to_string(),
    })?;

    let path = dir.join(variant.artifact_file());
    std::fs::write(&path, format!("{}\n", repository_tag)).map_err(|e| ShipflowError::FileWriteError {
        path: path.clone(),
        error: e.to_string(),
    })?;

    Ok(path)
}

/// Remove a variant's tag file left by an earlier run
pub fn clear_artifact(dir: &Path, variant: ImageVariant) -> ShipflowResult<()> {
    let path = dir.join(variant.artifact_file());
    match std::fs::remove_file(&path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed previous image tag");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ShipflowError::FileWriteError {
            path,
            error: e.to_string(),
        }),
    }
}

/// Read a variant's repository tag back
pub fn read_artifact(dir: &Path, variant: ImageVariant) -> ShipflowResult<String> {
    let path = dir.join(variant.artifact_file());
    if !path.exists() {
        return Err(ShipflowError::MissingArtifact { path });
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ShipflowError::FileReadError {
        path: path.clone(),
        error: e.to_string(),
    })?;

    let tag = content.trim();
    if tag.is_empty() || tag.lines().count() != 1 {
        return Err(ShipflowError::MissingArtifact { path });
    }

    Ok(tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_round_trip_per_variant() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), ImageVariant::Primary, "r.example.com/ml/mf:2.1.345").unwrap();
        write_artifact(dir.path(), ImageVariant::AipStep, "r.example.com/ml/mf:2.1.345-aip-step").unwrap();

        let tags = ImageTags::read_from(dir.path()).unwrap();
        assert_eq!(tags.primary, "r.example.com/ml/mf:2.1.345");
        assert_eq!(tags.aip_step, "r.example.com/ml/mf:2.1.345-aip-step");

        let raw = std::fs::read_to_string(dir.path().join("image_tag")).unwrap();
        assert_eq!(raw, "r.example.com/ml/mf:2.1.345\n");
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), ImageVariant::Primary, "x:1").unwrap();

        match ImageTags::read_from(dir.path()) {
            Err(ShipflowError::MissingArtifact { path }) => {
                assert!(path.ends_with("aip_step_image_tag"));
            }
            other => panic!("Expected MissingArtifact, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_artifact_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("image_tag"), "\n").unwrap();
        assert!(read_artifact(dir.path(), ImageVariant::Primary).is_err());
    }
}
