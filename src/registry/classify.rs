// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Push outcome classification
//!
//! Registries reject a second push of an existing immutable tag with an
//! error. Those answers mean the content is already there, so they are
//! classified as [`PushOutcome::DuplicateIgnored`] instead of failing the run.

use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::default_benign_push_errors;
use crate::errors::ShipflowResult;
use crate::executors::CommandOutput;

/// Result of a registry push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// Pushed without any error output
    Success,
    /// Tag already present; treated as success
    DuplicateIgnored,
    /// Any other failure
    Fatal,
}

impl PushOutcome {
    /// Whether the tag is available in the registry after the push
    pub fn is_published(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl std::fmt::Display for PushOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "pushed"),
            Self::DuplicateIgnored => write!(f, "already present"),
            Self::Fatal => write!(f, "failed"),
        }
    }
}

/// Classifies push error output against a set of benign patterns
#[derive(Debug, Clone)]
pub struct PushClassifier {
    benign: RegexSet,
}

impl PushClassifier {
    /// Build from case-insensitive regex patterns
    pub fn new<I, S>(patterns: I) -> ShipflowResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let benign = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(Self { benign })
    }

    /// Configured patterns
    pub fn patterns(&self) -> &[String] {
        self.benign.patterns()
    }

    /// Classify the error channel of a push
    pub fn classify(&self, stderr: &str) -> PushOutcome {
        if stderr.trim().is_empty() {
            PushOutcome::Success
        } else if self.benign.is_match(stderr) {
            PushOutcome::DuplicateIgnored
        } else {
            PushOutcome::Fatal
        }
    }

    /// Classify a finished push command.
    ///
    /// A non-zero exit with nothing on stderr (killed client, signal) is
    /// fatal: silence only counts as success when the push also exited 0.
    pub fn classify_output(&self, output: &CommandOutput) -> PushOutcome {
        match self.classify(&output.stderr) {
            PushOutcome::Success if !output.succeeded() => PushOutcome::Fatal,
            outcome => outcome,
        }
    }
}

impl Default for PushClassifier {
    fn default() -> Self {
        Self::new(default_benign_push_errors()).expect("default push patterns are valid")
    }
}
