// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Job environment snapshot and feature flags
//!
//! The process environment is read exactly once per run. Everything that
//! needs a job variable (flags, credentials) goes through the snapshot.

use std::collections::{BTreeSet, HashMap};

use super::{EnvironmentName, PipelineFile};

/// Immutable copy of the job variables
#[derive(Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Boolean value of a variable, `None` when unset or unrecognised
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(parse_flag)
    }
}

impl std::fmt::Debug for EnvSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // values may be credentials
        f.debug_struct("EnvSnapshot")
            .field("vars", &self.vars.len())
            .finish()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Switches selecting which optional stages run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Publish the source distribution
    pub publish: bool,
    /// Environments to dispatch tests to
    pub environments: BTreeSet<EnvironmentName>,
}

impl FeatureFlags {
    /// Job variables override the file defaults
    pub fn resolve(file: &PipelineFile, env: &EnvSnapshot) -> Self {
        let publish = env
            .flag(&file.flags.publish_var)
            .unwrap_or(file.flags.publish);

        let environments = file
            .environments
            .iter()
            .filter(|target| env.flag(&target.flag_var()).unwrap_or(target.enabled))
            .map(|target| target.name)
            .collect();

        Self {
            publish,
            environments,
        }
    }

    pub fn is_enabled(&self, name: EnvironmentName) -> bool {
        self.environments.contains(&name)
    }
}
