// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Integration-test environment targets

use serde::{Deserialize, Serialize};

/// Known test environments
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    Sandbox,
    Internal,
    Nonprod,
    Prod,
}

impl EnvironmentName {
    /// All environments in declaration order
    pub const ALL: [EnvironmentName; 4] = [
        EnvironmentName::Sandbox,
        EnvironmentName::Internal,
        EnvironmentName::Nonprod,
        EnvironmentName::Prod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Internal => "internal",
            Self::Nonprod => "nonprod",
            Self::Prod => "prod",
        }
    }

    /// Name of the job variable that switches this environment on
    pub fn default_flag_var(&self) -> String {
        format!("{}_TESTS", self.as_str().to_uppercase())
    }
}

impl std::fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EnvironmentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "internal" => Ok(Self::Internal),
            "nonprod" => Ok(Self::Nonprod),
            "prod" => Ok(Self::Prod),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

/// UI prefixes used to build links to runs launched by the tests
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunUrlPrefixes {
    /// Argo workflow UI
    pub argo: String,
    /// Metaflow run-tracking UI
    pub metaflow: String,
}

/// A cluster against which integration tests may be dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentTarget {
    /// Environment name
    pub name: EnvironmentName,

    /// Default when the flag variable is not set
    #[serde(default)]
    pub enabled: bool,

    /// Variable holding the kubeconfig (content or path to a file)
    pub kubeconfig_var: String,

    /// Kubernetes namespace the test workflows run in
    pub namespace: String,

    /// Workflow and run-tracking UI prefixes
    #[serde(default)]
    pub run_url_prefixes: RunUrlPrefixes,

    /// Overrides the `<NAME>_TESTS` flag variable
    #[serde(default)]
    pub flag_var: Option<String>,
}

impl EnvironmentTarget {
    /// Variable consulted to enable this environment
    pub fn flag_var(&self) -> String {
        self.flag_var
            .clone()
            .unwrap_or_else(|| self.name.default_flag_var())
    }

    /// Argo UI listing for this target's namespace
    pub fn argo_namespace_url(&self) -> Option<String> {
        let prefix = self.run_url_prefixes.argo.trim_end_matches('/');
        if prefix.is_empty() {
            None
        } else {
            Some(format!("{}/argo-ui/workflows/{}", prefix, self.namespace))
        }
    }
}
