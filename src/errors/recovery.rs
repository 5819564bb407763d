// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from a failed run.

use super::ShipflowError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if there is a useful one
    pub fn for_error(error: &ShipflowError) -> Option<Self> {
        match error {
            ShipflowError::ToolNotFound { tool, .. } => Some(Self::install_tool(tool)),
            ShipflowError::MalformedManifest { path } => Some(Self::fix_manifest(&path.display().to_string())),
            ShipflowError::RegistryPushFatal { tag, .. } => Some(Self::rerun_push(tag)),
            ShipflowError::MissingCredential { variable, .. } => Some(Self::export_variable(variable)),
            ShipflowError::EnvironmentMisconfigured { environment, .. } => {
                Some(Self::fix_environment(environment))
            }
            ShipflowError::TestDispatchFailure { report_dir, .. } => {
                Some(Self::inspect_reports(&report_dir.display().to_string()))
            }
            ShipflowError::MissingArtifact { .. } => Some(Self::build_images_first()),
            _ => None,
        }
    }

    /// Suggest installing a missing tool
    pub fn install_tool(tool: &str) -> Self {
        match tool {
            "docker" => Self {
                action: "Install Docker".into(),
                steps: vec![
                    "Docker is required to build, push and run test images".into(),
                    "The CI runner needs access to a docker daemon".into(),
                ],
                commands: vec!["docker version".into()],
            },
            "twine" => Self {
                action: "Install twine".into(),
                steps: vec!["twine uploads the source distribution to the package index".into()],
                commands: vec!["pip install twine".into()],
            },
            _ => Self {
                action: format!("Install {}", tool),
                steps: vec![format!("Install {} and ensure it's in your PATH", tool)],
                commands: vec![],
            },
        }
    }

    /// Suggest fixing the version literal in the manifest
    pub fn fix_manifest(path: &str) -> Self {
        Self {
            action: format!("Add a version literal to {}", path),
            steps: vec![
                "The upstream version is read from a `version = \"X.Y.Z\"` assignment".into(),
                "Single or double quotes are both accepted".into(),
            ],
            commands: vec![format!("grep -n \"version\" {}", path)],
        }
    }

    /// Suggest re-running after a fatal push
    pub fn rerun_push(tag: &str) -> Self {
        Self {
            action: format!("Investigate the failed push of {}", tag),
            steps: vec![
                "No build artifact was written, so test stages did not run".into(),
                "Re-running the pipeline with the same run counter is safe".into(),
            ],
            commands: vec![format!("docker manifest inspect {}", tag)],
        }
    }

    /// Suggest exporting a missing variable
    pub fn export_variable(variable: &str) -> Self {
        Self {
            action: format!("Provide {}", variable),
            steps: vec![
                "Credentials are read once from the job environment".into(),
                "They are never cached between runs".into(),
            ],
            commands: vec![format!("export {}=...", variable)],
        }
    }

    /// Suggest fixing an enabled environment
    pub fn fix_environment(environment: &str) -> Self {
        Self {
            action: format!("Complete the '{}' environment", environment),
            steps: vec![
                "An enabled environment needs a namespace and a kubeconfig".into(),
                "Disable the environment flag if it should not run".into(),
            ],
            commands: vec!["shipflow validate".into()],
        }
    }

    /// Point at the preserved test reports
    pub fn inspect_reports(report_dir: &str) -> Self {
        Self {
            action: "Inspect the integration test reports".into(),
            steps: vec![format!("Worker logs and summary.json are in {}", report_dir)],
            commands: vec![format!("cat {}/summary.json", report_dir)],
        }
    }

    /// Suggest running the image stage before dispatching tests
    pub fn build_images_first() -> Self {
        Self {
            action: "Publish the images first".into(),
            steps: vec!["Test dispatch consumes the two image tag files written by the build stage".into()],
            commands: vec!["shipflow build-images".into()],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
