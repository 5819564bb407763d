// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Error types with recovery hints
//!
//! Every fatal condition in a release run maps to one variant here, each
//! with a stable diagnostic code so CI logs can be grepped reliably.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for shipflow operations
pub type ShipflowResult<T> = Result<T, ShipflowError>;

/// Main error type for shipflow
#[derive(Error, Debug, Diagnostic)]
pub enum ShipflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline config not found: {path}")]
    #[diagnostic(
        code(shipflow::config_not_found),
        help("Create a .shipflow.yaml next to the packaged library or pass --config")
    )]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(shipflow::invalid_config))]
    InvalidConfig {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Credential '{concern}' is missing: variable {variable} is not set")]
    #[diagnostic(
        code(shipflow::missing_credential),
        help("Export {variable} in the CI job that runs this stage")
    )]
    MissingCredential { concern: String, variable: String },

    #[error("Environment '{environment}' is enabled but misconfigured: {missing}")]
    #[diagnostic(code(shipflow::environment_misconfigured))]
    EnvironmentMisconfigured {
        environment: String,
        missing: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Version Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No version literal found in manifest {path}")]
    #[diagnostic(
        code(shipflow::malformed_manifest),
        help("The manifest must contain a line like: version = \"1.2.3\"")
    )]
    MalformedManifest { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────────
    // Command Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(shipflow::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    #[error("Command '{label}' could not be run: {error}")]
    #[diagnostic(code(shipflow::command_failed))]
    CommandFailed {
        label: String,
        error: String,
        #[help]
        help: Option<String>,
    },

    #[error("Command '{label}' timed out after {seconds}s")]
    #[diagnostic(
        code(shipflow::command_timed_out),
        help("Raise the matching entry under `timeouts:` if the step is legitimately slow")
    )]
    CommandTimedOut { label: String, seconds: u64 },

    // ─────────────────────────────────────────────────────────────────────────
    // Image Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Image build failed for {tag}")]
    #[diagnostic(code(shipflow::image_build_failed))]
    ImageBuildFailed { tag: String, stderr: String },

    #[error("Login to registry {registry} failed")]
    #[diagnostic(
        code(shipflow::registry_auth_failed),
        help("Check the registry username/password variables for this run")
    )]
    RegistryAuthFailed { registry: String, stderr: String },

    #[error("Push of {tag} failed")]
    #[diagnostic(code(shipflow::registry_push_fatal))]
    RegistryPushFatal {
        tag: String,
        stderr: String,
        #[help]
        help: Option<String>,
    },

    #[error("Build artifact missing: {path}")]
    #[diagnostic(
        code(shipflow::missing_artifact),
        help("Run `shipflow build-images` first so the image tags are persisted")
    )]
    MissingArtifact { path: PathBuf },

    // ─────────────────────────────────────────────────────────────────────────
    // Package Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Source distribution build failed")]
    #[diagnostic(code(shipflow::package_build_failed))]
    PackageBuildFailed { stderr: String },

    #[error("Upload of {version} to {index} was rejected")]
    #[diagnostic(code(shipflow::package_publish_failure))]
    PackagePublishFailure {
        index: String,
        version: String,
        stderr: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(
        "Integration tests failed on '{environment}' ({failed_workers} of {workers} workers), reports in {report_dir}"
    )]
    #[diagnostic(code(shipflow::test_dispatch_failure))]
    TestDispatchFailure {
        environment: String,
        failed_workers: usize,
        workers: usize,
        report_dir: PathBuf,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid pipeline transition from {from} to {to}")]
    #[diagnostic(code(shipflow::invalid_transition))]
    InvalidTransition { from: String, to: String },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(shipflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(shipflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(shipflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(shipflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(shipflow::json_error))]
    Json { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(shipflow::glob_error))]
    GlobPattern { message: String },

    #[error("Invalid pattern: {message}")]
    #[diagnostic(code(shipflow::regex_error))]
    Regex { message: String },
}

impl From<std::io::Error> for ShipflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ShipflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ShipflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<glob::PatternError> for ShipflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl From<regex::Error> for ShipflowError {
    fn from(e: regex::Error) -> Self {
        Self::Regex { message: e.to_string() }
    }
}

impl ShipflowError {
    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "docker" => "Install Docker: https://docs.docker.com/engine/install/".to_string(),
            "twine" => "Install twine: pip install twine".to_string(),
            "python" | "python3" => "Install Python 3 and ensure `python` is on PATH".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create a fatal push error with a hint derived from the registry output
    pub fn push_fatal(tag: &str, stderr: String) -> Self {
        let help = Self::hint_for_push_error(&stderr);
        Self::RegistryPushFatal {
            tag: tag.to_string(),
            stderr,
            help,
        }
    }

    /// Short stage-agnostic name of the error kind, used in summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } | Self::InvalidConfig { .. } => "config",
            Self::MissingCredential { .. } => "missing_credential",
            Self::EnvironmentMisconfigured { .. } => "environment_misconfigured",
            Self::MalformedManifest { .. } => "malformed_manifest",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::CommandFailed { .. } => "command_failed",
            Self::CommandTimedOut { .. } => "timeout",
            Self::ImageBuildFailed { .. } => "image_build",
            Self::RegistryAuthFailed { .. } => "registry_auth",
            Self::RegistryPushFatal { .. } => "registry_push",
            Self::MissingArtifact { .. } => "missing_artifact",
            Self::PackageBuildFailed { .. } => "package_build",
            Self::PackagePublishFailure { .. } => "package_publish",
            Self::TestDispatchFailure { .. } => "test_dispatch",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::FileReadError { .. } | Self::FileWriteError { .. } | Self::Io { .. } => "io",
            Self::Yaml { .. } | Self::Json { .. } => "serialization",
            Self::GlobPattern { .. } | Self::Regex { .. } => "pattern",
        }
    }

    /// Captured stderr of the failing command, if the error carries one
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ImageBuildFailed { stderr, .. }
            | Self::RegistryAuthFailed { stderr, .. }
            | Self::RegistryPushFatal { stderr, .. }
            | Self::PackageBuildFailed { stderr }
            | Self::PackagePublishFailure { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    fn hint_for_push_error(stderr: &str) -> Option<String> {
        let lower = stderr.to_lowercase();
        if lower.contains("unauthorized") || lower.contains("authentication required") {
            Some("The registry rejected the credentials used for this run.".into())
        } else if lower.contains("denied") {
            Some(
                "The registry denied the push. If this is another flavour of \
                 'tag already exists', add it to registry.benign_push_errors."
                    .into(),
            )
        } else if lower.contains("timeout") || lower.contains("connection reset") {
            Some("Network failure while pushing; re-run the pipeline with the same run counter.".into())
        } else {
            None
        }
    }
}
