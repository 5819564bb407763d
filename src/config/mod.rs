// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline configuration
//!
//! `.shipflow.yaml` holds the static part of a release pipeline. It is
//! combined with the run identity and a one-time snapshot of the job
//! variables into an immutable [`PipelineConfig`] that every stage receives
//! at construction.

mod env;
mod environment;
mod scope;

pub use env::{EnvSnapshot, FeatureFlags};
pub use environment::{EnvironmentName, EnvironmentTarget, RunUrlPrefixes};
pub use scope::{Credentials, RunScope, Secret};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{ShipflowError, ShipflowResult};
use crate::version::RunIdentity;

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = ".shipflow.yaml";

/// Contents of `.shipflow.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    /// Config schema version
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Versioning file of the packaged library
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Major/minor of the fork's own release line
    #[serde(default)]
    pub release: ReleaseConfig,

    /// Container registry
    pub registry: RegistryConfig,

    /// Image build settings
    #[serde(default)]
    pub image: ImageConfig,

    /// Package index settings
    #[serde(default)]
    pub package: PackageConfig,

    /// Test dispatch settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Test environments
    #[serde(default)]
    pub environments: Vec<EnvironmentTarget>,

    /// Default values for the feature flags
    #[serde(default)]
    pub flags: FlagConfig,

    /// Where the image tag hand-off files are written
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    /// Upper bounds for external commands
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("setup.py")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

impl PipelineFile {
    /// Load from a YAML file
    pub fn from_file(path: &Path) -> ShipflowResult<Self> {
        if !path.exists() {
            return Err(ShipflowError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShipflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse from a YAML string
    pub fn from_yaml(yaml: &str) -> ShipflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }
}

/// Release line numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub major: Option<u64>,
    #[serde(default)]
    pub minor: Option<u64>,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. `registry.example.com`
    pub host: String,

    /// Repository path inside the registry
    pub repository: String,

    #[serde(default = "default_registry_username_var")]
    pub username_var: String,

    #[serde(default = "default_registry_password_var")]
    pub password_var: String,

    /// Case-insensitive patterns for push errors meaning "tag already exists"
    #[serde(default = "default_benign_push_errors")]
    pub benign_push_errors: Vec<String>,
}

fn default_registry_username_var() -> String {
    "REGISTRY_USERNAME".to_string()
}

fn default_registry_password_var() -> String {
    "REGISTRY_PASSWORD".to_string()
}

/// Registry answers for a re-push of an existing, immutable tag
pub fn default_benign_push_errors() -> Vec<String> {
    vec![
        "manifest invalid".to_string(),
        "not enough permissions to delete/overwrite".to_string(),
    ]
}

impl RegistryConfig {
    /// Repository reference without tag
    pub fn image_name(&self) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            self.repository.trim_matches('/')
        )
    }
}

/// Image build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Build context
    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// Shared Dockerfile for both variants
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    /// Build argument receiving the image's own repository tag
    #[serde(default = "default_build_arg")]
    pub build_arg: String,

    /// Tag suffix of the AIP-step variant
    #[serde(default = "default_aip_step_suffix")]
    pub aip_step_suffix: String,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn default_build_arg() -> String {
    "IMAGE_TAG".to_string()
}

fn default_aip_step_suffix() -> String {
    "-aip-step".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            context: default_context(),
            dockerfile: default_dockerfile(),
            build_arg: default_build_arg(),
            aip_step_suffix: default_aip_step_suffix(),
        }
    }
}

/// Package index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Upload endpoint of the index
    #[serde(default = "default_index_url")]
    pub index_url: String,

    #[serde(default = "default_index_username_var")]
    pub username_var: String,

    #[serde(default = "default_index_password_var")]
    pub password_var: String,

    /// Command producing the source distribution; `--dist-dir` is appended
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,

    /// Output directory of the source distribution
    #[serde(default = "default_dist_dir")]
    pub dist_dir: PathBuf,
}

fn default_index_url() -> String {
    "https://upload.pypi.org/legacy/".to_string()
}

fn default_index_username_var() -> String {
    "PACKAGE_INDEX_USERNAME".to_string()
}

fn default_index_password_var() -> String {
    "PACKAGE_INDEX_PASSWORD".to_string()
}

fn default_build_command() -> Vec<String> {
    vec!["python".into(), "setup.py".into(), "sdist".into()]
}

fn default_dist_dir() -> PathBuf {
    PathBuf::from("dist")
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            username_var: default_index_username_var(),
            password_var: default_index_password_var(),
            build_command: default_build_command(),
            dist_dir: default_dist_dir(),
        }
    }
}

/// Test dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Parallel test workers per environment
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Root of the per-environment report directories
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,

    /// Command run inside the primary image by each worker.
    /// `{worker}`, `{workers}` and `{report_file}` are substituted.
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,

    /// Variable carrying the AIP-step image into the runner
    #[serde(default = "default_aip_step_image_var")]
    pub aip_step_image_var: String,

    /// Kubeconfig location inside the runner container
    #[serde(default = "default_container_kubeconfig")]
    pub container_kubeconfig: String,

    /// Report mount inside the runner container
    #[serde(default = "default_container_reports")]
    pub container_reports: String,
}

fn default_workers() -> usize {
    6
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_test_command() -> Vec<String> {
    [
        "python",
        "-m",
        "pytest",
        "metaflow/plugins/aip/tests",
        "--splits",
        "{workers}",
        "--group",
        "{worker}",
        "--junitxml",
        "{report_file}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_aip_step_image_var() -> String {
    "AIP_STEP_IMAGE".to_string()
}

fn default_container_kubeconfig() -> String {
    "/root/.kube/config".to_string()
}

fn default_container_reports() -> String {
    "/reports".to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            reports_dir: default_reports_dir(),
            test_command: default_test_command(),
            aip_step_image_var: default_aip_step_image_var(),
            container_kubeconfig: default_container_kubeconfig(),
            container_reports: default_container_reports(),
        }
    }
}

/// File defaults for the feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfig {
    #[serde(default)]
    pub publish: bool,

    #[serde(default = "default_publish_var")]
    pub publish_var: String,
}

fn default_publish_var() -> String {
    "PUBLISH".to_string()
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            publish: false,
            publish_var: default_publish_var(),
        }
    }
}

/// Timeouts in seconds, `0` disables the bound
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    #[serde(default = "default_login_secs")]
    pub login_secs: u64,
    #[serde(default = "default_push_secs")]
    pub push_secs: u64,
    #[serde(default = "default_package_secs")]
    pub package_secs: u64,
    #[serde(default = "default_test_secs")]
    pub test_secs: u64,
}

fn default_build_secs() -> u64 {
    3600
}

fn default_login_secs() -> u64 {
    120
}

fn default_push_secs() -> u64 {
    1800
}

fn default_package_secs() -> u64 {
    900
}

fn default_test_secs() -> u64 {
    7200
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            build_secs: default_build_secs(),
            login_secs: default_login_secs(),
            push_secs: default_push_secs(),
            package_secs: default_package_secs(),
            test_secs: default_test_secs(),
        }
    }
}

impl TimeoutConfig {
    /// Convert a seconds setting into an optional bound
    pub fn bound(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Run identity as supplied on the command line or by the CI job
#[derive(Debug, Clone, Default)]
pub struct IdentityInput {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub run_counter: u64,
    pub branch: String,
    pub default_branch: String,
}

/// Fully resolved, immutable configuration of one run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Static settings
    pub file: PipelineFile,
    /// Directory relative paths are resolved against
    pub root: PathBuf,
    /// Who is running
    pub identity: RunIdentity,
    /// Which optional stages run
    pub flags: FeatureFlags,
    env: EnvSnapshot,
}

impl PipelineConfig {
    /// Load the config file and combine it with identity and job variables
    pub fn load(path: &Path, input: IdentityInput, env: EnvSnapshot) -> ShipflowResult<Self> {
        let file = PipelineFile::from_file(path)?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::new(file, root, input, env)
    }

    /// Combine an already parsed file with identity and job variables
    pub fn new(
        file: PipelineFile,
        root: PathBuf,
        input: IdentityInput,
        env: EnvSnapshot,
    ) -> ShipflowResult<Self> {
        let identity = Self::identity(&file, input)?;
        let flags = FeatureFlags::resolve(&file, &env);

        tracing::debug!(
            run_counter = identity.run_counter,
            branch = %identity.branch,
            publish = flags.publish,
            environments = ?flags.environments,
            "resolved pipeline configuration"
        );

        Ok(Self {
            file,
            root,
            identity,
            flags,
            env,
        })
    }

    fn identity(file: &PipelineFile, input: IdentityInput) -> ShipflowResult<RunIdentity> {
        let major = input.major.or(file.release.major).ok_or_else(|| ShipflowError::InvalidConfig {
            reason: "release major version is not set".into(),
            help: Some("Set release.major in the config or pass --major".into()),
        })?;
        let minor = input.minor.or(file.release.minor).ok_or_else(|| ShipflowError::InvalidConfig {
            reason: "release minor version is not set".into(),
            help: Some("Set release.minor in the config or pass --minor".into()),
        })?;

        if input.branch.trim().is_empty() {
            return Err(ShipflowError::InvalidConfig {
                reason: "branch name is empty".into(),
                help: Some("Pass --branch or set CI_COMMIT_REF_NAME".into()),
            });
        }

        Ok(RunIdentity {
            major,
            minor,
            run_counter: input.run_counter,
            branch: input.branch,
            default_branch: input.default_branch,
        })
    }

    /// Resolve a configured path against the config directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.resolve_path(&self.file.manifest)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve_path(&self.file.artifacts_dir)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.resolve_path(&self.file.dispatch.reports_dir)
    }

    /// Where the published sdist is kept after the run
    pub fn dist_dir(&self) -> PathBuf {
        self.resolve_path(&self.file.package.dist_dir)
    }

    /// Registry login for this run
    pub fn registry_credentials(&self) -> ShipflowResult<Credentials> {
        let registry = &self.file.registry;
        self.credentials("registry", &registry.username_var, &registry.password_var)
    }

    /// Package index login for this run
    pub fn package_credentials(&self) -> ShipflowResult<Credentials> {
        let package = &self.file.package;
        self.credentials("package index", &package.username_var, &package.password_var)
    }

    fn credentials(&self, concern: &str, user_var: &str, password_var: &str) -> ShipflowResult<Credentials> {
        let username = self.env.get(user_var).ok_or_else(|| ShipflowError::MissingCredential {
            concern: format!("{} username", concern),
            variable: user_var.to_string(),
        })?;
        let password = self.env.get(password_var).ok_or_else(|| ShipflowError::MissingCredential {
            concern: format!("{} password", concern),
            variable: password_var.to_string(),
        })?;

        Ok(Credentials {
            username: username.to_string(),
            password: Secret::new(password),
        })
    }

    /// Environments selected by the flags, in config order
    pub fn enabled_environments(&self) -> Vec<&EnvironmentTarget> {
        self.file
            .environments
            .iter()
            .filter(|target| self.flags.is_enabled(target.name))
            .collect()
    }

    /// Cluster credentials of an environment
    pub fn kubeconfig(&self, target: &EnvironmentTarget) -> ShipflowResult<Secret> {
        if target.namespace.trim().is_empty() {
            return Err(ShipflowError::EnvironmentMisconfigured {
                environment: target.name.to_string(),
                missing: "namespace".into(),
                help: Some(format!("Set `namespace` for the {} environment", target.name)),
            });
        }

        self.env
            .get(&target.kubeconfig_var)
            .map(Secret::new)
            .ok_or_else(|| ShipflowError::EnvironmentMisconfigured {
                environment: target.name.to_string(),
                missing: format!("kubeconfig variable {}", target.kubeconfig_var),
                help: Some(format!(
                    "Export {} or disable {}",
                    target.kubeconfig_var,
                    target.flag_var()
                )),
            })
    }
}
