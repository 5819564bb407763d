// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Image build and publish
//!
//! Per variant: build without layer cache, log in with this run's
//! credentials, push, classify the push, and persist the tag only when the
//! image is known to be in the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{clear_artifact, write_artifact, ImageArtifact, ImageArtifacts, ImageVariant, PushClassifier, PushOutcome};
use crate::config::{Credentials, PipelineConfig, PipelineFile, RunScope, TimeoutConfig};
use crate::errors::{ShipflowError, ShipflowResult};
use crate::executors::{CommandRunner, CommandSpec};

/// What distinguishes one image variant from the other
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSpec {
    pub variant: ImageVariant,
    /// Full reference the image is tagged and pushed as
    pub repository_tag: String,
    /// `NAME=value` build argument through which the image knows its own tag
    pub build_arg: String,
}

impl VariantSpec {
    pub fn new(file: &PipelineFile, variant: ImageVariant, image_tag: &str) -> Self {
        let tag = match variant {
            ImageVariant::Primary => image_tag.to_string(),
            ImageVariant::AipStep => format!("{}{}", image_tag, file.image.aip_step_suffix),
        };
        let repository_tag = format!("{}:{}", file.registry.image_name(), tag);
        let build_arg = format!("{}={}", file.image.build_arg, repository_tag);

        Self {
            variant,
            repository_tag,
            build_arg,
        }
    }
}

/// Builds and pushes the image variants of a run
pub struct ImagePublisher {
    runner: Arc<dyn CommandRunner>,
    config: Arc<PipelineConfig>,
    credentials: Credentials,
    classifier: PushClassifier,
    docker_config: PathBuf,
}

impl ImagePublisher {
    /// Resolve credentials and push policy for this run
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<PipelineConfig>,
        scope: &RunScope,
    ) -> ShipflowResult<Self> {
        let credentials = config.registry_credentials()?;
        let classifier = PushClassifier::new(&config.file.registry.benign_push_errors)?;
        let docker_config = scope.docker_config_dir()?;

        Ok(Self {
            runner,
            config,
            credentials,
            classifier,
            docker_config,
        })
    }

    /// Build and publish both variants concurrently
    pub async fn publish_all(&self, image_tag: &str) -> ShipflowResult<ImageArtifacts> {
        let (primary, aip_step) = tokio::join!(
            self.build_and_publish(ImageVariant::Primary, image_tag),
            self.build_and_publish(ImageVariant::AipStep, image_tag),
        );

        Ok(ImageArtifacts {
            primary: primary?,
            aip_step: aip_step?,
        })
    }

    /// Build, push and persist one variant
    pub async fn build_and_publish(&self, variant: ImageVariant, image_tag: &str) -> ShipflowResult<ImageArtifact> {
        let spec = VariantSpec::new(&self.config.file, variant, image_tag);
        let tag = spec.repository_tag.clone();

        // a failed push must not leave an older run's tag behind for dispatch
        clear_artifact(&self.config.artifacts_dir(), variant)?;

        // one client config per variant, the two publishes share nothing
        let docker_config = self.docker_config.join(variant.as_str());
        std::fs::create_dir_all(&docker_config).map_err(|e| ShipflowError::FileWriteError {
            path: docker_config.clone(),
            error: e.to_string(),
        })?;

        tracing::info!(variant = %variant, tag = %tag, "building image");
        let build = self.runner.run(&self.build_command(&spec)).await?;
        if !build.succeeded() {
            return Err(ShipflowError::ImageBuildFailed {
                tag,
                stderr: build.stderr,
            });
        }

        let login = self.runner.run(&self.login_command(variant, &docker_config)).await?;
        if !login.succeeded() {
            return Err(ShipflowError::RegistryAuthFailed {
                registry: self.config.file.registry.host.clone(),
                stderr: login.stderr,
            });
        }

        let push = self.runner.run(&self.push_command(&spec, &docker_config)).await?;
        let push_outcome = self.classifier.classify_output(&push);

        match push_outcome {
            PushOutcome::Success => {
                tracing::info!(variant = %variant, tag = %tag, "pushed image");
            }
            PushOutcome::DuplicateIgnored => {
                tracing::warn!(
                    variant = %variant,
                    tag = %tag,
                    stderr = %push.stderr.trim(),
                    "tag already present in registry, continuing"
                );
            }
            PushOutcome::Fatal => {
                tracing::error!(variant = %variant, tag = %tag, exit_code = push.exit_code, "push failed");
                return Err(ShipflowError::push_fatal(&tag, push.stderr));
            }
        }

        let artifact_path = write_artifact(&self.config.artifacts_dir(), variant, &tag)?;
        tracing::debug!(path = %artifact_path.display(), "persisted image tag");

        Ok(ImageArtifact {
            variant,
            repository_tag: tag,
            push_outcome,
        })
    }

    fn build_command(&self, spec: &VariantSpec) -> CommandSpec {
        let image = &self.config.file.image;
        let dockerfile = self.config.resolve_path(&image.dockerfile);
        let context = self.config.resolve_path(&image.context);

        CommandSpec::new(format!("build:{}", spec.variant), "docker")
            .args(["build", "--no-cache", "--pull", "-f"])
            .arg(path_arg(&dockerfile))
            .args(["--build-arg", spec.build_arg.as_str(), "-t", spec.repository_tag.as_str()])
            .arg(path_arg(&context))
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.build_secs))
    }

    fn login_command(&self, variant: ImageVariant, docker_config: &Path) -> CommandSpec {
        CommandSpec::new(format!("login:{}", variant), "docker")
            .args(["login", self.config.file.registry.host.as_str()])
            .args(["--username", self.credentials.username.as_str(), "--password-stdin"])
            .stdin(self.credentials.password.clone())
            .env("DOCKER_CONFIG", path_arg(docker_config))
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.login_secs))
    }

    fn push_command(&self, spec: &VariantSpec, docker_config: &Path) -> CommandSpec {
        CommandSpec::new(format!("push:{}", spec.variant), "docker")
            .args(["push", spec.repository_tag.as_str()])
            .env("DOCKER_CONFIG", path_arg(docker_config))
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.push_secs))
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSnapshot, IdentityInput};
    use crate::executors::scripted::ScriptedRunner;
    use crate::executors::CommandOutput;
    use crate::registry::{read_artifact, ImageTags};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(root: &Path) -> Arc<PipelineConfig> {
        let file = PipelineFile::from_yaml(
            r#"
name: demo
release: { major: 2, minor: 1 }
registry:
  host: registry.example.com
  repository: ml/metaflow
"#,
        )
        .unwrap();
        let env = EnvSnapshot::from_pairs([
            ("REGISTRY_USERNAME", "ci-bot"),
            ("REGISTRY_PASSWORD", "hunter2"),
        ]);
        let input = IdentityInput {
            run_counter: 345,
            branch: "feature/x".into(),
            default_branch: "master".into(),
            ..Default::default()
        };
        Arc::new(PipelineConfig::new(file, root.to_path_buf(), input, env).unwrap())
    }

    fn publisher(runner: Arc<ScriptedRunner>, root: &Path, scope: &RunScope) -> ImagePublisher {
        ImagePublisher::new(runner, config(root), scope).unwrap()
    }

    #[test]
    fn test_variant_specs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let primary = VariantSpec::new(&cfg.file, ImageVariant::Primary, "2.1.345.dev345");
        assert_eq!(primary.repository_tag, "registry.example.com/ml/metaflow:2.1.345.dev345");
        assert_eq!(
            primary.build_arg,
            "IMAGE_TAG=registry.example.com/ml/metaflow:2.1.345.dev345"
        );

        let aip = VariantSpec::new(&cfg.file, ImageVariant::AipStep, "2.1.345.dev345");
        assert_eq!(
            aip.repository_tag,
            "registry.example.com/ml/metaflow:2.1.345.dev345-aip-step"
        );
        assert!(aip.build_arg.ends_with("-aip-step"));
    }

    #[tokio::test]
    async fn test_successful_publish_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let publisher = publisher(runner.clone(), dir.path(), &scope);

        let artifact = publisher
            .build_and_publish(ImageVariant::Primary, "2.1.345")
            .await
            .unwrap();

        assert_eq!(artifact.push_outcome, PushOutcome::Success);
        assert_eq!(runner.labels(), vec!["build:primary", "login:primary", "push:primary"]);

        let calls = runner.calls();
        assert!(calls[0].args.contains(&"--no-cache".to_string()));
        assert_eq!(calls[1].stdin.as_ref().unwrap().expose(), "hunter2");
        assert!(!calls[1].args.iter().any(|a| a.contains("hunter2")));
        assert!(calls[2].env["DOCKER_CONFIG"].starts_with(&scope.path().to_string_lossy().to_string()));

        let persisted = read_artifact(&dir.path().join("artifacts"), ImageVariant::Primary).unwrap();
        assert_eq!(persisted, "registry.example.com/ml/metaflow:2.1.345");
    }

    #[tokio::test]
    async fn test_repush_of_same_tag_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let pushes = Arc::new(AtomicUsize::new(0));
        let counter = pushes.clone();

        let runner = Arc::new(ScriptedRunner::new(move |spec| {
            if spec.label.starts_with("push") && counter.fetch_add(1, Ordering::SeqCst) > 0 {
                Ok(CommandOutput::failure("manifest invalid: manifest invalid", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner, dir.path(), &scope);

        let first = publisher.build_and_publish(ImageVariant::Primary, "2.1.345").await.unwrap();
        let second = publisher.build_and_publish(ImageVariant::Primary, "2.1.345").await.unwrap();

        assert!(first.push_outcome.is_published());
        assert_eq!(second.push_outcome, PushOutcome::DuplicateIgnored);
        assert_eq!(first.repository_tag, second.repository_tag);
        assert!(dir.path().join("artifacts/image_tag").exists());
    }

    #[tokio::test]
    async fn test_duplicate_every_time_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label.starts_with("push") {
                Ok(CommandOutput::failure("manifest invalid", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner, dir.path(), &scope);

        for _ in 0..2 {
            let artifact = publisher.build_and_publish(ImageVariant::AipStep, "2.1.345").await.unwrap();
            assert_eq!(artifact.push_outcome, PushOutcome::DuplicateIgnored);
        }
    }

    #[tokio::test]
    async fn test_fatal_push_writes_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label.starts_with("push") {
                Ok(CommandOutput::failure("unauthorized: authentication required", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner, dir.path(), &scope);

        let result = publisher.build_and_publish(ImageVariant::Primary, "2.1.345").await;
        assert!(matches!(result, Err(ShipflowError::RegistryPushFatal { .. })));
        assert!(!dir.path().join("artifacts/image_tag").exists());
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_push() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label.starts_with("build") {
                Ok(CommandOutput::failure("COPY failed", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner.clone(), dir.path(), &scope);

        let result = publisher.build_and_publish(ImageVariant::Primary, "2.1.345").await;
        assert!(matches!(result, Err(ShipflowError::ImageBuildFailed { .. })));
        assert_eq!(runner.labels(), vec!["build:primary"]);
    }

    #[tokio::test]
    async fn test_publish_all_reports_failing_variant() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label == "push:aip-step" {
                Ok(CommandOutput::failure("blob upload unknown", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner.clone(), dir.path(), &scope);

        let result = publisher.publish_all("2.1.345").await;
        assert!(matches!(result, Err(ShipflowError::RegistryPushFatal { ref tag, .. }) if tag.ends_with("-aip-step")));

        // the sibling variant still ran to completion
        assert!(runner.labels().contains(&"push:primary".to_string()));
        assert!(dir.path().join("artifacts/image_tag").exists());
        assert!(!dir.path().join("artifacts/aip_step_image_tag").exists());
    }

    #[tokio::test]
    async fn test_failed_push_drops_previous_runs_tag() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let artifacts = dir.path().join("artifacts");
        write_artifact(&artifacts, ImageVariant::Primary, "registry.example.com/ml/metaflow:2.1.344").unwrap();
        write_artifact(&artifacts, ImageVariant::AipStep, "registry.example.com/ml/metaflow:2.1.344-aip-step").unwrap();

        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label == "push:aip-step" {
                Ok(CommandOutput::failure("blob upload unknown", 1))
            } else {
                Ok(CommandOutput::success(""))
            }
        }));
        let publisher = publisher(runner, dir.path(), &scope);

        assert!(publisher.publish_all("2.1.345").await.is_err());

        let primary = read_artifact(&artifacts, ImageVariant::Primary).unwrap();
        assert_eq!(primary, "registry.example.com/ml/metaflow:2.1.345");
        assert!(!artifacts.join("aip_step_image_tag").exists());
        assert!(matches!(
            ImageTags::read_from(&artifacts),
            Err(ShipflowError::MissingArtifact { .. })
        ));
    }
}
