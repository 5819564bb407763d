// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Release pipeline executor
//!
//! Runs the planned stages in dependency order. Independent stages run
//! concurrently; a failure blocks only the stages that need its output.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::plan::{PipelinePlan, StageKind};
use super::state::{PipelineState, StateMachine};
use crate::config::{PipelineConfig, RunScope};
use crate::dispatch::{TestDispatcher, TestRunResult};
use crate::errors::{ShipflowError, ShipflowResult};
use crate::executors::CommandRunner;
use crate::package::{keep_archive, PackagePublisher, PublishOutcome};
use crate::registry::{ImageArtifact, ImageArtifacts, ImagePublisher, ImageVariant};
use crate::version::{resolve_from_manifest, ResolvedVersion};

/// Pipeline execution options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Only work out what would be done
    pub dry_run: bool,
}

/// What happened to a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum StageStatus {
    Succeeded,
    Failed(String),
    /// Not selected for this run, or never reached
    Skipped,
    /// A prerequisite failed
    Blocked(StageKind),
}

/// Result of executing a release run
#[derive(Debug)]
pub struct PipelineResult {
    pub plan: PipelinePlan,
    pub version: Option<ResolvedVersion>,
    pub images: Option<ImageArtifacts>,
    pub package: Option<PublishOutcome>,
    pub tests: Vec<TestRunResult>,
    /// Status of every known stage, including ones switched off
    pub stages: BTreeMap<StageKind, StageStatus>,
    /// Fatal errors, in the order they were recorded
    pub failures: Vec<(StageKind, ShipflowError)>,
    pub state: PipelineState,
    /// States the run passed through, ending with `state`
    pub history: Vec<PipelineState>,
    pub duration: Duration,
}

impl PipelineResult {
    fn new(plan: PipelinePlan, config: &PipelineConfig) -> Self {
        let mut stages = BTreeMap::new();
        stages.insert(StageKind::ResolveVersion, StageStatus::Skipped);
        for variant in ImageVariant::ALL {
            stages.insert(StageKind::BuildImage(variant), StageStatus::Skipped);
        }
        stages.insert(StageKind::PublishPackage, StageStatus::Skipped);
        for target in &config.file.environments {
            stages.insert(StageKind::Test(target.name), StageStatus::Skipped);
        }

        Self {
            plan,
            version: None,
            images: None,
            package: None,
            tests: Vec::new(),
            stages,
            failures: Vec::new(),
            state: PipelineState::Start,
            history: vec![PipelineState::Start],
            duration: Duration::ZERO,
        }
    }

    /// No stage failed and the run was not aborted
    pub fn success(&self) -> bool {
        self.failures.is_empty() && self.state != PipelineState::Failed
    }

    pub fn status(&self, stage: StageKind) -> Option<&StageStatus> {
        self.stages.get(&stage)
    }

    /// First fatal error, for the process exit
    pub fn into_error(self) -> Option<ShipflowError> {
        self.failures.into_iter().next().map(|(_, e)| e)
    }

    fn succeed(&mut self, stage: StageKind) {
        self.stages.insert(stage, StageStatus::Succeeded);
    }

    fn fail(&mut self, stage: StageKind, error: ShipflowError) {
        tracing::error!(stage = %stage, kind = error.kind(), "{}", error);

        self.stages.insert(stage, StageStatus::Failed(error.to_string()));
        for blocked in self.plan.blocked_by(stage) {
            if self.stages.get(&blocked) == Some(&StageStatus::Skipped) {
                tracing::warn!(stage = %blocked, by = %stage, "stage blocked");
                self.stages.insert(blocked, StageStatus::Blocked(stage));
            }
        }
        self.failures.push((stage, error));
    }

    fn finish(mut self, machine: &StateMachine, start: Instant) -> Self {
        self.state = machine.state();
        self.history = machine.history().to_vec();
        self.duration = start.elapsed();
        self
    }
}

/// Runs a whole release
pub struct ReleasePipeline {
    runner: Arc<dyn CommandRunner>,
    config: Arc<PipelineConfig>,
}

impl ReleasePipeline {
    pub fn new(runner: Arc<dyn CommandRunner>, config: Arc<PipelineConfig>) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stages this run would execute
    pub fn plan(&self) -> PipelinePlan {
        PipelinePlan::from_config(&self.config)
    }

    /// Programs the planned stages invoke
    pub fn required_tools(&self) -> Vec<String> {
        let mut tools = vec!["docker".to_string()];
        if self.config.flags.publish {
            if let Some(program) = self.config.file.package.build_command.first() {
                tools.push(program.clone());
            }
            tools.push("twine".to_string());
        }
        tools.dedup();
        tools
    }

    /// Required programs that cannot be found
    pub async fn check_tools(&self) -> ShipflowResult<Vec<String>> {
        let mut missing = Vec::new();
        for tool in self.required_tools() {
            if !self.runner.check_available(&tool).await? {
                missing.push(tool);
            }
        }
        Ok(missing)
    }

    /// Execute the planned stages.
    ///
    /// Stage failures are recorded in the result rather than returned, so
    /// the caller can report every stage; `Err` means the run could not be
    /// attempted at all.
    pub async fn execute(&self, options: &ExecutionOptions) -> ShipflowResult<PipelineResult> {
        let start = Instant::now();
        let mut machine = StateMachine::new();
        let mut result = PipelineResult::new(self.plan(), &self.config);

        if options.dry_run {
            return Ok(result.finish(&machine, start));
        }

        if let Some(tool) = self.check_tools().await?.into_iter().next() {
            return Err(ShipflowError::tool_not_found(&tool));
        }

        // Version
        let manifest = self.config.manifest_path();
        let version = match resolve_from_manifest(&manifest, &self.config.identity) {
            Ok(version) => version,
            Err(e) => {
                result.fail(StageKind::ResolveVersion, e);
                machine.fail()?;
                return Ok(result.finish(&machine, start));
            }
        };
        result.succeed(StageKind::ResolveVersion);
        result.version = Some(version.clone());
        machine.transition(PipelineState::VersionResolved)?;

        let scope = RunScope::new()?;

        // Build: both images and the package are independent of each other
        let (primary, aip_step, package) = tokio::join!(
            self.publish_image(ImageVariant::Primary, &version.image_tag, &scope),
            self.publish_image(ImageVariant::AipStep, &version.image_tag, &scope),
            self.publish_package(&result.plan, &version.library_version, &scope),
        );

        let primary = self.record_image(&mut result, ImageVariant::Primary, primary);
        let aip_step = self.record_image(&mut result, ImageVariant::AipStep, aip_step);

        // the image builds are done reading the project tree
        match package.map(|outcome| outcome.and_then(|o| self.keep_package(o))) {
            Some(Ok(outcome)) => {
                result.succeed(StageKind::PublishPackage);
                result.package = Some(outcome);
            }
            Some(Err(e)) => result.fail(StageKind::PublishPackage, e),
            None => {}
        }

        let images = match (primary, aip_step) {
            (Some(primary), Some(aip_step)) => ImageArtifacts { primary, aip_step },
            _ => {
                machine.fail()?;
                return Ok(result.finish(&machine, start));
            }
        };
        let tags = images.tags();
        result.images = Some(images);
        machine.transition(PipelineState::BuildComplete)?;

        // Tests
        let dispatcher = TestDispatcher::new(self.runner.clone(), self.config.clone(), tags, &scope);
        let targets = dispatcher.selected_targets();

        let mut misconfigured = false;
        for target in &targets {
            if let Err(e) = self.config.kubeconfig(target) {
                result.fail(StageKind::Test(target.name), e);
                misconfigured = true;
            }
        }
        if misconfigured {
            machine.fail()?;
            return Ok(result.finish(&machine, start));
        }

        for target in targets {
            let stage = StageKind::Test(target.name);
            match dispatcher.dispatch(target).await {
                Ok(run) => {
                    match run.ensure_passed() {
                        Ok(()) => result.succeed(stage),
                        Err(e) => result.fail(stage, e),
                    }
                    result.tests.push(run);
                }
                Err(e) => result.fail(stage, e),
            }
        }
        machine.transition(PipelineState::TestsDispatched)?;

        if result.failures.is_empty() {
            machine.transition(PipelineState::Done)?;
        } else {
            machine.fail()?;
        }

        Ok(result.finish(&machine, start))
    }

    async fn publish_image(
        &self,
        variant: ImageVariant,
        image_tag: &str,
        scope: &RunScope,
    ) -> ShipflowResult<ImageArtifact> {
        let publisher = ImagePublisher::new(self.runner.clone(), self.config.clone(), scope)?;
        publisher.build_and_publish(variant, image_tag).await
    }

    async fn publish_package(
        &self,
        plan: &PipelinePlan,
        library_version: &str,
        scope: &RunScope,
    ) -> Option<ShipflowResult<PublishOutcome>> {
        if !plan.contains(StageKind::PublishPackage) {
            tracing::info!("package publishing disabled for this run");
            return None;
        }

        let publish = async {
            let publisher = PackagePublisher::new(self.runner.clone(), self.config.clone(), scope)?;
            publisher.publish(library_version).await
        };
        Some(publish.await)
    }

    fn keep_package(&self, mut outcome: PublishOutcome) -> ShipflowResult<PublishOutcome> {
        outcome.sdist = keep_archive(&outcome.sdist, &self.config.dist_dir())?;
        Ok(outcome)
    }

    fn record_image(
        &self,
        result: &mut PipelineResult,
        variant: ImageVariant,
        outcome: ShipflowResult<ImageArtifact>,
    ) -> Option<ImageArtifact> {
        let stage = StageKind::BuildImage(variant);
        match outcome {
            Ok(artifact) => {
                result.succeed(stage);
                Some(artifact)
            }
            Err(e) => {
                result.fail(stage, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSnapshot, EnvironmentName, IdentityInput, PipelineFile};
    use crate::executors::scripted::ScriptedRunner;
    use crate::executors::{CommandOutput, CommandSpec};
    use crate::registry::PushOutcome;
    use std::path::{Path, PathBuf};

    const YAML: &str = r#"
name: zillow-metaflow
release: { major: 2, minor: 1 }
registry: { host: registry.example.com, repository: ml/metaflow }
dispatch: { workers: 2 }
environments:
  - name: sandbox
    kubeconfig_var: SANDBOX_KUBECONFIG
    namespace: metaflow-sandbox
  - name: prod
    kubeconfig_var: PROD_KUBECONFIG
    namespace: metaflow-prod
"#;

    const VARS: &[(&str, &str)] = &[
        ("REGISTRY_USERNAME", "ci"),
        ("REGISTRY_PASSWORD", "pw"),
        ("PACKAGE_INDEX_USERNAME", "ci"),
        ("PACKAGE_INDEX_PASSWORD", "pw"),
        ("PUBLISH", "1"),
        ("SANDBOX_TESTS", "1"),
        ("SANDBOX_KUBECONFIG", "apiVersion: v1"),
    ];

    fn config(root: &Path, extra: &[(&str, &str)]) -> Arc<PipelineConfig> {
        std::fs::write(root.join("setup.py"), "version = \"2.1.0\"\n").unwrap();
        let file = PipelineFile::from_yaml(YAML).unwrap();
        let input = IdentityInput {
            run_counter: 345,
            branch: "feature/x".into(),
            default_branch: "master".into(),
            ..Default::default()
        };
        let env = EnvSnapshot::from_pairs(VARS.iter().chain(extra.iter()).copied());
        Arc::new(PipelineConfig::new(file, root.to_path_buf(), input, env).unwrap())
    }

    /// Answers like healthy tools; `fail` picks commands to fail with a stderr
    fn runner(fail: fn(&CommandSpec) -> Option<&'static str>) -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(move |spec| {
            if let Some(stderr) = fail(spec) {
                return Ok(CommandOutput::failure(stderr, 1));
            }
            if spec.label == "package:build" {
                let pos = spec.args.iter().position(|a| a == "--dist-dir").unwrap();
                let dist = PathBuf::from(&spec.args[pos + 1]);
                std::fs::create_dir_all(&dist).unwrap();
                std::fs::write(dist.join("pkg-2.1.345.tar.gz"), b"sdist").unwrap();
            }
            Ok(CommandOutput::success(""))
        }))
    }

    #[tokio::test]
    async fn test_full_run_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|_| None);
        let pipeline = ReleasePipeline::new(runner.clone(), config(dir.path(), &[]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert!(result.success());
        assert_eq!(result.state, PipelineState::Done);
        assert_eq!(
            result.history,
            vec![
                PipelineState::Start,
                PipelineState::VersionResolved,
                PipelineState::BuildComplete,
                PipelineState::TestsDispatched,
                PipelineState::Done,
            ]
        );
        assert_eq!(result.version.as_ref().unwrap().library_version, "2.1.345-dev.345+2.1.0");

        let images = result.images.as_ref().unwrap();
        assert_eq!(images.primary.repository_tag, "registry.example.com/ml/metaflow:2.1.345.dev345");
        assert_eq!(images.aip_step.push_outcome, PushOutcome::Success);

        assert_eq!(result.status(StageKind::PublishPackage), Some(&StageStatus::Succeeded));
        let package = result.package.as_ref().unwrap();
        assert_eq!(package.sdist, dir.path().join("dist/pkg-2.1.345.tar.gz"));
        assert!(package.sdist.is_file());
        assert_eq!(
            result.status(StageKind::Test(EnvironmentName::Sandbox)),
            Some(&StageStatus::Succeeded)
        );
        assert_eq!(
            result.status(StageKind::Test(EnvironmentName::Prod)),
            Some(&StageStatus::Skipped)
        );
        assert_eq!(result.tests.len(), 1);

        // tests only start after both images are pushed
        let labels = runner.labels();
        let first_test = labels.iter().position(|l| l.starts_with("test:")).unwrap();
        let last_push = labels.iter().rposition(|l| l.starts_with("push:")).unwrap();
        assert!(last_push < first_test);
    }

    #[tokio::test]
    async fn test_rerun_resolves_the_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ReleasePipeline::new(runner(|_| None), config(dir.path(), &[]));

        let first = pipeline.execute(&ExecutionOptions::default()).await.unwrap();
        let second = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert!(first.success() && second.success());
        assert_eq!(
            first.version.as_ref().unwrap().library_version,
            second.version.as_ref().unwrap().library_version
        );
        assert_eq!(second.version.unwrap().library_version, "2.1.345-dev.345+2.1.0");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("setup.py")).unwrap(),
            "version = \"2.1.0\"\n"
        );
        assert!(dir.path().join("dist/pkg-2.1.345.tar.gz").is_file());
    }

    #[tokio::test]
    async fn test_package_failure_does_not_block_tests() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|spec| (spec.label == "package:upload").then_some("403 Forbidden"));
        let pipeline = ReleasePipeline::new(runner.clone(), config(dir.path(), &[]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert!(!result.success());
        assert_eq!(result.state, PipelineState::Failed);
        assert!(matches!(result.status(StageKind::PublishPackage), Some(StageStatus::Failed(_))));
        assert_eq!(
            result.status(StageKind::Test(EnvironmentName::Sandbox)),
            Some(&StageStatus::Succeeded)
        );
        assert!(matches!(
            result.into_error(),
            Some(ShipflowError::PackagePublishFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_fatal_push_blocks_tests() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|spec| (spec.label == "push:primary").then_some("unauthorized"));
        let pipeline = ReleasePipeline::new(runner.clone(), config(dir.path(), &[]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert_eq!(
            result.status(StageKind::Test(EnvironmentName::Sandbox)),
            Some(&StageStatus::Blocked(StageKind::BuildImage(ImageVariant::Primary)))
        );
        // the sibling stages still ran
        assert_eq!(
            result.status(StageKind::BuildImage(ImageVariant::AipStep)),
            Some(&StageStatus::Succeeded)
        );
        assert_eq!(result.status(StageKind::PublishPackage), Some(&StageStatus::Succeeded));
        assert!(!runner.labels().iter().any(|l| l.starts_with("test:")));
        assert!(!dir.path().join("artifacts/image_tag").exists());
    }

    #[tokio::test]
    async fn test_duplicate_push_is_not_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|spec| spec.label.starts_with("push:").then_some("manifest invalid"));
        let pipeline = ReleasePipeline::new(runner, config(dir.path(), &[]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert!(result.success());
        let images = result.images.as_ref().unwrap();
        assert_eq!(images.primary.push_outcome, PushOutcome::DuplicateIgnored);
        assert_eq!(images.aip_step.push_outcome, PushOutcome::DuplicateIgnored);
    }

    #[tokio::test]
    async fn test_failed_tests_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|spec| (spec.label == "test:sandbox:worker-2").then_some("1 failed"));
        let pipeline = ReleasePipeline::new(runner, config(dir.path(), &[]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert!(!result.tests[0].passed);
        assert!(dir.path().join("reports/sandbox/summary.json").exists());
        assert!(matches!(
            result.into_error(),
            Some(ShipflowError::TestDispatchFailure { failed_workers: 1, workers: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_misconfigured_environment_stops_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|_| None);
        let pipeline = ReleasePipeline::new(runner.clone(), config(dir.path(), &[("PROD_TESTS", "1")]));

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert!(matches!(
            result.status(StageKind::Test(EnvironmentName::Prod)),
            Some(StageStatus::Failed(_))
        ));
        assert!(!runner.labels().iter().any(|l| l.starts_with("test:")));
    }

    #[tokio::test]
    async fn test_malformed_manifest_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|_| None);
        let cfg = config(dir.path(), &[]);
        std::fs::write(dir.path().join("setup.py"), "setup(name='x')\n").unwrap();
        let pipeline = ReleasePipeline::new(runner.clone(), cfg);

        let result = pipeline.execute(&ExecutionOptions::default()).await.unwrap();

        assert_eq!(result.state, PipelineState::Failed);
        assert_eq!(result.history, vec![PipelineState::Start, PipelineState::Failed]);
        assert!(runner.calls().is_empty());
        assert_eq!(
            result.status(StageKind::PublishPackage),
            Some(&StageStatus::Blocked(StageKind::ResolveVersion))
        );
        assert!(matches!(result.into_error(), Some(ShipflowError::MalformedManifest { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|_| None);
        let pipeline = ReleasePipeline::new(runner.clone(), config(dir.path(), &[]));

        let result = pipeline
            .execute(&ExecutionOptions { dry_run: true })
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.state, PipelineState::Start);
        assert_eq!(result.plan.len(), 5);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_required_tools_follow_publish_flag() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(|_| None);

        let publishing = ReleasePipeline::new(runner.clone(), config(dir.path(), &[]));
        assert_eq!(publishing.required_tools(), vec!["docker", "python", "twine"]);

        let images_only = ReleasePipeline::new(runner, config(dir.path(), &[("PUBLISH", "false")]));
        assert_eq!(images_only.required_tools(), vec!["docker"]);
    }
}
