// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Integration test dispatch
//!
//! For every enabled environment, the primary image is started once per
//! worker with the AIP-step tag, cluster credentials and UI prefixes passed
//! in. The suite splits itself across the workers. An environment passes
//! only when every worker exits 0.

mod report;

pub use report::{collect_report_files, ReportSummary, WorkerSummary, SUMMARY_FILE};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EnvironmentName, EnvironmentTarget, PipelineConfig, RunScope, TimeoutConfig};
use crate::errors::{ShipflowError, ShipflowResult};
use crate::executors::{CommandOutput, CommandRunner, CommandSpec};
use crate::registry::ImageTags;

/// Outcome of one test worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    /// 1-based worker index
    pub worker: usize,
    /// Exit code, `-1` when the worker could not run or was stopped
    pub exit_code: i32,
    pub duration: Duration,
    pub log_file: PathBuf,
    /// Why the worker did not run to completion
    pub error: Option<String>,
}

impl WorkerOutcome {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of the test session against one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunResult {
    pub environment: EnvironmentName,
    pub workers: Vec<WorkerOutcome>,
    pub report_dir: PathBuf,
    pub passed: bool,
}

impl TestRunResult {
    pub fn failed_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.passed()).count()
    }

    /// Turn a failed session into a [`ShipflowError::TestDispatchFailure`]
    pub fn ensure_passed(&self) -> ShipflowResult<()> {
        if self.passed {
            return Ok(());
        }
        Err(ShipflowError::TestDispatchFailure {
            environment: self.environment.to_string(),
            failed_workers: self.failed_workers(),
            workers: self.workers.len(),
            report_dir: self.report_dir.clone(),
        })
    }
}

/// Runs the integration suite against the enabled environments
pub struct TestDispatcher<'s> {
    runner: Arc<dyn CommandRunner>,
    config: Arc<PipelineConfig>,
    images: ImageTags,
    scope: &'s RunScope,
}

impl<'s> TestDispatcher<'s> {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<PipelineConfig>,
        images: ImageTags,
        scope: &'s RunScope,
    ) -> Self {
        Self {
            runner,
            config,
            images,
            scope,
        }
    }

    /// Exactly the environments switched on for this run
    pub fn selected_targets(&self) -> Vec<&EnvironmentTarget> {
        self.config.enabled_environments()
    }

    /// Dispatch to every selected environment.
    ///
    /// Credentials of all selected environments are checked before the
    /// first worker starts. Failed sessions are returned, not raised, so the
    /// caller sees every environment's result; use
    /// [`TestRunResult::ensure_passed`] to gate on them.
    pub async fn dispatch_all(&self) -> ShipflowResult<Vec<TestRunResult>> {
        let targets = self.selected_targets();
        if targets.is_empty() {
            tracing::info!("no test environment enabled, skipping dispatch");
            return Ok(Vec::new());
        }

        for target in &targets {
            self.config.kubeconfig(target)?;
        }

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            results.push(self.dispatch(target).await?);
        }
        Ok(results)
    }

    /// Run the worker fan-out against one environment and preserve its reports
    pub async fn dispatch(&self, target: &EnvironmentTarget) -> ShipflowResult<TestRunResult> {
        let workers = self.config.file.dispatch.workers;
        if workers == 0 {
            return Err(ShipflowError::InvalidConfig {
                reason: "dispatch.workers must be at least 1".into(),
                help: None,
            });
        }

        let kubeconfig = self.config.kubeconfig(target)?;
        let report_dir = self.config.reports_dir().join(target.name.as_str());
        report::reset_report_dir(&report_dir)?;

        // kept alive until every worker has finished
        let kubeconfig_file = self.scope.write_kubeconfig(target.name.as_str(), &kubeconfig)?;

        tracing::info!(
            environment = %target.name,
            namespace = %target.namespace,
            workers,
            image = %self.images.primary,
            "dispatching integration tests"
        );

        let runs = (1..=workers).map(|worker| {
            let spec = self.worker_command(target, worker, workers, kubeconfig_file.path(), &report_dir);
            async move { (worker, self.runner.run(&spec).await) }
        });
        let finished = join_all(runs).await;

        let mut outcomes = Vec::with_capacity(finished.len());
        for (worker, result) in finished {
            outcomes.push(self.record_worker(target.name, worker, result, &report_dir)?);
        }

        let passed = outcomes.iter().all(WorkerOutcome::passed);
        let result = TestRunResult {
            environment: target.name,
            workers: outcomes,
            report_dir: report_dir.clone(),
            passed,
        };

        self.write_summary(target, &result)?;

        if passed {
            tracing::info!(environment = %target.name, "integration tests passed");
        } else {
            tracing::error!(
                environment = %target.name,
                failed = result.failed_workers(),
                reports = %report_dir.display(),
                "integration tests failed"
            );
        }

        Ok(result)
    }

    fn worker_command(
        &self,
        target: &EnvironmentTarget,
        worker: usize,
        workers: usize,
        kubeconfig: &Path,
        report_dir: &Path,
    ) -> CommandSpec {
        let dispatch = &self.config.file.dispatch;
        let report_file = format!("{}/junit-{}.xml", dispatch.container_reports.trim_end_matches('/'), worker);

        let test_command = dispatch.test_command.iter().map(|part| {
            part.replace("{workers}", &workers.to_string())
                .replace("{worker}", &worker.to_string())
                .replace("{report_file}", &report_file)
        });

        let env_pairs = [
            (dispatch.aip_step_image_var.as_str(), self.images.aip_step.as_str()),
            (self.config.file.image.build_arg.as_str(), self.images.primary.as_str()),
            ("KUBECONFIG", dispatch.container_kubeconfig.as_str()),
            ("KUBERNETES_NAMESPACE", target.namespace.as_str()),
            ("ARGO_RUN_URL_PREFIX", target.run_url_prefixes.argo.as_str()),
            ("METAFLOW_RUN_URL_PREFIX", target.run_url_prefixes.metaflow.as_str()),
        ];

        let mut spec = CommandSpec::new(format!("test:{}:worker-{}", target.name, worker), "docker")
            .args(["run", "--rm"])
            .arg("-v")
            .arg(format!("{}:{}:ro", kubeconfig.display(), dispatch.container_kubeconfig))
            .arg("-v")
            .arg(format!("{}:{}", report_dir.display(), dispatch.container_reports));

        for (name, value) in env_pairs {
            spec = spec.arg("-e").arg(format!("{}={}", name, value));
        }

        spec.arg(self.images.primary.as_str())
            .args(test_command)
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.test_secs))
    }

    fn record_worker(
        &self,
        environment: EnvironmentName,
        worker: usize,
        result: ShipflowResult<CommandOutput>,
        report_dir: &Path,
    ) -> ShipflowResult<WorkerOutcome> {
        let (exit_code, duration, error, log_file) = match result {
            Ok(output) => {
                let log = report::write_worker_log(report_dir, worker, &output.stdout, &output.stderr)?;
                (output.exit_code, output.duration, None, log)
            }
            Err(e) => {
                // a worker that could not run or was stopped still fails closed
                let message = e.to_string();
                let log = report::write_worker_log(report_dir, worker, "", &message)?;
                (-1, Duration::ZERO, Some(message), log)
            }
        };

        if exit_code != 0 {
            tracing::warn!(environment = %environment, worker, exit_code, "worker failed");
        }

        Ok(WorkerOutcome {
            worker,
            exit_code,
            duration,
            log_file,
            error,
        })
    }

    fn write_summary(&self, target: &EnvironmentTarget, result: &TestRunResult) -> ShipflowResult<PathBuf> {
        let summary = ReportSummary {
            environment: target.name,
            namespace: target.namespace.clone(),
            primary_image: self.images.primary.clone(),
            aip_step_image: self.images.aip_step.clone(),
            passed: result.passed,
            workers: result
                .workers
                .iter()
                .map(|w| WorkerSummary {
                    worker: w.worker,
                    exit_code: w.exit_code,
                    error: w.error.clone(),
                })
                .collect(),
            report_files: collect_report_files(&result.report_dir)?,
            argo_url: target.argo_namespace_url(),
        };

        summary.write(&result.report_dir)
    }
}
