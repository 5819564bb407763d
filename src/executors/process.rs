// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Process executor
//!
//! Runs commands as child processes of shipflow.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ShipflowError;

/// Executor backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Create a new process runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ShipflowError> {
        let program = which::which(&spec.program).map_err(|_| ShipflowError::tool_not_found(&spec.program))?;

        tracing::debug!(command = %spec.label, line = %spec.display(), "running");
        let start = Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // a timed-out or abandoned command must not outlive the run
            .kill_on_drop(true);

        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ShipflowError::CommandFailed {
            label: spec.label.clone(),
            error: e.to_string(),
            help: None,
        })?;

        if let Some(ref secret) = spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(secret.expose().as_bytes())
                    .await
                    .map_err(|e| ShipflowError::CommandFailed {
                        label: spec.label.clone(),
                        error: format!("failed to write stdin: {}", e),
                        help: None,
                    })?;
                // closing stdin signals end of input
                drop(stdin);
            }
        }

        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ShipflowError::CommandTimedOut {
                    label: spec.label.clone(),
                    seconds: limit.as_secs(),
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ShipflowError::CommandFailed {
            label: spec.label.clone(),
            error: e.to_string(),
            help: None,
        })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };

        tracing::debug!(
            command = %spec.label,
            exit_code = result.exit_code,
            elapsed_ms = result.duration.as_millis() as u64,
            "finished"
        );

        Ok(result)
    }

    async fn check_available(&self, program: &str) -> Result<bool, ShipflowError> {
        Ok(which::which(program).is_ok())
    }
}
