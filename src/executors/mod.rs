// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Command executors
//!
//! Every external system (docker daemon, registry, package index, clusters)
//! is reached through a command. Stages describe commands as
//! [`CommandSpec`] values and hand them to a [`CommandRunner`], so the
//! decision logic can be exercised without any of those systems.

mod process;
#[cfg(test)]
pub(crate) mod scripted;

pub use process::ProcessRunner;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Secret;
use crate::errors::ShipflowError;

/// Description of one external command
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Short name used in logs and errors
    pub label: String,
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Data written to stdin, e.g. a password
    pub stdin: Option<Secret>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// Upper bound on the run time
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a command with no arguments
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: None,
            working_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn stdin(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as it would be typed (stdin is never shown)
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code, `-1` when the process was killed by a signal
    pub exit_code: i32,

    /// Execution duration
    pub duration: Duration,
}

impl CommandOutput {
    /// Create a successful output
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Create a failed output
    pub fn failure(stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for anything that can run external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`];
    /// `Err` is reserved for commands that could not run or finish at all
    /// (missing program, spawn failure, timeout).
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ShipflowError>;

    /// Check that a program can be found
    async fn check_available(&self, program: &str) -> Result<bool, ShipflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let spec = CommandSpec::new("login", "docker")
            .args(["login", "registry.example.com"])
            .arg("--password-stdin")
            .stdin(Secret::new("hunter2"))
            .env("DOCKER_CONFIG", "/tmp/x");

        assert_eq!(spec.display(), "docker login registry.example.com --password-stdin");
        assert!(!format!("{:?}", spec).contains("hunter2"));
        assert_eq!(spec.env.get("DOCKER_CONFIG").unwrap(), "/tmp/x");
    }

    #[test]
    fn test_output_helpers() {
        assert!(CommandOutput::success("ok").succeeded());
        assert!(!CommandOutput::failure("bad", 2).succeeded());
    }
}
