// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! In-memory runner for tests

use async_trait::async_trait;
use std::sync::Mutex;

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::errors::ShipflowError;

type Script = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, ShipflowError> + Send + Sync>;

/// Records every command and answers from a script
pub struct ScriptedRunner {
    script: Script,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<CommandOutput, ShipflowError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command succeeds with empty output
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(CommandOutput::success("")))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Labels of the recorded commands, in call order
    pub fn labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.label).collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ShipflowError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.script)(spec)
    }

    async fn check_available(&self, _program: &str) -> Result<bool, ShipflowError> {
        Ok(true)
    }
}
