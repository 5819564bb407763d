// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run state machine

use serde::{Deserialize, Serialize};

use crate::errors::{ShipflowError, ShipflowResult};

/// Where a release run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    VersionResolved,
    /// Both images are in the registry; the package stage has finished
    BuildComplete,
    TestsDispatched,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Forward edges; `Failed` is reachable from every non-terminal state
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Start, VersionResolved)
            | (VersionResolved, BuildComplete)
            | (BuildComplete, TestsDispatched)
            | (TestsDispatched, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::VersionResolved => "version-resolved",
            Self::BuildComplete => "build-complete",
            Self::TestsDispatched => "tests-dispatched",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Tracks the state of one run and the path it took
#[derive(Debug, Clone)]
pub struct StateMachine {
    history: Vec<PipelineState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            history: vec![PipelineState::Start],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Start)
    }

    /// Every state visited, starting with [`PipelineState::Start`]
    pub fn history(&self) -> &[PipelineState] {
        &self.history
    }

    pub fn transition(&mut self, next: PipelineState) -> ShipflowResult<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(ShipflowError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        tracing::debug!(from = %current, to = %next, "pipeline state");
        self.history.push(next);
        Ok(())
    }

    pub fn fail(&mut self) -> ShipflowResult<()> {
        self.transition(PipelineState::Failed)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
