// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Release pipeline
//!
//! The stage plan, the run state machine, the executor that drives the
//! stages, and static config validation.

mod executor;
mod plan;
mod state;
mod validation;

pub use executor::{ExecutionOptions, PipelineResult, ReleasePipeline, StageStatus};
pub use plan::{PipelinePlan, StageKind};
pub use state::{PipelineState, StateMachine};
pub use validation::{ConfigValidator, ValidationResult};
