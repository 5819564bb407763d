// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! # shipflow - Release Orchestrator
//!
//! `shipflow` releases a forked library as a versioned source distribution
//! and a pair of container images, then runs its integration tests against
//! the environments switched on for the run.
//!
//! ## Features
//!
//! - **Deterministic versioning** - one library version and one image tag per run
//! - **Idempotent publishing** - re-pushing an existing tag is not an error
//! - **Gated test dispatch** - exactly the enabled environments are tested
//! - **Fail closed** - every external command is bounded by a timeout
//!
//! ## Quick Start
//!
//! ```bash
//! # Print the version of this run for a CI dotenv report
//! shipflow version --format env
//!
//! # Show the stages this run would execute
//! shipflow run --dry-run
//!
//! # Execute the whole release
//! shipflow run
//!
//! # Or one stage per CI job
//! shipflow build-images
//! shipflow publish-package
//! shipflow dispatch-tests
//! ```

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod executors;
pub mod package;
pub mod pipeline;
pub mod registry;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::{PipelineConfig, PipelineFile};
pub use errors::{ShipflowError, ShipflowResult};
pub use pipeline::{PipelineResult, ReleasePipeline};
pub use version::ResolvedVersion;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
