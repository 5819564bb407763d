// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for shipflow.

pub mod build;
pub mod dispatch;
pub mod graph;
pub mod publish;
pub mod run;
pub mod validate;
pub mod version;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{EnvSnapshot, IdentityInput, PipelineConfig, DEFAULT_CONFIG_FILE};
use crate::errors::{RecoverySuggestion, ShipflowError, ShipflowResult};
use crate::executors::CommandRunner;

/// Release orchestrator
///
/// Resolve one version per run, publish images and the package
/// idempotently, and dispatch integration tests to gated environments.
#[derive(Parser, Debug)]
#[clap(
    name = "shipflow",
    version,
    about = "Release orchestrator: versioning, idempotent publishing and gated test dispatch",
    long_about = None,
    after_help = "Examples:\n\
        shipflow version --format env     Print the resolved version for CI\n\
        shipflow run --dry-run            Show the stages this run would execute\n\
        shipflow run                      Execute the whole release\n\
        shipflow dispatch-tests           Run tests against enabled environments\n\n\
        See 'shipflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the whole release pipeline
    Run {
        #[clap(flatten)]
        config: ConfigArgs,

        #[clap(flatten)]
        identity: IdentityArgs,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,
    },

    /// Resolve and print the version of this run
    Version {
        #[clap(flatten)]
        config: ConfigArgs,

        #[clap(flatten)]
        identity: IdentityArgs,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = VersionFormat::Text)]
        format: VersionFormat,
    },

    /// Build and push both image variants
    BuildImages {
        #[clap(flatten)]
        config: ConfigArgs,

        #[clap(flatten)]
        identity: IdentityArgs,
    },

    /// Stamp, build and upload the source distribution
    PublishPackage {
        #[clap(flatten)]
        config: ConfigArgs,

        #[clap(flatten)]
        identity: IdentityArgs,
    },

    /// Run integration tests against the enabled environments
    DispatchTests {
        #[clap(flatten)]
        config: ConfigArgs,

        #[clap(flatten)]
        identity: IdentityArgs,
    },

    /// Validate the pipeline configuration
    Validate {
        #[clap(flatten)]
        config: ConfigArgs,
    },

    /// Show the stage plan as a graph
    Graph {
        #[clap(flatten)]
        config: ConfigArgs,

        /// Output format
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
}

/// Location of the pipeline config
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Pipeline config file
    #[clap(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

/// Run identity, normally supplied by the CI job
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Monotonic counter unique to this pipeline run
    #[clap(long, env = "CI_PIPELINE_IID")]
    pub run_counter: u64,

    /// Branch being built
    #[clap(long, env = "CI_COMMIT_REF_NAME")]
    pub branch: String,

    /// Branch that produces release versions
    #[clap(long, env = "CI_DEFAULT_BRANCH", default_value = "master")]
    pub default_branch: String,

    /// Overrides release.major from the config
    #[clap(long, env = "SHIPFLOW_MAJOR")]
    pub major: Option<u64>,

    /// Overrides release.minor from the config
    #[clap(long, env = "SHIPFLOW_MINOR")]
    pub minor: Option<u64>,
}

impl From<IdentityArgs> for IdentityInput {
    fn from(args: IdentityArgs) -> Self {
        Self {
            major: args.major,
            minor: args.minor,
            run_counter: args.run_counter,
            branch: args.branch,
            default_branch: args.default_branch,
        }
    }
}

/// Output format for the version command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VersionFormat {
    Text,
    Json,
    /// `NAME=value` lines for a CI dotenv report
    Env,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load the config and combine it with the run identity and job variables
pub(crate) fn load_config(config: &Path, identity: IdentityArgs) -> ShipflowResult<Arc<PipelineConfig>> {
    PipelineConfig::load(config, identity.into(), EnvSnapshot::capture()).map(Arc::new)
}

/// Fail early when a program the command needs is missing
pub(crate) async fn preflight(runner: &dyn CommandRunner, tools: &[&str]) -> ShipflowResult<()> {
    for tool in tools {
        if !runner.check_available(tool).await? {
            return Err(ShipflowError::tool_not_found(tool));
        }
    }
    Ok(())
}

/// Print recovery steps for an error and hand it to miette for rendering
pub(crate) fn fail(error: ShipflowError, verbose: bool) -> miette::Report {
    if verbose {
        if let Some(stderr) = error.stderr().filter(|s| !s.trim().is_empty()) {
            eprintln!("{}", stderr.trim_end().dimmed());
            eprintln!();
        }
    }

    if let Some(suggestion) = RecoverySuggestion::for_error(&error) {
        eprintln!("{}", suggestion);
    }

    error.into()
}
