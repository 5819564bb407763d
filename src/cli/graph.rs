// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Graph command - visualize the stage plan

use miette::Result;

use super::{ConfigArgs, GraphFormat};
use crate::config::{EnvSnapshot, FeatureFlags, PipelineFile};
use crate::pipeline::PipelinePlan;

/// Run the graph command
pub async fn run(config: ConfigArgs, format: GraphFormat, _verbose: bool) -> Result<()> {
    let file = PipelineFile::from_file(&config.config)?;

    // only the flags decide the stages, no run identity needed
    let flags = FeatureFlags::resolve(&file, &EnvSnapshot::capture());
    let environments: Vec<_> = file
        .environments
        .iter()
        .filter(|t| flags.is_enabled(t.name))
        .map(|t| t.name)
        .collect();
    let plan = PipelinePlan::build(flags.publish, &environments);

    let output = match format {
        GraphFormat::Text => plan.to_text()?,
        GraphFormat::Dot => plan.to_dot(),
        GraphFormat::Mermaid => plan.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
