// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run command - execute the whole release

use colored::Colorize;
use miette::Result;
use std::sync::Arc;

use super::{fail, load_config, ConfigArgs, IdentityArgs};
use crate::executors::ProcessRunner;
use crate::pipeline::{
    ConfigValidator, ExecutionOptions, PipelinePlan, PipelineResult, ReleasePipeline, StageStatus,
};
use crate::utils::{create_spinner, print_header};
use crate::version::resolve_from_manifest;

/// Run the pipeline
pub async fn run(config: ConfigArgs, identity: IdentityArgs, dry_run: bool, verbose: bool) -> Result<()> {
    let config = load_config(&config.config, identity).map_err(|e| fail(e, verbose))?;

    // Validate config
    let validation = ConfigValidator::validate(&config.file);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let pipeline = ReleasePipeline::new(Arc::new(ProcessRunner::new()), config.clone());
    let plan = pipeline.plan();

    print_plan(&config.file.name, &plan)?;

    if dry_run {
        match resolve_from_manifest(&config.manifest_path(), &config.identity) {
            Ok(version) => {
                println!("  Library version: {}", version.library_version.bold());
                println!("  Image tag:       {}", version.image_tag.bold());
            }
            Err(e) => println!("  {} {}", "⚠".yellow(), e),
        }
        println!();
        println!("{}", "Dry run, nothing was executed.".dimmed());
        return Ok(());
    }

    let spinner = create_spinner("Running release pipeline...");
    let result = pipeline.execute(&ExecutionOptions { dry_run }).await;
    spinner.finish_and_clear();

    let result = result.map_err(|e| fail(e, verbose))?;
    print_result(&result);

    if result.success() {
        return Ok(());
    }

    match result.into_error() {
        Some(error) => Err(fail(error, verbose)),
        None => Err(miette::miette!("Pipeline execution failed")),
    }
}

fn print_plan(name: &str, plan: &PipelinePlan) -> Result<()> {
    println!();
    print_header(&format!("Pipeline: {}", name));

    let stages = plan.topological_order()?;
    println!(
        "Execution plan ({} stage{}):",
        stages.len(),
        if stages.len() == 1 { "" } else { "s" }
    );
    println!();

    for (i, stage) in stages.iter().enumerate() {
        print!("  {}. {}", i + 1, stage.to_string().bold());

        let deps: Vec<String> = plan.dependencies(*stage).iter().map(ToString::to_string).collect();
        if !deps.is_empty() {
            print!(" {}", format!("[depends: {}]", deps.join(", ")).dimmed());
        }

        println!();
    }

    println!();
    Ok(())
}

fn print_result(result: &PipelineResult) {
    if let Some(ref version) = result.version {
        println!("{} {} ({})", "Version:".bold(), version.library_version, version.image_tag);
        println!();
    }

    for (stage, status) in &result.stages {
        let name = stage.to_string();
        match status {
            StageStatus::Succeeded => println!("  {} {}", "✓".green(), name.bold()),
            StageStatus::Failed(error) => {
                println!("  {} {} - {}", "✗".red(), name.bold(), error.dimmed())
            }
            StageStatus::Blocked(by) => println!(
                "  {} {} {}",
                "⊘".yellow(),
                name,
                format!("(blocked by {})", by).dimmed()
            ),
            StageStatus::Skipped => println!("  {} {}", "○".dimmed(), format!("{} (skipped)", name).dimmed()),
        }
    }

    if let Some(ref images) = result.images {
        println!();
        println!("{}:", "Images".bold());
        for artifact in [&images.primary, &images.aip_step] {
            println!("  - {} ({})", artifact.repository_tag, artifact.push_outcome);
        }
    }

    if let Some(ref package) = result.package {
        println!();
        println!("{}:", "Package".bold());
        println!("  - {} blake3:{}", package.sdist.display(), package.digest);
    }

    if !result.tests.is_empty() {
        println!();
        println!("{}:", "Test reports".bold());
        for run in &result.tests {
            println!("  - {}: {}", run.environment, run.report_dir.display());
        }
    }

    println!();
    let path: Vec<String> = result.history.iter().map(ToString::to_string).collect();
    println!("{} {}", "State:".bold(), path.join(" → ").dimmed());

    let secs = result.duration.as_secs_f64();
    if result.success() {
        println!("{}", format!("Pipeline completed successfully in {:.2}s", secs).green());
    } else {
        println!("{}", format!("Pipeline failed after {:.2}s", secs).red());
    }
}
