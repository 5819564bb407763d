// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Validate command - check the pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::ConfigArgs;
use crate::config::PipelineFile;
use crate::pipeline::ConfigValidator;

/// Run the validate command
pub async fn run(config: ConfigArgs, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let path = config.config;
    let file = match PipelineFile::from_file(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("  {} Failed to load {}", "✗".red(), path.display());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Pipeline file is valid YAML", "✓".green());

    let validation = ConfigValidator::validate(&file);

    let root = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let missing_files = ConfigValidator::validate_files(&file, root);

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing_files.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing files".yellow().bold());
        for missing in &missing_files {
            println!("  {} {}", "⚠".yellow(), missing);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", file.name);
        println!("  Image: {}", file.registry.image_name());
        println!("  Package index: {}", file.package.index_url);
        println!("  Workers: {}", file.dispatch.workers);
        println!("  Environments: {}", file.environments.len());
        for target in &file.environments {
            let default = if target.enabled { " (enabled by default)" } else { "" };
            println!(
                "    - {} {}{}",
                target.name,
                format!("[{}]", target.namespace).dimmed(),
                default
            );
        }
    }

    println!();

    if has_issues {
        Err(miette::miette!("Pipeline validation failed"))
    } else if validation.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
        Ok(())
    }
}
