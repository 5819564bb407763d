// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Build-images command - build and push both image variants

use colored::Colorize;
use miette::Result;
use std::sync::Arc;

use super::{fail, load_config, preflight, ConfigArgs, IdentityArgs};
use crate::config::RunScope;
use crate::executors::{CommandRunner, ProcessRunner};
use crate::registry::ImagePublisher;
use crate::utils::{create_spinner, print_success};
use crate::version::resolve_from_manifest;

/// Run the build-images command
pub async fn run(config: ConfigArgs, identity: IdentityArgs, verbose: bool) -> Result<()> {
    let config = load_config(&config.config, identity).map_err(|e| fail(e, verbose))?;
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());

    preflight(runner.as_ref(), &["docker"]).await.map_err(|e| fail(e, verbose))?;

    let version = resolve_from_manifest(&config.manifest_path(), &config.identity).map_err(|e| fail(e, verbose))?;
    let scope = RunScope::new().map_err(|e| fail(e, verbose))?;
    let publisher = ImagePublisher::new(runner, config.clone(), &scope).map_err(|e| fail(e, verbose))?;

    let spinner = create_spinner(&format!("Building and pushing images for {}...", version.image_tag));
    let result = publisher.publish_all(&version.image_tag).await;
    spinner.finish_and_clear();

    let artifacts = result.map_err(|e| fail(e, verbose))?;

    for artifact in [&artifacts.primary, &artifacts.aip_step] {
        print_success(&format!(
            "{} {}",
            artifact.repository_tag.bold(),
            format!("({})", artifact.push_outcome).dimmed()
        ));
    }

    println!();
    println!("Image tags written to {}", config.artifacts_dir().display());
    Ok(())
}
