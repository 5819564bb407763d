// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Publish-package command - stamp, build and upload the sdist

use colored::Colorize;
use miette::Result;
use std::sync::Arc;

use super::{fail, load_config, preflight, ConfigArgs, IdentityArgs};
use crate::config::RunScope;
use crate::executors::{CommandRunner, ProcessRunner};
use crate::package::{keep_archive, PackagePublisher};
use crate::utils::{create_spinner, print_info, print_success};
use crate::version::resolve_from_manifest;

/// Run the publish-package command
pub async fn run(config: ConfigArgs, identity: IdentityArgs, verbose: bool) -> Result<()> {
    let config = load_config(&config.config, identity).map_err(|e| fail(e, verbose))?;

    if !config.flags.publish {
        print_info(&format!(
            "Package publishing is disabled; set {} to enable it",
            config.file.flags.publish_var
        ));
        return Ok(());
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let mut tools: Vec<&str> = config.file.package.build_command.iter().take(1).map(String::as_str).collect();
    tools.push("twine");
    preflight(runner.as_ref(), &tools).await.map_err(|e| fail(e, verbose))?;

    let version = resolve_from_manifest(&config.manifest_path(), &config.identity).map_err(|e| fail(e, verbose))?;
    let scope = RunScope::new().map_err(|e| fail(e, verbose))?;
    let publisher = PackagePublisher::new(runner, config.clone(), &scope).map_err(|e| fail(e, verbose))?;

    let spinner = create_spinner(&format!("Publishing {}...", version.library_version));
    let result = publisher.publish(&version.library_version).await;
    spinner.finish_and_clear();

    let outcome = result.map_err(|e| fail(e, verbose))?;
    let kept = keep_archive(&outcome.sdist, &config.dist_dir()).map_err(|e| fail(e, verbose))?;

    print_success(&format!("{} uploaded to {}", outcome.version.bold(), outcome.index));
    println!("    {} {}", kept.display(), format!("blake3:{}", outcome.digest).dimmed());
    Ok(())
}
