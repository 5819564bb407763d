// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Dispatch-tests command - run integration tests on enabled environments

use colored::Colorize;
use miette::Result;
use std::sync::Arc;

use super::{fail, load_config, preflight, ConfigArgs, IdentityArgs};
use crate::config::RunScope;
use crate::dispatch::TestDispatcher;
use crate::executors::{CommandRunner, ProcessRunner};
use crate::registry::ImageTags;
use crate::utils::{create_spinner, print_error, print_info, print_success};

/// Run the dispatch-tests command
pub async fn run(config: ConfigArgs, identity: IdentityArgs, verbose: bool) -> Result<()> {
    let config = load_config(&config.config, identity).map_err(|e| fail(e, verbose))?;

    if config.enabled_environments().is_empty() {
        print_info("No test environment enabled, nothing to dispatch");
        return Ok(());
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    preflight(runner.as_ref(), &["docker"]).await.map_err(|e| fail(e, verbose))?;

    let images = ImageTags::read_from(&config.artifacts_dir()).map_err(|e| fail(e, verbose))?;
    let scope = RunScope::new().map_err(|e| fail(e, verbose))?;
    let dispatcher = TestDispatcher::new(runner, config.clone(), images, &scope);

    let names: Vec<String> = dispatcher.selected_targets().iter().map(|t| t.name.to_string()).collect();
    let spinner = create_spinner(&format!("Running integration tests on {}...", names.join(", ")));
    let result = dispatcher.dispatch_all().await;
    spinner.finish_and_clear();

    let results = result.map_err(|e| fail(e, verbose))?;

    for run in &results {
        let line = format!(
            "{} ({} of {} workers passed) {}",
            run.environment.to_string().bold(),
            run.workers.len() - run.failed_workers(),
            run.workers.len(),
            format!("reports: {}", run.report_dir.display()).dimmed()
        );
        if run.passed {
            print_success(&line);
        } else {
            print_error(&line);
        }
    }

    for run in &results {
        run.ensure_passed().map_err(|e| fail(e, verbose))?;
    }
    Ok(())
}
