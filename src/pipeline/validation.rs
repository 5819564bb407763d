// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Config validation
//!
//! Static checks on `.shipflow.yaml` that do not need credentials or a
//! run identity.

use std::collections::HashSet;
use std::path::Path;

use crate::config::PipelineFile;
use crate::registry::PushClassifier;
use crate::version::read_upstream_version;

/// Config validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the parsed config
    pub fn validate(file: &PipelineFile) -> ValidationResult {
        let mut result = ValidationResult::new();

        if file.name.trim().is_empty() {
            result.add_error("Pipeline name is empty");
        }

        Self::validate_registry(file, &mut result);
        Self::validate_image(file, &mut result);
        Self::validate_package(file, &mut result);
        Self::validate_environments(file, &mut result);

        result
    }

    fn validate_registry(file: &PipelineFile, result: &mut ValidationResult) {
        let registry = &file.registry;

        if registry.host.trim_matches('/').is_empty() {
            result.add_error("registry.host is empty");
        }
        if registry.repository.trim_matches('/').is_empty() {
            result.add_error("registry.repository is empty");
        }

        if registry.benign_push_errors.is_empty() {
            result.add_warning(
                "registry.benign_push_errors is empty: re-running a pipeline will fail on already pushed tags",
            );
        } else if let Err(e) = PushClassifier::new(&registry.benign_push_errors) {
            result.add_error(&format!("registry.benign_push_errors: {}", e));
        }
    }

    fn validate_image(file: &PipelineFile, result: &mut ValidationResult) {
        let suffix = &file.image.aip_step_suffix;

        if suffix.is_empty() {
            result.add_error("image.aip_step_suffix is empty: both image variants would share one tag");
        } else if !is_tag_fragment(suffix) {
            result.add_error(&format!(
                "image.aip_step_suffix '{}' contains characters not allowed in an image tag",
                suffix
            ));
        }

        if file.image.build_arg.trim().is_empty() {
            result.add_error("image.build_arg is empty");
        }
    }

    fn validate_package(file: &PipelineFile, result: &mut ValidationResult) {
        if file.package.build_command.is_empty() {
            result.add_error("package.build_command is empty");
        }
        if file.package.index_url.trim().is_empty() {
            result.add_error("package.index_url is empty");
        }
    }

    fn validate_environments(file: &PipelineFile, result: &mut ValidationResult) {
        if file.dispatch.workers == 0 {
            result.add_error("dispatch.workers must be at least 1");
        }

        let mut seen = HashSet::new();
        for target in &file.environments {
            if !seen.insert(target.name) {
                result.add_error(&format!("Duplicate environment: '{}'", target.name));
            }
            if target.namespace.trim().is_empty() {
                result.add_error(&format!("Environment '{}': namespace is empty", target.name));
            }
            if target.kubeconfig_var.trim().is_empty() {
                result.add_error(&format!("Environment '{}': kubeconfig_var is empty", target.name));
            }
            if target.run_url_prefixes.argo.is_empty() {
                result.add_warning(&format!(
                    "Environment '{}': no argo URL prefix, reports will not link to workflows",
                    target.name
                ));
            }
        }

        let enabled: Vec<String> = file
            .environments
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.name.to_string())
            .collect();
        if enabled.len() > 1 {
            result.add_warning(&format!(
                "Several environments are enabled by default ({}); usually at most one is",
                enabled.join(", ")
            ));
        }
    }

    /// Check that the files the stages read exist (runtime validation)
    pub fn validate_files(file: &PipelineFile, base_path: &Path) -> Vec<String> {
        let mut missing = Vec::new();

        let manifest = base_path.join(&file.manifest);
        if !manifest.exists() {
            missing.push(format!("Manifest not found: {}", file.manifest.display()));
        } else if read_upstream_version(&manifest).is_err() {
            missing.push(format!(
                "Manifest {} has no version literal",
                file.manifest.display()
            ));
        }

        let dockerfile = base_path.join(&file.image.dockerfile);
        if !dockerfile.exists() {
            missing.push(format!("Dockerfile not found: {}", file.image.dockerfile.display()));
        }

        missing
    }
}

/// Image tags allow `[A-Za-z0-9_.-]`
fn is_tag_fragment(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Result of config validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
