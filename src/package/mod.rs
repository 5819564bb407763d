// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Package publishing
//!
//! Stamps the resolved library version into a copy of the project, builds a
//! source distribution from that copy and uploads it with credentials that
//! only exist for the duration of the upload. The project tree itself is
//! never modified: image builds read it concurrently, and a re-run must find
//! the upstream version where it was.

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{Credentials, PipelineConfig, RunScope, TimeoutConfig};
use crate::errors::{ShipflowError, ShipflowResult};
use crate::executors::{CommandRunner, CommandSpec};
use crate::version::write_version;

/// Repository section name used inside the generated index config
const INDEX_SECTION: &str = "shipflow";

/// Scope directory holding the stamped copy and its build output
const STAGING_DIR: &str = "package";

/// A published source distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// Library version stamped into the manifest
    pub version: String,
    /// Uploaded archive
    pub sdist: PathBuf,
    /// BLAKE3 digest of the archive
    pub digest: String,
    /// Upload endpoint
    pub index: String,
}

/// Builds and uploads the library's source distribution
pub struct PackagePublisher<'s> {
    runner: Arc<dyn CommandRunner>,
    config: Arc<PipelineConfig>,
    credentials: Credentials,
    scope: &'s RunScope,
}

impl<'s> PackagePublisher<'s> {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<PipelineConfig>,
        scope: &'s RunScope,
    ) -> ShipflowResult<Self> {
        let credentials = config.package_credentials()?;
        Ok(Self {
            runner,
            config,
            credentials,
            scope,
        })
    }

    /// Publish the library under `library_version`.
    ///
    /// The returned archive lives in the run scope; hand it to
    /// [`keep_archive`] once nothing else reads the project tree.
    pub async fn publish(&self, library_version: &str) -> ShipflowResult<PublishOutcome> {
        let staging = self.scope.fresh_dir(STAGING_DIR)?;
        let source = staging.join("src");
        let out = staging.join("dist");

        let root = canonical(&self.config.root)?;
        stage_tree(&root, &source, &self.excluded(&root))?;

        let manifest = source.join(self.manifest_relative(&root)?);
        write_version(&manifest, library_version)?;
        tracing::info!(version = %library_version, manifest = %manifest.display(), "stamped staged manifest");

        let sdist = self.build_sdist(&source, &out).await?;
        let digest = digest_file(&sdist)?;
        tracing::info!(sdist = %sdist.display(), digest = %digest, "built source distribution");

        self.upload(&sdist, library_version).await?;

        Ok(PublishOutcome {
            version: library_version.to_string(),
            sdist,
            digest,
            index: self.config.file.package.index_url.clone(),
        })
    }

    /// Generated output and VCS data stay out of the staged copy
    fn excluded(&self, root: &Path) -> Vec<PathBuf> {
        let file = &self.config.file;
        [
            Path::new(".git"),
            file.package.dist_dir.as_path(),
            file.artifacts_dir.as_path(),
            file.dispatch.reports_dir.as_path(),
        ]
        .into_iter()
        .filter_map(|path| relative_to(root, path))
        .filter(|path| !path.as_os_str().is_empty())
        .collect()
    }

    fn manifest_relative(&self, root: &Path) -> ShipflowResult<PathBuf> {
        let manifest = &self.config.file.manifest;
        relative_to(root, manifest).ok_or_else(|| ShipflowError::InvalidConfig {
            reason: format!("manifest {} is outside the project directory", manifest.display()),
            help: Some("Use a manifest path relative to the config file".into()),
        })
    }

    async fn build_sdist(&self, source: &Path, out: &Path) -> ShipflowResult<PathBuf> {
        let build = &self.config.file.package.build_command;
        let (program, args) = build.split_first().ok_or_else(|| ShipflowError::InvalidConfig {
            reason: "package.build_command is empty".into(),
            help: None,
        })?;

        let spec = CommandSpec::new("package:build", program.as_str())
            .args(args.iter().map(String::as_str))
            .args(["--dist-dir".to_string(), out.to_string_lossy().to_string()])
            .working_dir(source)
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.package_secs));

        let output = self.runner.run(&spec).await?;
        if !output.succeeded() {
            return Err(ShipflowError::PackageBuildFailed { stderr: output.stderr });
        }

        let mut archives = find_archives(out)?;
        match archives.len() {
            0 => Err(ShipflowError::PackageBuildFailed {
                stderr: format!("no source distribution found in {}", out.display()),
            }),
            1 => Ok(archives.remove(0)),
            n => {
                tracing::warn!(count = n, dir = %out.display(), "several archives built, uploading the newest");
                archives.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());
                archives.pop().ok_or_else(|| ShipflowError::PackageBuildFailed {
                    stderr: "no source distribution found".into(),
                })
            }
        }
    }

    async fn upload(&self, sdist: &Path, version: &str) -> ShipflowResult<()> {
        let index = &self.config.file.package.index_url;

        // lives until the end of this function, then removed
        let index_config = self.scope.write_private_file("pypirc-", &self.index_config())?;

        let spec = CommandSpec::new("package:upload", "twine")
            .args(["upload", "--non-interactive", "--config-file"])
            .arg(index_config.path().to_string_lossy().to_string())
            .args(["--repository", INDEX_SECTION])
            .arg(sdist.to_string_lossy().to_string())
            .timeout(TimeoutConfig::bound(self.config.file.timeouts.package_secs));

        tracing::info!(index = %index, version = %version, "uploading package");
        let output = self.runner.run(&spec).await?;

        if !output.succeeded() {
            tracing::error!(index = %index, exit_code = output.exit_code, "upload rejected");
            return Err(ShipflowError::PackagePublishFailure {
                index: index.clone(),
                version: version.to_string(),
                stderr: output.stderr,
            });
        }

        Ok(())
    }

    fn index_config(&self) -> String {
        format!(
            "[distutils]\nindex-servers =\n    {section}\n\n[{section}]\nrepository = {url}\nusername = {user}\npassword = {password}\n",
            section = INDEX_SECTION,
            url = self.config.file.package.index_url,
            user = self.credentials.username,
            password = self.credentials.password.expose(),
        )
    }
}

fn archive_pattern(dir: &Path) -> String {
    format!("{}/*.tar.gz", glob::Pattern::escape(&dir.to_string_lossy()))
}

fn find_archives(dir: &Path) -> ShipflowResult<Vec<PathBuf>> {
    Ok(glob::glob(&archive_pattern(dir))?.filter_map(Result::ok).collect())
}

/// Copy a published archive into `dist_dir`, replacing older archives
pub fn keep_archive(sdist: &Path, dist_dir: &Path) -> ShipflowResult<PathBuf> {
    let name = sdist.file_name().ok_or_else(|| ShipflowError::MissingArtifact {
        path: sdist.to_path_buf(),
    })?;

    std::fs::create_dir_all(dist_dir).map_err(|e| ShipflowError::FileWriteError {
        path: dist_dir.to_path_buf(),
        error: e.to_string(),
    })?;

    for stale in find_archives(dist_dir)? {
        tracing::debug!(path = %stale.display(), "removing stale archive");
        std::fs::remove_file(&stale).map_err(|e| ShipflowError::FileWriteError {
            path: stale.clone(),
            error: e.to_string(),
        })?;
    }

    let kept = dist_dir.join(name);
    std::fs::copy(sdist, &kept).map_err(|e| ShipflowError::FileWriteError {
        path: kept.clone(),
        error: e.to_string(),
    })?;
    Ok(kept)
}

/// Copy `source` into `dest`, leaving out the `excluded` relative paths
fn stage_tree(source: &Path, dest: &Path, excluded: &[PathBuf]) -> ShipflowResult<()> {
    std::fs::create_dir_all(dest).map_err(|e| ShipflowError::FileWriteError {
        path: dest.to_path_buf(),
        error: e.to_string(),
    })?;

    let pattern = format!("{}/**/*", glob::Pattern::escape(&source.to_string_lossy()));
    let mut copied = 0usize;

    for entry in glob::glob(&pattern)?.filter_map(Result::ok) {
        let Ok(relative) = entry.strip_prefix(source) else {
            continue;
        };
        if excluded.iter().any(|skip| relative.starts_with(skip)) {
            continue;
        }
        // dangling links have nothing to copy
        let Ok(meta) = std::fs::metadata(&entry) else {
            tracing::debug!(path = %entry.display(), "skipping unreadable entry");
            continue;
        };

        let target = dest.join(relative);
        let result = if meta.is_dir() {
            std::fs::create_dir_all(&target)
        } else {
            let parent = target.parent().unwrap_or(dest);
            std::fs::create_dir_all(parent).and_then(|_| std::fs::copy(&entry, &target).map(|_| ()))
        };
        result.map_err(|e| ShipflowError::FileWriteError {
            path: target.clone(),
            error: e.to_string(),
        })?;

        if meta.is_file() {
            copied += 1;
        }
    }

    tracing::debug!(files = copied, dest = %dest.display(), "staged project copy");
    Ok(())
}

fn canonical(path: &Path) -> ShipflowResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| ShipflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// `path` relative to `root`, without `.` segments; `None` when outside
fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).ok()?.to_path_buf()
    } else {
        path.to_path_buf()
    };

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => clean.push(part),
            _ => return None,
        }
    }
    Some(clean)
}

/// BLAKE3 digest of a file, hex encoded
pub fn digest_file(path: &Path) -> ShipflowResult<String> {
    let content = std::fs::read(path).map_err(|e| ShipflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    let mut hasher = Hasher::new();
    hasher.update(&content);
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSnapshot, IdentityInput, PipelineFile};
    use crate::executors::scripted::ScriptedRunner;
    use crate::executors::CommandOutput;
    use std::sync::Mutex;

    const SETUP_PY: &str = "setup(\n    version = '2.1.0',\n)\n";

    fn config(root: &Path) -> Arc<PipelineConfig> {
        std::fs::write(root.join("setup.py"), SETUP_PY).unwrap();

        let file = PipelineFile::from_yaml(
            r#"
name: demo
release: { major: 2, minor: 1 }
registry: { host: r.example.com, repository: ml/mf }
package:
  index_url: https://pypi.example.com/legacy/
"#,
        )
        .unwrap();
        let env = EnvSnapshot::from_pairs([
            ("PACKAGE_INDEX_USERNAME", "uploader"),
            ("PACKAGE_INDEX_PASSWORD", "pa55"),
        ]);
        let input = IdentityInput {
            run_counter: 345,
            branch: "master".into(),
            default_branch: "master".into(),
            ..Default::default()
        };
        Arc::new(PipelineConfig::new(file, root.to_path_buf(), input, env).unwrap())
    }

    /// Build step drops an archive into `--dist-dir`
    fn build_writes_sdist(spec: &CommandSpec) {
        if let Some(pos) = spec.args.iter().position(|a| a == "--dist-dir") {
            let dir = PathBuf::from(&spec.args[pos + 1]);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("zillow-metaflow-2.1.345.tar.gz"), b"archive").unwrap();
        }
    }

    #[tokio::test]
    async fn test_publish_stamps_builds_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let seen_config = Arc::new(Mutex::new(String::new()));
        let seen_manifest = Arc::new(Mutex::new(String::new()));
        let (config_slot, manifest_slot) = (seen_config.clone(), seen_manifest.clone());

        let runner = Arc::new(ScriptedRunner::new(move |spec| {
            if spec.label == "package:build" {
                let cwd = spec.working_dir.clone().unwrap();
                *manifest_slot.lock().unwrap() = std::fs::read_to_string(cwd.join("setup.py")).unwrap();
                build_writes_sdist(spec);
            } else if spec.label == "package:upload" {
                let pos = spec.args.iter().position(|a| a == "--config-file").unwrap();
                *config_slot.lock().unwrap() = std::fs::read_to_string(&spec.args[pos + 1]).unwrap();
            }
            Ok(CommandOutput::success(""))
        }));

        let publisher = PackagePublisher::new(runner.clone(), config(dir.path()), &scope).unwrap();
        let outcome = publisher.publish("2.1.345+2.1.0").await.unwrap();

        // the build saw the stamped copy, the project kept its upstream version
        assert!(seen_manifest.lock().unwrap().contains("version = '2.1.345+2.1.0'"));
        assert_eq!(std::fs::read_to_string(dir.path().join("setup.py")).unwrap(), SETUP_PY);

        let calls = runner.calls();
        let build = &calls[0];
        assert!(build.working_dir.as_ref().unwrap().starts_with(scope.path()));

        assert_eq!(outcome.version, "2.1.345+2.1.0");
        assert!(outcome.sdist.ends_with("zillow-metaflow-2.1.345.tar.gz"));
        assert_eq!(outcome.digest, blake3::hash(b"archive").to_hex().to_string());

        let upload = &calls[1];
        assert_eq!(upload.program, "twine");
        assert!(upload.args.contains(&"--non-interactive".to_string()));
        assert!(!upload.args.iter().any(|a| a.contains("pa55")));

        let index_config = seen_config.lock().unwrap().clone();
        assert!(index_config.contains("repository = https://pypi.example.com/legacy/"));
        assert!(index_config.contains("password = pa55"));

        // the index config does not outlive the upload
        let leftovers: Vec<_> = std::fs::read_dir(scope.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("pypirc-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_republish_resolves_from_untouched_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            build_writes_sdist(spec);
            Ok(CommandOutput::success(""))
        }));
        let cfg = config(dir.path());
        let publisher = PackagePublisher::new(runner, cfg.clone(), &scope).unwrap();

        for _ in 0..2 {
            let upstream = crate::version::read_upstream_version(&cfg.manifest_path()).unwrap();
            assert_eq!(upstream, "2.1.0");
            publisher.publish(&format!("2.1.345+{}", upstream)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_build_leaves_project_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(CommandOutput::failure("error: invalid command", 1))));

        let publisher = PackagePublisher::new(runner, config(dir.path()), &scope).unwrap();
        let result = publisher.publish("2.1.345+2.1.0").await;

        assert!(matches!(result, Err(ShipflowError::PackageBuildFailed { .. })));
        assert_eq!(std::fs::read_to_string(dir.path().join("setup.py")).unwrap(), SETUP_PY);
    }

    #[test]
    fn test_stage_tree_skips_generated_output() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        for file in ["setup.py", "metaflow/__init__.py", "dist/old.tar.gz", ".git/HEAD", ".flake8"] {
            let path = source.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, file).unwrap();
        }

        let excluded = vec![PathBuf::from(".git"), PathBuf::from("dist")];
        stage_tree(source.path(), dest.path(), &excluded).unwrap();

        assert!(dest.path().join("setup.py").is_file());
        assert!(dest.path().join("metaflow/__init__.py").is_file());
        assert!(dest.path().join(".flake8").is_file());
        assert!(!dest.path().join("dist").exists());
        assert!(!dest.path().join(".git").exists());
    }

    #[test]
    fn test_relative_to_project() {
        let root = Path::new("/work/project");
        assert_eq!(relative_to(root, Path::new("./dist")), Some(PathBuf::from("dist")));
        assert_eq!(relative_to(root, Path::new("/work/project/setup.py")), Some(PathBuf::from("setup.py")));
        assert_eq!(relative_to(root, Path::new("/elsewhere/setup.py")), None);
        assert_eq!(relative_to(root, Path::new("../setup.py")), None);
    }

    #[test]
    fn test_keep_archive_replaces_stale_archives() {
        let dir = tempfile::tempdir().unwrap();
        let dist = dir.path().join("dist");
        std::fs::create_dir_all(&dist).unwrap();
        std::fs::write(dist.join("zillow-metaflow-2.1.344.tar.gz"), b"old").unwrap();

        let built = dir.path().join("zillow-metaflow-2.1.345.tar.gz");
        std::fs::write(&built, b"archive").unwrap();

        let kept = keep_archive(&built, &dist).unwrap();
        assert_eq!(kept, dist.join("zillow-metaflow-2.1.345.tar.gz"));
        assert_eq!(std::fs::read(&kept).unwrap(), b"archive");
        assert!(!dist.join("zillow-metaflow-2.1.344.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_rejected_upload() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.label == "package:upload" {
                Ok(CommandOutput::failure("HTTPError: 400 File already exists.", 1))
            } else {
                build_writes_sdist(spec);
                Ok(CommandOutput::success(""))
            }
        }));

        let publisher = PackagePublisher::new(runner, config(dir.path()), &scope).unwrap();
        match publisher.publish("2.1.345+2.1.0").await {
            Err(ShipflowError::PackagePublishFailure { version, stderr, .. }) => {
                assert_eq!(version, "2.1.345+2.1.0");
                assert!(stderr.contains("already exists"));
            }
            other => panic!("Expected PackagePublishFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_without_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        let publisher = PackagePublisher::new(runner.clone(), config(dir.path()), &scope).unwrap();
        let result = publisher.publish("2.1.345+2.1.0").await;

        assert!(matches!(result, Err(ShipflowError::PackageBuildFailed { .. })));
        assert_eq!(runner.labels(), vec!["package:build"]);
    }

    #[test]
    fn test_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let scope = RunScope::new().unwrap();
        let file = PipelineFile::from_yaml("name: d\nregistry: { host: h, repository: r }\nrelease: { major: 1, minor: 0 }\n").unwrap();
        let input = IdentityInput {
            branch: "main".into(),
            default_branch: "main".into(),
            ..Default::default()
        };
        let config = Arc::new(PipelineConfig::new(file, dir.path().to_path_buf(), input, EnvSnapshot::default()).unwrap());

        let result = PackagePublisher::new(Arc::new(ScriptedRunner::succeeding()), config, &scope);
        assert!(matches!(result, Err(ShipflowError::MissingCredential { .. })));
    }
}
