// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Per-run credential scope
//!
//! Registry logins, the package-index config and kubeconfigs only ever live
//! inside a private temporary directory owned by one run. Dropping the
//! scope removes all of it.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};

use crate::errors::{ShipflowError, ShipflowResult};

/// A credential value that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

/// Username/password pair resolved for one run
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
}

/// Private working area for one pipeline run
#[derive(Debug)]
pub struct RunScope {
    dir: TempDir,
}

impl RunScope {
    /// Create a fresh scope under the system temp directory
    pub fn new() -> ShipflowResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("shipflow-run-")
            .tempdir()
            .map_err(|e| ShipflowError::Io {
                message: format!("Failed to create run scope: {}", e),
            })?;

        tracing::debug!(path = %dir.path().display(), "created run scope");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory used as `DOCKER_CONFIG` so logins stay inside the run
    pub fn docker_config_dir(&self) -> ShipflowResult<PathBuf> {
        let path = self.dir.path().join("docker");
        std::fs::create_dir_all(&path).map_err(|e| ShipflowError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        Ok(path)
    }

    /// Empty directory inside the scope, recreated on every call
    pub fn fresh_dir(&self, name: &str) -> ShipflowResult<PathBuf> {
        let path = self.dir.path().join(name);
        if path.exists() {
            std::fs::remove_dir_all(&path).map_err(|e| ShipflowError::FileWriteError {
                path: path.clone(),
                error: e.to_string(),
            })?;
        }
        std::fs::create_dir_all(&path).map_err(|e| ShipflowError::FileWriteError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        Ok(path)
    }

    /// Write a private file that is deleted when the handle drops
    pub fn write_private_file(&self, prefix: &str, content: &str) -> ShipflowResult<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(self.dir.path())
            .map_err(|e| ShipflowError::FileWriteError {
                path: self.dir.path().join(prefix),
                error: e.to_string(),
            })?;

        file.write_all(content.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ShipflowError::FileWriteError {
                path: file.path().to_path_buf(),
                error: e.to_string(),
            })?;

        Ok(file)
    }

    /// Materialize a kubeconfig variable. CI systems hand these over either
    /// as the file content or as a path to a file holding it.
    pub fn write_kubeconfig(&self, environment: &str, value: &Secret) -> ShipflowResult<NamedTempFile> {
        let raw = value.expose();
        let candidate = Path::new(raw.trim());

        let content = if !raw.contains('\n') && candidate.is_file() {
            std::fs::read_to_string(candidate).map_err(|e| ShipflowError::FileReadError {
                path: candidate.to_path_buf(),
                error: e.to_string(),
            })?
        } else {
            raw.to_string()
        };

        self.write_private_file(&format!("kubeconfig-{}-", environment), &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{}", secret), "***");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_private_file_removed_on_drop() {
        let scope = RunScope::new().unwrap();
        let file = scope.write_private_file("pypirc-", "[distutils]\n").unwrap();
        let path = file.path().to_path_buf();

        assert!(path.starts_with(scope.path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[distutils]\n");

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_scope_removed_on_drop() {
        let scope = RunScope::new().unwrap();
        let docker = scope.docker_config_dir().unwrap();
        assert!(docker.is_dir());

        let root = scope.path().to_path_buf();
        drop(scope);
        assert!(!root.exists());
    }

    #[test]
    fn test_fresh_dir_is_emptied() {
        let scope = RunScope::new().unwrap();
        let dir = scope.fresh_dir("package").unwrap();
        std::fs::write(dir.join("leftover"), "x").unwrap();

        let again = scope.fresh_dir("package").unwrap();
        assert_eq!(dir, again);
        assert!(again.starts_with(scope.path()));
        assert_eq!(std::fs::read_dir(&again).unwrap().count(), 0);
    }

    #[test]
    fn test_kubeconfig_from_path_or_content() {
        let scope = RunScope::new().unwrap();

        let inline = scope
            .write_kubeconfig("sandbox", &Secret::new("apiVersion: v1\nkind: Config\n"))
            .unwrap();
        assert!(std::fs::read_to_string(inline.path()).unwrap().contains("kind: Config"));

        let source = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(source.path(), "from-file").unwrap();
        let from_path = scope
            .write_kubeconfig(
                "prod",
                &Secret::new(source.path().to_string_lossy().to_string()),
            )
            .unwrap();
        assert_eq!(std::fs::read_to_string(from_path.path()).unwrap(), "from-file");
    }
}
