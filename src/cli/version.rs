// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Version command - print the resolved version of this run

use miette::{IntoDiagnostic, Result};

use super::{fail, load_config, ConfigArgs, IdentityArgs, VersionFormat};
use crate::version::{resolve_from_manifest, ResolvedVersion};

/// Run the version command
pub async fn run(config: ConfigArgs, identity: IdentityArgs, format: VersionFormat, verbose: bool) -> Result<()> {
    let config = load_config(&config.config, identity).map_err(|e| fail(e, verbose))?;
    let version = resolve_from_manifest(&config.manifest_path(), &config.identity).map_err(|e| fail(e, verbose))?;

    print!("{}", render(&version, format)?);
    Ok(())
}

fn render(version: &ResolvedVersion, format: VersionFormat) -> Result<String> {
    Ok(match format {
        VersionFormat::Text => format!(
            "Library version: {}\nImage tag:       {}\nUpstream:        {}\n",
            version.library_version, version.image_tag, version.upstream
        ),
        VersionFormat::Json => format!("{}\n", serde_json::to_string_pretty(version).into_diagnostic()?),
        VersionFormat::Env => format!(
            "LIBRARY_VERSION={}\nIMAGE_TAG={}\nUPSTREAM_VERSION={}\n",
            version.library_version, version.image_tag, version.upstream
        ),
    })
}
