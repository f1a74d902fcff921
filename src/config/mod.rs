//! Packaging configuration.
//!
//! A single `package.toml` describes one image: its primary launcher,
//! secondary launchers, optimization flags, optional capabilities, script
//! overlays and an optional install destination. The parsed
//! [`PackagingConfig`] is passed explicitly into every stage; nothing is
//! read from ambient project properties.
//!
//! ```toml
//! capabilities = ["compression-support"]
//!
//! [image]
//! name = "core"
//! module_graph = "build/modules.json"
//!
//! [primary]
//! module = "core"
//! entry = "core.Main"
//! flags = ["--enable-preview"]
//!
//! [[secondary]]
//! name = "core-lsp"
//! module = "lsp-server"
//! entry = "lsp.Main"
//!
//! [linker]
//! platform = "platform"
//!
//! [[overlay]]
//! source = "scripts/core.sh"
//! destination = "bin/core"
//! executable = true
//! ```

pub(crate) mod paths;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PackagingError, Result};
use crate::launcher::Launcher;
use crate::link::{MergedModule, OptimizationFlags, MAX_COMPRESS_LEVEL};
use crate::overlay::ScriptDescriptor;
use paths::{parse_relative_path, resolve_config_path, validate_segment};

/// Default output directory, relative to the config file.
pub const DEFAULT_OUTPUT_DIR: &str = "build";

/// Default runtime executable launched by generated scripts.
pub const DEFAULT_RUNTIME_EXECUTABLE: &str = "java";

/// Directory under the output dir that holds the image.
pub const IMAGE_DIR_NAME: &str = "image";

/// Directory under the output dir that holds aggregated artifacts.
pub const ARTIFACT_DIR_NAME: &str = "libs";

/// Where the linker gets its platform components from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkerConfig {
    /// Platform catalog directory (one subdirectory per component).
    pub platform: PathBuf,
    /// External jlink-style tool, by name on `PATH` or by path.
    pub external: Option<String>,
}

/// Fully resolved packaging configuration.
#[derive(Debug, Clone)]
pub struct PackagingConfig {
    pub config_path: PathBuf,
    pub image_name: String,
    pub output_dir: PathBuf,
    pub module_graph: PathBuf,
    pub runtime_executable: String,
    /// Extend an existing image instead of creating it fresh.
    pub extend: bool,
    pub primary: Launcher,
    pub secondary: Vec<Launcher>,
    pub optimization: OptimizationFlags,
    pub capabilities: Vec<String>,
    pub extra_dependencies: Vec<String>,
    pub merged_module: Option<MergedModule>,
    pub linker: LinkerConfig,
    pub overlays: Vec<ScriptDescriptor>,
    pub install_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageToml {
    image: ImageToml,
    primary: PrimaryToml,
    #[serde(default)]
    secondary: Vec<SecondaryToml>,
    #[serde(default)]
    optimization: OptimizationFlags,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    extra_dependencies: Vec<String>,
    merged_module: Option<MergedModule>,
    linker: LinkerToml,
    #[serde(default)]
    overlay: Vec<OverlayToml>,
    install: Option<InstallToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    name: String,
    module_graph: String,
    output_dir: Option<String>,
    runtime_executable: Option<String>,
    #[serde(default)]
    extend: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrimaryToml {
    module: String,
    entry: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecondaryToml {
    name: String,
    module: String,
    entry: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkerToml {
    platform: String,
    external: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OverlayToml {
    source: String,
    destination: String,
    #[serde(default)]
    executable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstallToml {
    destination: Option<String>,
}

impl PackagingConfig {
    /// Load and validate `package.toml`.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(config_path).map_err(|e| {
            PackagingError::config(config_path, format!("reading config: {e}"))
        })?;
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_toml_str(&raw, config_path, &base_dir)
    }

    /// Parse configuration text. Relative paths resolve against `base_dir`.
    pub fn from_toml_str(raw: &str, config_path: &Path, base_dir: &Path) -> Result<Self> {
        let parsed: PackageToml = toml::from_str(raw)
            .map_err(|e| PackagingError::config(config_path, format!("parsing config: {e}")))?;

        let image_name = parsed.image.name.trim().to_string();
        validate_segment(config_path, &image_name, "image.name")?;

        let primary = Launcher::primary(
            &image_name,
            parsed.primary.module.trim(),
            parsed.primary.entry.trim(),
            parsed.primary.flags,
        );
        validate_launcher(config_path, &primary)?;

        let secondary = parsed
            .secondary
            .into_iter()
            .map(|s| {
                let launcher =
                    Launcher::secondary(s.name.trim(), s.module.trim(), s.entry.trim(), s.flags);
                validate_launcher(config_path, &launcher).map(|()| launcher)
            })
            .collect::<Result<Vec<_>>>()?;

        if parsed.optimization.compress_level > MAX_COMPRESS_LEVEL {
            return Err(PackagingError::config(
                config_path,
                format!(
                    "optimization.compress_level must be between 0 and {}, got {}",
                    MAX_COMPRESS_LEVEL, parsed.optimization.compress_level
                ),
            ));
        }

        let mut capabilities = parsed
            .capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        capabilities.sort();
        capabilities.dedup();

        let overlays = parsed
            .overlay
            .into_iter()
            .map(|o| {
                let destination =
                    parse_relative_path(config_path, &o.destination, "overlay.destination")?;
                Ok(ScriptDescriptor {
                    source: resolve_config_path(base_dir, &o.source),
                    destination,
                    executable: o.executable,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let output_dir = resolve_config_path(
            base_dir,
            parsed
                .image
                .output_dir
                .as_deref()
                .unwrap_or(DEFAULT_OUTPUT_DIR),
        );

        let install_dir = parsed
            .install
            .and_then(|i| i.destination)
            .filter(|d| !d.trim().is_empty())
            .map(|d| resolve_config_path(base_dir, d.trim()));

        Ok(Self {
            config_path: config_path.to_path_buf(),
            image_name,
            output_dir,
            module_graph: resolve_config_path(base_dir, &parsed.image.module_graph),
            runtime_executable: parsed
                .image
                .runtime_executable
                .unwrap_or_else(|| DEFAULT_RUNTIME_EXECUTABLE.to_string()),
            extend: parsed.image.extend,
            primary,
            secondary,
            optimization: parsed.optimization,
            capabilities,
            extra_dependencies: parsed.extra_dependencies,
            merged_module: parsed.merged_module,
            linker: LinkerConfig {
                platform: resolve_config_path(base_dir, &parsed.linker.platform),
                external: parsed.linker.external,
            },
            overlays,
            install_dir,
        })
    }

    /// Override the install destination (CLI flag or environment).
    pub fn with_install_dir(mut self, install_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = install_dir {
            let base = self
                .config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            self.install_dir = Some(resolve_config_path(&base, &dir.to_string_lossy()));
        }
        self
    }

    pub fn image_root(&self) -> PathBuf {
        self.output_dir.join(IMAGE_DIR_NAME)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.output_dir.join(ARTIFACT_DIR_NAME)
    }

    /// All launchers, primary first.
    pub fn launchers(&self) -> impl Iterator<Item = &Launcher> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }
}

fn validate_launcher(config_path: &Path, launcher: &Launcher) -> Result<()> {
    validate_segment(config_path, &launcher.name, "launcher name")?;
    if launcher.module.is_empty() {
        return Err(PackagingError::config(
            config_path,
            format!("launcher '{}' has an empty module", launcher.name),
        ));
    }
    if launcher.entry.is_empty() {
        return Err(PackagingError::config(
            config_path,
            format!("launcher '{}' has an empty entry symbol", launcher.name),
        ));
    }
    Ok(())
}
