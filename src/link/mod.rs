//! Runtime image linking.
//!
//! The [`Linker`] turns the module graph and configuration into an
//! [`ImageDescriptor`]: the link set of application modules, the platform
//! components they need (transitively), the merged optional capabilities
//! and the optimization flags. Launchers are registered on the descriptor,
//! then [`Linker::materialize`] hands it to a [`LinkTool`] and moves the
//! finished tree into place.
//!
//! # Layout
//!
//! ```text
//! <image>/
//!   bin/<launcher>, bin/<launcher>.bat   generated launcher scripts
//!   bin/, lib/, legal/ ...               platform component content
//!   lib/modules                          application modules (tar, zstd when compressed)
//!   image.json                           descriptor
//! ```

pub mod bundled;
pub mod capabilities;
pub mod external;
pub mod image;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PackagingConfig;
use crate::error::{PackagingError, Result};
use crate::filesystem::tmp_name;
use crate::graph::ModuleGraph;
use crate::launcher::scripts::{batch_script_path, posix_script_path, write_launcher_scripts};
use crate::platform::PlatformCatalog;

pub use bundled::BundledLinker;
pub use capabilities::{Capability, CapabilitySet};
pub use external::ExternalLinker;
pub use image::{ImageDescriptor, IMAGE_DESCRIPTOR};

/// Highest accepted compression level (zstd maximum).
pub const MAX_COMPRESS_LEVEL: u8 = 22;

/// Path of the application module archive inside the image.
pub const MODULES_ARCHIVE: &str = "lib/modules";

/// Independent toggles applied while linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OptimizationFlags {
    /// Drop `*.debug` files and `debug/` trees.
    pub strip_debug: bool,
    /// 0 disables compression of `lib/modules`.
    pub compress_level: u8,
    /// Drop `include/`.
    pub omit_headers: bool,
    /// Drop `man/` and `doc/`.
    pub omit_docs: bool,
}

impl OptimizationFlags {
    /// Whether the platform path `rel` is filtered out of the image.
    pub fn excludes(&self, rel: &Path) -> bool {
        let mut components = rel.components().filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        });
        let top = components.next().unwrap_or_default();

        if self.omit_headers && top == "include" {
            return true;
        }
        if self.omit_docs && (top == "man" || top == "doc") {
            return true;
        }
        if self.strip_debug {
            let in_debug_dir = rel
                .components()
                .any(|c| matches!(c, Component::Normal(part) if part == "debug"));
            let is_debug_file = rel.extension().is_some_and(|ext| ext == "debug");
            if in_debug_dir || is_debug_file {
                return true;
            }
        }
        false
    }

    /// Whether an entry of an application module is dropped. Only
    /// `*.debug` files go; package directories are never filtered.
    pub fn drops_module_entry(&self, rel: &Path) -> bool {
        self.strip_debug && rel.extension().is_some_and(|ext| ext == "debug")
    }

    /// Arguments for a jlink-style tool.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.strip_debug {
            args.push("--strip-debug".to_string());
        }
        if self.compress_level > 0 {
            args.push("--compress".to_string());
            args.push(self.compress_level.to_string());
        }
        if self.omit_headers {
            args.push("--no-header-files".to_string());
        }
        if self.omit_docs {
            args.push("--no-man-pages".to_string());
        }
        args
    }
}

/// Synthetic module that stands in for non-modular dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergedModule {
    #[serde(default = "default_merged_name")]
    pub name: String,
    /// Platform components the merged dependencies need.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Service interfaces the merged dependencies load.
    #[serde(default)]
    pub uses: Vec<String>,
}

fn default_merged_name() -> String {
    "merged.module".to_string()
}

/// Something that can fill a staging directory with a linked image.
///
/// Implementations produce the platform content and `lib/modules`; the
/// [`Linker`] adds launcher scripts and the descriptor afterwards.
pub trait LinkTool: Send + Sync {
    fn name(&self) -> &str;

    fn link(&self, image: &ImageDescriptor, staging: &Path) -> Result<()>;
}

pub struct Linker<'a> {
    config: &'a PackagingConfig,
    graph: &'a ModuleGraph,
    catalog: PlatformCatalog,
}

impl<'a> Linker<'a> {
    pub fn new(config: &'a PackagingConfig, graph: &'a ModuleGraph) -> Result<Self> {
        let catalog = PlatformCatalog::load(&config.linker.platform)?;
        Ok(Self {
            config,
            graph,
            catalog,
        })
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.catalog
    }

    /// The tool configured for this image: external when `[linker]
    /// external` is set, bundled otherwise.
    pub fn tool(&self) -> Result<Box<dyn LinkTool>> {
        match &self.config.linker.external {
            Some(program) => Ok(Box::new(ExternalLinker::locate(program, &self.catalog)?)),
            None => Ok(Box::new(BundledLinker::new(self.catalog.clone()))),
        }
    }

    /// Build the in-progress image descriptor. Nothing is written.
    pub fn plan(&self) -> Result<ImageDescriptor> {
        let roots = self
            .config
            .launchers()
            .map(|l| l.module.as_str())
            .chain(self.config.extra_dependencies.iter().map(String::as_str));
        let link_set = self
            .graph
            .link_set(roots)
            .map_err(|e| PackagingError::link(&e.name, e.to_string()))?;

        let mut capabilities = CapabilitySet::resolve(&self.config.capabilities, &self.catalog)?;
        if self.config.extend {
            if let Some(existing) = ImageDescriptor::read(&self.config.image_root())? {
                info!(
                    "extending image '{}' (existing capabilities: {})",
                    self.config.image_name,
                    existing.capabilities.names().collect::<Vec<_>>().join(", ")
                );
                let mut merged = existing.capabilities;
                merged.merge(&capabilities)?;
                capabilities = merged;
            }
        }

        let mut requests: Vec<(&str, &str)> = Vec::new();
        let mut module_artifacts = std::collections::BTreeMap::new();
        for name in &link_set {
            // link_set only contains names resolved from the graph.
            let Some(module) = self.graph.get(name) else {
                continue;
            };
            module_artifacts.insert(module.name.clone(), module.artifact.clone());
            for required in &module.requires {
                requests.push((required.as_str(), module.name.as_str()));
            }
        }
        if let Some(merged) = &self.config.merged_module {
            for required in &merged.requires {
                requests.push((required.as_str(), merged.name.as_str()));
            }
        }
        for name in capabilities.names() {
            requests.push((name, "optional capabilities"));
        }
        let platform_components = self.catalog.closure(requests)?;

        Ok(ImageDescriptor {
            name: self.config.image_name.clone(),
            root: self.config.image_root(),
            runtime_executable: self.config.runtime_executable.clone(),
            optimization: self.config.optimization,
            capabilities,
            platform_components,
            modules: link_set,
            merged_module: self.config.merged_module.clone(),
            launchers: Default::default(),
            module_artifacts,
        })
    }

    /// Link `image` into a staging directory next to the image root and
    /// move it into place. A failed run leaves no image behind at the
    /// staging path, and a previous image at the root is only replaced
    /// once the new one is complete.
    pub fn materialize(&self, image: &ImageDescriptor, tool: &dyn LinkTool) -> Result<PathBuf> {
        if image.launchers.primary().is_none() {
            return Err(PackagingError::MissingPrimaryLauncher {
                image: image.name.clone(),
            });
        }

        let parent = image
            .root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent).map_err(|e| {
            PackagingError::link_io(&image.name, format!("creating '{}'", parent.display()), e)
        })?;
        let staging = parent.join(tmp_name(&format!("{}-staging", image.name)));
        fs::create_dir_all(&staging).map_err(|e| {
            PackagingError::link_io(&image.name, format!("creating '{}'", staging.display()), e)
        })?;

        let result = self
            .fill_staging(image, tool, &staging)
            .and_then(|()| swap_into_place(&image.name, &staging, &image.root));
        if result.is_err() && staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!("leaving staging directory '{}': {}", staging.display(), e);
            }
        }
        result?;

        info!(
            "materialized image '{}' at {} ({} platform components, {} modules, {} launchers)",
            image.name,
            image.root.display(),
            image.platform_components.len(),
            image.modules.len(),
            image.launchers.len()
        );
        Ok(image.root.clone())
    }

    fn fill_staging(
        &self,
        image: &ImageDescriptor,
        tool: &dyn LinkTool,
        staging: &Path,
    ) -> Result<()> {
        info!("linking '{}' with {} linker", image.name, tool.name());
        tool.link(image, staging)?;
        check_launcher_paths(image, staging)?;
        write_launcher_scripts(staging, image.launchers.iter(), &image.runtime_executable)
            .map_err(|e| PackagingError::link_io(&image.name, "writing launcher scripts", e))?;
        image.write(staging)
    }
}

/// Launcher scripts may not replace anything the tool linked into `bin/`.
fn check_launcher_paths(image: &ImageDescriptor, staging: &Path) -> Result<()> {
    for launcher in image.launchers.iter() {
        let paths = [
            posix_script_path(staging, &launcher.name),
            batch_script_path(staging, &launcher.name),
        ];
        if let Some(path) = paths.iter().find(|p| p.symlink_metadata().is_ok()) {
            return Err(PackagingError::LauncherShadowsImage {
                launcher: launcher.name.clone(),
                path: path.strip_prefix(staging).unwrap_or(path).to_path_buf(),
            });
        }
    }
    Ok(())
}

fn swap_into_place(image_name: &str, staging: &Path, root: &Path) -> Result<()> {
    let previous = root.with_file_name(tmp_name(&format!("{image_name}-previous")));
    let had_previous = root.exists();
    if had_previous {
        fs::rename(root, &previous).map_err(|e| {
            PackagingError::link_io(image_name, format!("moving aside '{}'", root.display()), e)
        })?;
    }
    if let Err(e) = fs::rename(staging, root) {
        if had_previous {
            let _ = fs::rename(&previous, root);
        }
        return Err(PackagingError::link_io(
            image_name,
            format!("moving '{}' to '{}'", staging.display(), root.display()),
            e,
        ));
    }
    if had_previous {
        if let Err(e) = fs::remove_dir_all(&previous) {
            warn!("failed to remove previous image '{}': {}", previous.display(), e);
        }
    }
    Ok(())
}

/// Components of a link request, sorted, for logs and tool arguments.
pub(crate) fn module_list(image: &ImageDescriptor) -> Vec<String> {
    let mut names: BTreeSet<String> = image.platform_components.clone();
    names.extend(image.modules.iter().cloned());
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::module;
    use crate::launcher::Launcher;
    use crate::platform::tests::write_component;
    use tempfile::TempDir;

    fn fixture(root: &Path) -> (PackagingConfig, ModuleGraph) {
        let platform = root.join("platform");
        write_component(&platform, "java.base", "21", &[], &[("bin/java", "java")]);
        write_component(&platform, "java.sql", "21", &["java.base"], &[]);
        fs::create_dir_all(root.join("out/core")).unwrap();
        fs::write(root.join("out/core/Main.class"), "main").unwrap();

        let raw = r#"
[image]
name = "core"
module_graph = "modules.json"

[primary]
module = "core"
entry = "core.Main"

[merged_module]
requires = ["java.sql"]

[linker]
platform = "platform"
"#;
        let config =
            PackagingConfig::from_toml_str(raw, &root.join("package.toml"), root).unwrap();
        let mut core = module("core", &[]);
        core.artifact = root.join("out/core");
        core.requires = vec!["java.base".to_string()];
        (config, ModuleGraph::from_modules(vec![core]).unwrap())
    }

    #[test]
    fn test_plan_includes_merged_module_requirements() {
        let temp = TempDir::new().unwrap();
        let (config, graph) = fixture(temp.path());
        let image = Linker::new(&config, &graph).unwrap().plan().unwrap();

        let components: Vec<_> = image.platform_components.iter().map(String::as_str).collect();
        assert_eq!(components, vec!["java.base", "java.sql"]);
        assert_eq!(
            image.module_artifact("core"),
            Some(temp.path().join("out/core").as_path())
        );
        assert_eq!(module_list(&image), vec!["core", "java.base", "java.sql"]);
    }

    #[test]
    fn test_materialize_requires_primary_launcher() {
        let temp = TempDir::new().unwrap();
        let (config, graph) = fixture(temp.path());
        let linker = Linker::new(&config, &graph).unwrap();
        let image = linker.plan().unwrap();
        let tool = linker.tool().unwrap();

        let err = linker.materialize(&image, tool.as_ref()).unwrap_err();
        assert_eq!(err.kind(), "MissingPrimaryLauncherError");
        assert!(!config.image_root().exists());
    }

    #[test]
    fn test_materialize_replaces_previous_image() {
        let temp = TempDir::new().unwrap();
        let (config, graph) = fixture(temp.path());
        let linker = Linker::new(&config, &graph).unwrap();
        let mut image = linker.plan().unwrap();
        image
            .register_launcher(Launcher::primary("core", "core", "core.Main", vec![]))
            .unwrap();
        let tool = linker.tool().unwrap();

        let root = linker.materialize(&image, tool.as_ref()).unwrap();
        fs::write(root.join("stray"), "left over").unwrap();
        linker.materialize(&image, tool.as_ref()).unwrap();

        assert!(!root.join("stray").exists());
        assert!(root.join("bin/core").is_file());
        assert!(root.join("bin/java").is_file());
        assert!(root.join(MODULES_ARCHIVE).is_file());
        assert!(root.join(IMAGE_DESCRIPTOR).is_file());
        let leftovers: Vec<_> = fs::read_dir(&config.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["image".to_string()]);
    }

    #[test]
    fn test_launcher_cannot_replace_platform_binary() {
        let temp = TempDir::new().unwrap();
        let (config, graph) = fixture(temp.path());
        let linker = Linker::new(&config, &graph).unwrap();
        let tool = linker.tool().unwrap();

        let mut image = linker.plan().unwrap();
        image
            .register_launcher(Launcher::primary("core", "core", "core.Main", vec![]))
            .unwrap();
        let root = linker.materialize(&image, tool.as_ref()).unwrap();
        image
            .register_launcher(Launcher::secondary("java", "core", "core.Tool", vec![]))
            .unwrap();

        let err = linker.materialize(&image, tool.as_ref()).unwrap_err();
        assert_eq!(err.kind(), "LauncherConflictError");
        assert!(err.to_string().contains("bin/java"));
        assert_eq!(fs::read_to_string(root.join("bin/java")).unwrap(), "java");
        let leftovers: Vec<_> = fs::read_dir(&config.output_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["image".to_string()]);
    }

    #[test]
    fn test_flags_are_independent() {
        let rel = Path::new("include/jni.h");
        let mut flags = OptimizationFlags::default();
        assert!(!flags.excludes(rel));
        flags.omit_docs = true;
        flags.strip_debug = true;
        assert!(!flags.excludes(rel));
        flags.omit_headers = true;
        assert!(flags.excludes(rel));
    }

    #[test]
    fn test_flag_filters() {
        let flags = OptimizationFlags {
            strip_debug: true,
            compress_level: 0,
            omit_headers: true,
            omit_docs: true,
        };
        assert!(flags.excludes(Path::new("man/man1/java.1")));
        assert!(flags.excludes(Path::new("doc/README")));
        assert!(flags.excludes(Path::new("lib/libjava.so.debug")));
        assert!(flags.excludes(Path::new("lib/debug/symbols")));
        assert!(!flags.excludes(Path::new("lib/libjava.so")));
        assert!(!flags.excludes(Path::new("bin/java")));
        assert!(!flags.excludes(Path::new("legal/LICENSE")));
    }

    #[test]
    fn test_module_entries_keep_packages() {
        let flags = OptimizationFlags {
            strip_debug: true,
            compress_level: 0,
            omit_headers: true,
            omit_docs: true,
        };
        assert!(flags.drops_module_entry(Path::new("core/Main.class.debug")));
        assert!(!flags.drops_module_entry(Path::new("org/x/debug/Tracer.class")));
        assert!(!flags.drops_module_entry(Path::new("doc/Help.class")));
        assert!(!flags.drops_module_entry(Path::new("include/Header.class")));
        assert!(!OptimizationFlags::default().drops_module_entry(Path::new("a.debug")));
    }

    #[test]
    fn test_flags_to_args() {
        let flags = OptimizationFlags {
            strip_debug: true,
            compress_level: 2,
            omit_headers: true,
            omit_docs: true,
        };
        assert_eq!(
            flags.to_args(),
            vec![
                "--strip-debug",
                "--compress",
                "2",
                "--no-header-files",
                "--no-man-pages"
            ]
        );
        assert!(OptimizationFlags::default().to_args().is_empty());
    }

    #[test]
    fn test_merged_module_defaults() {
        let merged: MergedModule = toml::from_str("requires = [\"java.sql\"]").unwrap();
        assert_eq!(merged.name, "merged.module");
        assert_eq!(merged.requires, vec!["java.sql".to_string()]);
        assert!(merged.uses.is_empty());
    }
}
