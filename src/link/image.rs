use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{CapabilitySet, MergedModule, OptimizationFlags};
use crate::error::{PackagingError, Result};
use crate::filesystem::write_json_atomic;
use crate::launcher::{Launcher, LauncherSet};

/// Descriptor file written at the image root.
pub const IMAGE_DESCRIPTOR: &str = "image.json";

/// An image in progress (before materialization) or a materialized one
/// read back from `image.json`.
///
/// The serialized form holds no absolute paths, so two images linked
/// from the same inputs carry identical descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub name: String,
    #[serde(skip)]
    pub root: PathBuf,
    pub runtime_executable: String,
    pub optimization: OptimizationFlags,
    pub capabilities: CapabilitySet,
    pub platform_components: BTreeSet<String>,
    /// Application modules in the link set.
    pub modules: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_module: Option<MergedModule>,
    pub launchers: LauncherSet,
    #[serde(skip)]
    pub(crate) module_artifacts: BTreeMap<String, PathBuf>,
}

impl ImageDescriptor {
    /// Register one launcher on the in-progress image.
    pub fn register_launcher(&mut self, launcher: Launcher) -> Result<()> {
        if launcher.primary && launcher.name != self.name {
            return Err(PackagingError::LauncherConflict {
                launcher: launcher.name,
            });
        }
        self.launchers.register(launcher, &self.modules)
    }

    /// Artifact location of an application module in the link set.
    pub fn module_artifact(&self, module: &str) -> Option<&Path> {
        self.module_artifacts.get(module).map(PathBuf::as_path)
    }

    pub fn module_artifacts(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.module_artifacts
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Write `image.json` into `dir`.
    pub(crate) fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(IMAGE_DESCRIPTOR);
        write_json_atomic(&path, self).map_err(|e| {
            PackagingError::link_io(&self.name, format!("writing '{}'", path.display()), e)
        })
    }

    /// Read the descriptor of a materialized image, if there is one.
    pub fn read(root: &Path) -> Result<Option<Self>> {
        let path = root.join(IMAGE_DESCRIPTOR);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| {
            PackagingError::link_io(
                root.display().to_string(),
                format!("reading '{}'", path.display()),
                e,
            )
        })?;
        let mut descriptor: Self = serde_json::from_slice(&bytes).map_err(|e| {
            PackagingError::link(
                root.display().to_string(),
                format!("parsing '{}': {e}", path.display()),
            )
        })?;
        descriptor.root = root.to_path_buf();
        Ok(Some(descriptor))
    }
}
