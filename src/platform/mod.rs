//! Platform runtime catalog.
//!
//! The catalog is a directory with one subdirectory per platform
//! component. Each component carries a `component.toml`:
//!
//! ```toml
//! version = "21"
//! requires = ["java.base"]
//! ```
//!
//! Everything else in the component directory mirrors the image layout
//! (`bin/`, `lib/`, `include/`, `man/`, `legal/`) and is copied into the
//! image by the bundled linker.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PackagingError, Result};

pub const COMPONENT_MANIFEST: &str = "component.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentToml {
    version: String,
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformComponent {
    pub name: String,
    pub version: String,
    pub requires: Vec<String>,
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PlatformCatalog {
    root: PathBuf,
    components: BTreeMap<String, PlatformComponent>,
}

impl PlatformCatalog {
    pub fn load(root: &Path) -> Result<Self> {
        let entries = fs::read_dir(root).map_err(|e| {
            PackagingError::link_io(
                root.display().to_string(),
                "reading platform catalog",
                e,
            )
        })?;

        let mut components = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                PackagingError::link_io(root.display().to_string(), "reading catalog entry", e)
            })?;
            let dir = entry.path();
            let manifest = dir.join(COMPONENT_MANIFEST);
            if !dir.is_dir() || !manifest.is_file() {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let raw = fs::read_to_string(&manifest).map_err(|e| {
                PackagingError::link_io(name, format!("reading '{}'", manifest.display()), e)
            })?;
            let parsed: ComponentToml = toml::from_str(&raw).map_err(|e| {
                PackagingError::link(name, format!("parsing '{}': {e}", manifest.display()))
            })?;
            components.insert(
                name.to_string(),
                PlatformComponent {
                    name: name.to_string(),
                    version: parsed.version,
                    requires: parsed.requires,
                    root: dir.clone(),
                },
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            components,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&PlatformComponent> {
        self.components.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Transitive closure of the requested components.
    ///
    /// Each request is `(component, requested_by)`; the requester is
    /// reported when the component does not exist.
    pub fn closure<'a>(
        &self,
        requests: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<BTreeSet<String>> {
        let mut resolved = BTreeSet::new();
        let mut queue: VecDeque<(String, String)> = requests
            .into_iter()
            .map(|(name, by)| (name.to_string(), by.to_string()))
            .collect();

        while let Some((name, requested_by)) = queue.pop_front() {
            if resolved.contains(&name) {
                continue;
            }
            let component = self.components.get(&name).ok_or_else(|| {
                PackagingError::link(
                    &name,
                    format!(
                        "platform component required by '{}' does not exist in '{}'",
                        requested_by,
                        self.root.display()
                    ),
                )
            })?;
            resolved.insert(name.clone());
            for dep in &component.requires {
                queue.push_back((dep.clone(), name.clone()));
            }
        }

        Ok(resolved)
    }
}
