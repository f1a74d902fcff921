//! Module graph supplied by the upstream build.
//!
//! The pipeline never resolves dependencies itself. It reads a JSON
//! document produced by the build graph and walks it in a fixed order:
//!
//! ```json
//! { "modules": [
//!   { "name": "core", "artifact": "out/core",
//!     "dependencies": [{ "name": "base", "scope": "runtime" }],
//!     "requires": ["java.base"] } ] }
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::paths::resolve_config_path;
use crate::error::{PackagingError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyScope {
    /// Needed to compile only; never packaged.
    Compile,
    #[default]
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub scope: DependencyScope,
}

/// A compiled unit with its resolved dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    pub name: String,
    /// Directory of compiled output or a tar archive.
    pub artifact: PathBuf,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Platform components this module needs at runtime.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl Module {
    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.scope == DependencyScope::Runtime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module '{name}' (required by '{required_by}') is not part of the module graph")]
pub struct UnknownModule {
    pub name: String,
    pub required_by: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphJson {
    modules: Vec<Module>,
}

/// Read-only view of the upstream module graph.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, Module>,
}

impl ModuleGraph {
    /// Load the graph. Relative artifact paths resolve against the
    /// directory of the graph file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| PackagingError::config(path, format!("reading module graph: {e}")))?;
        let parsed: GraphJson = serde_json::from_slice(&bytes)
            .map_err(|e| PackagingError::config(path, format!("parsing module graph: {e}")))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let modules = parsed
            .modules
            .into_iter()
            .map(|mut module| {
                module.artifact =
                    resolve_config_path(base_dir, &module.artifact.to_string_lossy());
                module
            })
            .collect();
        Self::from_modules(modules).map_err(|message| PackagingError::config(path, message))
    }

    pub fn from_modules(modules: Vec<Module>) -> std::result::Result<Self, String> {
        let mut map = BTreeMap::new();
        for module in modules {
            if map.contains_key(&module.name) {
                return Err(format!("module '{}' is declared twice", module.name));
            }
            map.insert(module.name.clone(), module);
        }
        Ok(Self { modules: map })
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// `root` followed by its transitive runtime dependencies in
    /// breadth-first declaration order, each module once.
    pub fn runtime_closure(&self, root: &str) -> std::result::Result<Vec<&Module>, UnknownModule> {
        let root_module = self.modules.get(root).ok_or_else(|| UnknownModule {
            name: root.to_string(),
            required_by: root.to_string(),
        })?;

        let mut seen = BTreeSet::from([root.to_string()]);
        let mut order = vec![root_module];
        let mut queue = VecDeque::from([root_module]);

        while let Some(module) = queue.pop_front() {
            for dep in module.runtime_dependencies() {
                if !seen.insert(dep.name.clone()) {
                    continue;
                }
                let dep_module = self.modules.get(&dep.name).ok_or_else(|| UnknownModule {
                    name: dep.name.clone(),
                    required_by: module.name.clone(),
                })?;
                order.push(dep_module);
                queue.push_back(dep_module);
            }
        }

        Ok(order)
    }

    /// Union of the runtime closures of `roots`, sorted by name.
    pub fn link_set<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> std::result::Result<BTreeSet<String>, UnknownModule> {
        let mut set = BTreeSet::new();
        for root in roots {
            for module in self.runtime_closure(root)? {
                set.insert(module.name.clone());
            }
        }
        Ok(set)
    }
}
