//! Launcher registration.
//!
//! An image carries exactly one primary launcher, named after the image,
//! plus any number of secondary launchers. Registration only mutates the
//! in-progress [`ImageDescriptor`](crate::link::ImageDescriptor); scripts
//! are written when the image is materialized.

pub mod scripts;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PackagingConfig;
use crate::error::{PackagingError, Result};
use crate::link::ImageDescriptor;

/// A named entry point bound to a module and a start symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Launcher {
    pub name: String,
    pub module: String,
    pub entry: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub primary: bool,
}

impl Launcher {
    /// The primary launcher always takes the image's name.
    pub fn primary(
        image_name: impl Into<String>,
        module: impl Into<String>,
        entry: impl Into<String>,
        flags: Vec<String>,
    ) -> Self {
        Self {
            name: image_name.into(),
            module: module.into(),
            entry: entry.into(),
            flags,
            primary: true,
        }
    }

    pub fn secondary(
        name: impl Into<String>,
        module: impl Into<String>,
        entry: impl Into<String>,
        flags: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            entry: entry.into(),
            flags,
            primary: false,
        }
    }

    /// `module/entry`, the form handed to the runtime.
    pub fn target(&self) -> String {
        format!("{}/{}", self.module, self.entry)
    }
}

/// Launchers of one image, primary first, names unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LauncherSet {
    launchers: Vec<Launcher>,
}

impl LauncherSet {
    /// Add `launcher`, checking name uniqueness and that its module is in
    /// `link_set`.
    pub fn register(&mut self, launcher: Launcher, link_set: &BTreeSet<String>) -> Result<()> {
        if self.launchers.iter().any(|l| l.name == launcher.name)
            || (launcher.primary && self.primary().is_some())
        {
            return Err(PackagingError::LauncherConflict {
                launcher: launcher.name,
            });
        }
        if !link_set.contains(&launcher.module) {
            return Err(PackagingError::UnresolvedModule {
                launcher: launcher.name,
                module: launcher.module,
            });
        }
        debug!(
            "registered {} launcher '{}' -> {}",
            if launcher.primary { "primary" } else { "secondary" },
            launcher.name,
            launcher.target()
        );
        if launcher.primary {
            self.launchers.insert(0, launcher);
        } else {
            self.launchers.push(launcher);
        }
        Ok(())
    }

    pub fn primary(&self) -> Option<&Launcher> {
        self.launchers.first().filter(|l| l.primary)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Launcher> {
        self.launchers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Launcher> {
        self.launchers.iter().find(|l| l.name == name)
    }

    pub fn len(&self) -> usize {
        self.launchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.launchers.is_empty()
    }
}

/// Register the configured primary and secondary launchers.
pub fn register_launchers(image: &mut ImageDescriptor, config: &PackagingConfig) -> Result<()> {
    for launcher in config.launchers() {
        image.register_launcher(launcher.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_primary_is_kept_first() {
        let modules = link_set(&["core", "lsp-server"]);
        let mut set = LauncherSet::default();
        set.register(
            Launcher::secondary("core-lsp", "lsp-server", "lsp.Main", vec![]),
            &modules,
        )
        .unwrap();
        set.register(Launcher::primary("core", "core", "core.Main", vec![]), &modules)
            .unwrap();

        let names: Vec<_> = set.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["core", "core-lsp"]);
        assert_eq!(set.primary().unwrap().target(), "core/core.Main");
    }

    #[test]
    fn test_duplicate_name_conflicts() {
        let modules = link_set(&["core", "lsp-server"]);
        let mut set = LauncherSet::default();
        set.register(Launcher::primary("core", "core", "core.Main", vec![]), &modules)
            .unwrap();
        let err = set
            .register(
                Launcher::secondary("core", "lsp-server", "lsp.Main", vec![]),
                &modules,
            )
            .unwrap_err();
        assert_eq!(err.kind(), "LauncherConflictError");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("core").unwrap().module, "core");
    }

    #[test]
    fn test_second_primary_conflicts() {
        let modules = link_set(&["core"]);
        let mut set = LauncherSet::default();
        set.register(Launcher::primary("core", "core", "core.Main", vec![]), &modules)
            .unwrap();
        let other = Launcher::primary("core2", "core", "core.Other", vec![]);
        let err = set.register(other, &modules).unwrap_err();
        assert_eq!(err.kind(), "LauncherConflictError");
    }

    #[test]
    fn test_module_outside_link_set_unresolved() {
        let modules = link_set(&["core"]);
        let mut set = LauncherSet::default();
        let err = set
            .register(
                Launcher::secondary("core-lsp", "lsp-server", "lsp.Main", vec![]),
                &modules,
            )
            .unwrap_err();
        match err {
            PackagingError::UnresolvedModule { launcher, module } => {
                assert_eq!(launcher, "core-lsp");
                assert_eq!(module, "lsp-server");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(set.is_empty());
    }
}
