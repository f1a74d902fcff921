//! Preflight checks.
//!
//! Validates the configured inputs before a run: the platform catalog,
//! the external linker (when configured), module artifacts, overlay
//! sources and the install destination. Each check reports instead of
//! failing so that every problem shows up in one pass.

use std::path::Path;

use crate::config::PackagingConfig;
use crate::graph::ModuleGraph;
use crate::link::{CapabilitySet, ExternalLinker};
use crate::platform::PlatformCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

impl CheckResult {
    fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    fn fail(name: &str, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.into()),
        }
    }

    fn warn(name: &str, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }
}

pub fn run_preflight(config: &PackagingConfig, graph: &ModuleGraph) -> PreflightReport {
    let mut checks = Vec::new();

    match PlatformCatalog::load(&config.linker.platform) {
        Ok(catalog) => {
            checks.push(CheckResult::pass("platform catalog"));
            checks.push(check_capabilities(config, &catalog));
            if let Some(program) = &config.linker.external {
                checks.push(match ExternalLinker::locate(program, &catalog) {
                    Ok(linker) => CheckResult {
                        name: "external linker".to_string(),
                        status: CheckStatus::Pass,
                        details: Some(linker.program().display().to_string()),
                    },
                    Err(e) => CheckResult::fail("external linker", e.to_string()),
                });
            }
        }
        Err(e) => checks.push(CheckResult::fail("platform catalog", e.to_string())),
    }

    checks.extend(check_module_artifacts(config, graph));
    checks.extend(config.overlays.iter().map(|overlay| {
        let name = format!("overlay {}", overlay.destination.display());
        if overlay.source.is_file() {
            CheckResult::pass(&name)
        } else {
            CheckResult::fail(&name, format!("missing source {}", overlay.source.display()))
        }
    }));
    if let Some(dir) = &config.install_dir {
        checks.push(check_install_dir(dir));
    }

    PreflightReport { checks }
}

fn check_capabilities(config: &PackagingConfig, catalog: &PlatformCatalog) -> CheckResult {
    match CapabilitySet::resolve(&config.capabilities, catalog) {
        Ok(_) => CheckResult::pass("optional capabilities"),
        Err(e) => CheckResult::fail("optional capabilities", e.to_string()),
    }
}

fn check_module_artifacts(config: &PackagingConfig, graph: &ModuleGraph) -> Vec<CheckResult> {
    let roots = config
        .launchers()
        .map(|l| l.module.as_str())
        .chain(config.extra_dependencies.iter().map(String::as_str));
    let link_set = match graph.link_set(roots) {
        Ok(set) => set,
        Err(e) => return vec![CheckResult::fail("module graph", e.to_string())],
    };
    link_set
        .iter()
        .filter_map(|name| graph.get(name))
        .map(|module| {
            let name = format!("module {}", module.name);
            if module.artifact.exists() {
                CheckResult::pass(&name)
            } else {
                CheckResult::fail(
                    &name,
                    format!("artifact {} does not exist", module.artifact.display()),
                )
            }
        })
        .collect()
}

fn check_install_dir(dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::pass("install destination")
    } else if dir.exists() {
        CheckResult::fail(
            "install destination",
            format!("{} exists and is not a directory", dir.display()),
        )
    } else {
        CheckResult::warn(
            "install destination",
            format!("{} will be created", dir.display()),
        )
    }
}
