//! Stage orchestration.
//!
//! ```text
//! prepare ─┬─ aggregate ──────────────────────────┐
//!          └─ link ── register-launchers ── materialize ── overlay-scripts ── [deploy]
//! ```
//!
//! Aggregation and linking run on scoped threads; everything after them is
//! sequential. The first failing stage ends the run and is recorded in
//! `run-manifest.json`.

pub mod manifest;
pub mod stage;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;

use fs2::FileExt;
use tracing::{info, warn};

use crate::artifact::{Aggregator, Artifact};
use crate::config::PackagingConfig;
use crate::deploy::Deployment;
use crate::error::{PackagingError, Result};
use crate::graph::ModuleGraph;
use crate::launcher::register_launchers;
use crate::link::{ImageDescriptor, LinkTool, Linker};
use crate::overlay::install_overlays;

pub use manifest::{RunFailure, RunManifest, RunStatus, RUN_MANIFEST_FILENAME};
pub use stage::{Stage, StageError};
use stage::InStage;

const LOCK_FILENAME: &str = ".runtime-packager.lock";

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<Stage>,
    pub artifacts: Vec<Artifact>,
    pub image: ImageDescriptor,
    pub overlays: Vec<PathBuf>,
    pub deployed_to: Option<PathBuf>,
}

/// Result of planning: the stage graph and the registered image
/// descriptor. Nothing is written.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub stages: Vec<Stage>,
    pub artifacts: Vec<PathBuf>,
    pub image: ImageDescriptor,
}

pub struct Pipeline<'a> {
    config: &'a PackagingConfig,
    graph: &'a ModuleGraph,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PackagingConfig, graph: &'a ModuleGraph) -> Self {
        Self { config, graph }
    }

    /// Stages this configuration runs, in order.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![
            Stage::Prepare,
            Stage::Aggregate,
            Stage::Link,
            Stage::RegisterLaunchers,
            Stage::Materialize,
            Stage::OverlayScripts,
        ];
        if self.config.install_dir.is_some() {
            stages.push(Stage::Deploy);
        }
        stages
    }

    /// Resolve and register everything without touching the filesystem.
    pub fn plan(&self) -> std::result::Result<PipelinePlan, StageError> {
        let linker = Linker::new(self.config, self.graph).in_stage(Stage::Link)?;
        let mut image = linker.plan().in_stage(Stage::Link)?;
        register_launchers(&mut image, self.config).in_stage(Stage::RegisterLaunchers)?;
        let aggregator = Aggregator::new(self.config, self.graph);
        let artifacts = self
            .aggregation_targets()
            .into_keys()
            .map(|module| aggregator.artifact_path(module))
            .collect();
        Ok(PipelinePlan {
            stages: self.stages(),
            artifacts,
            image,
        })
    }

    /// Run every stage and record the outcome in the run manifest.
    pub fn run(&self) -> std::result::Result<PipelineReport, StageError> {
        let mut manifest = RunManifest::started(&self.config.image_name);
        let result = self.run_stages(&mut manifest);

        manifest.finish(result.as_ref().map(|_| ()));
        // A refused lock means another run owns the manifest.
        let owns_output = !matches!(&result, Err(e) if e.stage == Stage::Prepare);
        if owns_output && self.config.output_dir.is_dir() {
            if let Err(e) = manifest.write(&self.config.output_dir) {
                warn!("failed to write run manifest: {}", e);
            }
        }
        result
    }

    fn run_stages(
        &self,
        manifest: &mut RunManifest,
    ) -> std::result::Result<PipelineReport, StageError> {
        let config = self.config;
        let mut completed = Vec::new();

        let _lock = lock_output_dir(&config.output_dir).in_stage(Stage::Prepare)?;
        mark(manifest, &mut completed, Stage::Prepare);

        let (aggregated, linked) = thread::scope(|s| {
            let aggregate = s.spawn(|| self.aggregate());
            let link = s.spawn(|| self.link());
            (join(aggregate), join(link))
        });
        let artifacts = aggregated.in_stage(Stage::Aggregate)?;
        manifest.artifacts = artifacts.clone();
        mark(manifest, &mut completed, Stage::Aggregate);
        let (linker, mut image, tool) = linked.in_stage(Stage::Link)?;
        mark(manifest, &mut completed, Stage::Link);

        register_launchers(&mut image, config).in_stage(Stage::RegisterLaunchers)?;
        mark(manifest, &mut completed, Stage::RegisterLaunchers);

        let root = linker
            .materialize(&image, tool.as_ref())
            .in_stage(Stage::Materialize)?;
        manifest.image_root = Some(root.clone());
        mark(manifest, &mut completed, Stage::Materialize);

        let overlays = match install_overlays(&root, &config.overlays) {
            Ok(installed) => installed,
            Err(e) => {
                discard_image(&root);
                manifest.image_root = None;
                return Err(StageError::new(Stage::OverlayScripts, e));
            }
        };
        mark(manifest, &mut completed, Stage::OverlayScripts);

        let deployed_to = match &config.install_dir {
            Some(dir) => {
                let deployed = Deployment::new(dir).deploy(&root).in_stage(Stage::Deploy)?;
                manifest.deployed_to = Some(deployed.clone());
                mark(manifest, &mut completed, Stage::Deploy);
                Some(deployed)
            }
            None => None,
        };

        info!(
            "packaged '{}' ({})",
            image.name,
            completed
                .iter()
                .map(Stage::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Ok(PipelineReport {
            stages: completed,
            artifacts,
            image,
            overlays,
            deployed_to,
        })
    }

    /// Launcher modules and the entry written into each artifact
    /// manifest. The primary launcher's entry wins for its module.
    fn aggregation_targets(&self) -> BTreeMap<&str, &str> {
        let mut targets = BTreeMap::new();
        for launcher in self.config.launchers() {
            targets
                .entry(launcher.module.as_str())
                .or_insert(launcher.entry.as_str());
        }
        targets
    }

    fn aggregate(&self) -> Result<Vec<Artifact>> {
        let aggregator = Aggregator::new(self.config, self.graph);
        self.aggregation_targets()
            .into_iter()
            .map(|(module, entry)| aggregator.aggregate(module, Some(entry)))
            .collect()
    }

    fn link(&self) -> Result<(Linker<'a>, ImageDescriptor, Box<dyn LinkTool>)> {
        let linker = Linker::new(self.config, self.graph)?;
        let tool = linker.tool()?;
        let image = linker.plan()?;
        info!(
            "link set for '{}': {} modules, {} platform components, capabilities [{}]",
            image.name,
            image.modules.len(),
            image.platform_components.len(),
            image.capabilities.names().collect::<Vec<_>>().join(", ")
        );
        Ok((linker, image, tool))
    }
}

fn mark(manifest: &mut RunManifest, completed: &mut Vec<Stage>, stage: Stage) {
    completed.push(stage);
    manifest.completed_stages.push(stage);
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Exclusive lock over the output directory, held for the whole run.
fn lock_output_dir(output_dir: &Path) -> Result<File> {
    fs::create_dir_all(output_dir).map_err(|e| {
        PackagingError::output(output_dir, "creating output directory", Some(e))
    })?;
    let lock_path = output_dir.join(LOCK_FILENAME);
    // The lock file is never unlinked; removing a held lock would let a
    // second run lock a fresh inode at the same path.
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| PackagingError::output(&lock_path, "opening lock file", Some(e)))?;
    if file.try_lock_exclusive().is_err() {
        return Err(PackagingError::output(
            output_dir,
            "locked by another packaging run",
            None,
        ));
    }
    Ok(file)
}

fn discard_image(root: &Path) {
    warn!("discarding image {} after failed overlay", root.display());
    if let Err(e) = fs::remove_dir_all(root) {
        warn!("failed to remove image '{}': {}", root.display(), e);
    }
}
