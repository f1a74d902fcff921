//! Release packaging for modular runtime applications.
//!
//! Takes a set of inter-dependent modules described by an upstream build
//! graph and produces:
//!
//! - **Artifacts** - one merged archive per launcher module holding the
//!   module and its transitive runtime dependencies
//! - **A runtime image** - the platform components the modules need, the
//!   application modules, optional capabilities and launcher scripts
//! - **Overlays and deployment** - externally authored scripts installed
//!   over the generated ones, and an optional copy to an install location
//!
//! # Architecture
//!
//! ```text
//! package.toml ──> PackagingConfig ──┐
//! modules.json ──> ModuleGraph ──────┤
//!                                    ▼
//!                                 Pipeline
//!                     ┌──────────────┴──────────────┐
//!                Aggregator                       Linker ── LinkTool (bundled | external)
//!              libs/<m>-all.tar                      │
//!                                           register launchers
//!                                                    │
//!                                              materialize ──> image/
//!                                                    │
//!                                              overlay scripts
//!                                                    │
//!                                                [deploy]
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use runtime_packager::{ModuleGraph, PackagingConfig, Pipeline};
//! use std::path::Path;
//!
//! let config = PackagingConfig::load(Path::new("package.toml"))?;
//! let graph = ModuleGraph::load(&config.module_graph)?;
//! let report = Pipeline::new(&config, &graph).run()?;
//! println!("image at {}", report.image.root.display());
//! ```

pub mod artifact;
pub mod config;
pub mod deploy;
pub mod error;
pub mod filesystem;
pub mod graph;
pub mod launcher;
pub mod link;
pub mod overlay;
pub mod pipeline;
pub mod platform;
pub mod preflight;

pub use artifact::{Aggregator, Artifact};
pub use config::PackagingConfig;
pub use deploy::Deployment;
pub use error::{PackagingError, Result};
pub use graph::{Module, ModuleGraph};
pub use launcher::{Launcher, LauncherSet};
pub use link::{Capability, CapabilitySet, ImageDescriptor, Linker, OptimizationFlags};
pub use overlay::{install_overlays, verify_overlays, ScriptDescriptor, ScriptDrift};
pub use pipeline::{Pipeline, PipelinePlan, PipelineReport, Stage, StageError};
