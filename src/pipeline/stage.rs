use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::error::PackagingError;

/// Pipeline stages in execution order.
///
/// `Aggregate` and `Link` share a level and run concurrently; every other
/// stage waits for all stages before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Create and lock the output directory.
    Prepare,
    /// Build the merged artifact for each launcher module.
    Aggregate,
    /// Resolve the link set, platform components and capabilities.
    Link,
    RegisterLaunchers,
    /// Write the image tree and move it into place.
    Materialize,
    OverlayScripts,
    /// Copy the image to the install destination. Only present when one
    /// is configured.
    Deploy,
}

impl Stage {
    /// Stages that must have succeeded before `self` starts.
    pub fn predecessors(self) -> &'static [Stage] {
        match self {
            Stage::Prepare => &[],
            Stage::Aggregate | Stage::Link => &[Stage::Prepare],
            Stage::RegisterLaunchers => &[Stage::Link],
            Stage::Materialize => &[Stage::Aggregate, Stage::RegisterLaunchers],
            Stage::OverlayScripts => &[Stage::Materialize],
            Stage::Deploy => &[Stage::OverlayScripts],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "prepare"),
            Stage::Aggregate => write!(f, "aggregate"),
            Stage::Link => write!(f, "link"),
            Stage::RegisterLaunchers => write!(f, "register-launchers"),
            Stage::Materialize => write!(f, "materialize"),
            Stage::OverlayScripts => write!(f, "overlay-scripts"),
            Stage::Deploy => write!(f, "deploy"),
        }
    }
}

/// A [`PackagingError`] tagged with the stage it stopped the run in.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: PackagingError,
}

impl StageError {
    pub fn new(stage: Stage, source: PackagingError) -> Self {
        Self { stage, source }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }
}

/// Extension for tagging stage results.
pub(crate) trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> InStage<T> for Result<T, PackagingError> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}
