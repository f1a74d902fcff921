//! Error taxonomy for the packaging pipeline.
//!
//! Every variant names the resource that failed (module, capability,
//! launcher, or path). None of them are retried: they come from
//! configuration or environment defects, not transient conditions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by every library stage.
pub type Result<T, E = PackagingError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PackagingError {
    /// Invalid or unreadable configuration / module graph input.
    #[error("invalid configuration '{}': {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// A dependency artifact is missing, unreadable, or the artifact
    /// could not be written.
    #[error("aggregating module '{module}' failed at '{}': {message}", path.display())]
    Aggregation {
        module: String,
        path: PathBuf,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Unknown or conflicting platform component / capability, or a
    /// failure while assembling the image.
    #[error("linking failed for '{resource}': {message}")]
    Link {
        resource: String,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("launcher '{launcher}' is registered more than once")]
    LauncherConflict { launcher: String },

    /// A launcher script would replace content the linker put in the image.
    #[error("launcher '{launcher}' would overwrite '{}' in the linked image", path.display())]
    LauncherShadowsImage { launcher: String, path: PathBuf },

    #[error("image '{image}' has no primary launcher")]
    MissingPrimaryLauncher { image: String },

    #[error("launcher '{launcher}' references module '{module}' which is not in the link set")]
    UnresolvedModule { launcher: String, module: String },

    /// Failed or partial script overlay. `partial` is set once at least
    /// one destination has already been replaced.
    #[error("script overlay failed at '{}': {message}", path.display())]
    ScriptOverlay {
        path: PathBuf,
        message: String,
        partial: bool,
        #[source]
        source: Option<io::Error>,
    },

    /// The output directory could not be prepared or is locked by
    /// another run.
    #[error("output directory '{}': {message}", path.display())]
    Output {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("deployment to '{}' failed: {message}", path.display())]
    Deployment {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl PackagingError {
    /// Stable kind name reported to users and recorded in the run manifest.
    pub fn kind(&self) -> &'static str {
        match self {
            PackagingError::Config { .. } => "ConfigError",
            PackagingError::Aggregation { .. } => "AggregationError",
            PackagingError::Link { .. } => "LinkError",
            PackagingError::LauncherConflict { .. }
            | PackagingError::LauncherShadowsImage { .. } => "LauncherConflictError",
            PackagingError::UnresolvedModule { .. } => "UnresolvedModuleError",
            PackagingError::MissingPrimaryLauncher { .. } => "MissingPrimaryLauncherError",
            PackagingError::ScriptOverlay { .. } => "ScriptOverlayError",
            PackagingError::Output { .. } => "OutputError",
            PackagingError::Deployment { .. } => "DeploymentError",
        }
    }

    pub(crate) fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PackagingError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn aggregation(
        module: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        PackagingError::Aggregation {
            module: module.into(),
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn aggregation_io(
        module: impl Into<String>,
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: io::Error,
    ) -> Self {
        PackagingError::Aggregation {
            module: module.into(),
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn link(resource: impl Into<String>, message: impl Into<String>) -> Self {
        PackagingError::Link {
            resource: resource.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn link_io(
        resource: impl Into<String>,
        message: impl Into<String>,
        source: io::Error,
    ) -> Self {
        PackagingError::Link {
            resource: resource.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn overlay(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        partial: bool,
        source: Option<io::Error>,
    ) -> Self {
        PackagingError::ScriptOverlay {
            path: path.into(),
            message: message.into(),
            partial,
            source,
        }
    }

    pub(crate) fn output(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<io::Error>,
    ) -> Self {
        PackagingError::Output {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    pub(crate) fn deployment(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<io::Error>,
    ) -> Self {
        PackagingError::Deployment {
            path: path.into(),
            message: message.into(),
            source,
        }
    }
}
