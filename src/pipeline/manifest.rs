//! `run-manifest.json`, written to the output directory after every run.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::stage::{Stage, StageError};
use crate::artifact::Artifact;
use crate::filesystem::write_json_atomic;

pub const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

impl From<&StageError> for RunFailure {
    fn from(err: &StageError) -> Self {
        Self {
            stage: err.stage,
            kind: err.kind().to_string(),
            message: err.source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub image: String,
    pub status: RunStatus,
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub completed_stages: Vec<Stage>,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_to: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl RunManifest {
    pub fn started(image: &str) -> Self {
        let now = now_utc_rfc3339();
        Self {
            image: image.to_string(),
            status: RunStatus::Failed,
            started_at_utc: now.clone(),
            finished_at_utc: now,
            completed_stages: Vec::new(),
            artifacts: Vec::new(),
            image_root: None,
            deployed_to: None,
            failure: None,
        }
    }

    pub fn finish(&mut self, outcome: Result<(), &StageError>) {
        self.finished_at_utc = now_utc_rfc3339();
        match outcome {
            Ok(()) => self.status = RunStatus::Success,
            Err(err) => {
                self.status = RunStatus::Failed;
                self.failure = Some(err.into());
            }
        }
    }

    pub fn write(&self, output_dir: &Path) -> io::Result<PathBuf> {
        let path = output_dir.join(RUN_MANIFEST_FILENAME);
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}

pub(crate) fn now_utc_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
