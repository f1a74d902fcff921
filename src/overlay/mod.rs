//! Script overlays applied to a materialized image.
//!
//! Overlays replace files inside the image (usually the generated launcher
//! scripts) with externally authored ones. Installation happens in two
//! phases: every source is first copied to a temp file beside its
//! destination, then the temps are renamed into place. Nothing in the
//! image changes unless the first phase succeeds for every descriptor.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PackagingError, Result};
use crate::filesystem::{set_mode, sha256_bytes, sha256_file, tmp_name};
use crate::launcher::scripts::{batch_script_path, posix_script_path, render_batch, render_posix};
use crate::launcher::LauncherSet;

const EXECUTABLE_MODE: u32 = 0o755;
const REGULAR_MODE: u32 = 0o644;

/// One externally supplied file and where it lands in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub source: PathBuf,
    /// Relative to the image root.
    pub destination: PathBuf,
    pub executable: bool,
}

struct Staged {
    temp: PathBuf,
    destination: PathBuf,
}

/// Copy every overlay into `image_root`, replacing existing files.
///
/// Returns the installed destination paths. A failure before any rename
/// leaves the image untouched; a failure after the first rename is
/// reported with `partial` set.
pub fn install_overlays(image_root: &Path, scripts: &[ScriptDescriptor]) -> Result<Vec<PathBuf>> {
    let mut staged: Vec<Staged> = Vec::with_capacity(scripts.len());
    for script in scripts {
        match stage_one(image_root, script) {
            Ok(s) => staged.push(s),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }

    let mut installed = Vec::with_capacity(staged.len());
    for (i, s) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(&s.temp, &s.destination) {
            discard(&staged[i..]);
            return Err(PackagingError::overlay(
                &s.destination,
                "replacing destination",
                i > 0,
                Some(e),
            ));
        }
        debug!("overlaid {}", s.destination.display());
        installed.push(s.destination.clone());
    }

    if !installed.is_empty() {
        info!(
            "installed {} script overlay(s) into {}",
            installed.len(),
            image_root.display()
        );
    }
    Ok(installed)
}

fn stage_one(image_root: &Path, script: &ScriptDescriptor) -> Result<Staged> {
    check_destination(&script.destination)?;
    let destination = image_root.join(&script.destination);

    let bytes = fs::read(&script.source).map_err(|e| {
        PackagingError::overlay(
            &script.source,
            format!("reading overlay source for '{}'", script.destination.display()),
            false,
            Some(e),
        )
    })?;
    let parent = destination
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| image_root.to_path_buf());
    fs::create_dir_all(&parent).map_err(|e| {
        PackagingError::overlay(&parent, "creating destination directory", false, Some(e))
    })?;

    let temp = parent.join(tmp_name("overlay"));
    let mode = if script.executable {
        EXECUTABLE_MODE
    } else {
        REGULAR_MODE
    };
    let written = fs::write(&temp, &bytes).and_then(|()| set_mode(&temp, mode));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(PackagingError::overlay(
            &destination,
            "staging overlay",
            false,
            Some(e),
        ));
    }
    Ok(Staged { temp, destination })
}

fn check_destination(destination: &Path) -> Result<()> {
    let ok = !destination.as_os_str().is_empty()
        && destination
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(())
    } else {
        Err(PackagingError::overlay(
            destination,
            "destination must be a relative path inside the image",
            false,
            None,
        ))
    }
}

fn discard(staged: &[Staged]) {
    for s in staged {
        if let Err(e) = fs::remove_file(&s.temp) {
            warn!("failed to remove staged overlay '{}': {}", s.temp.display(), e);
        }
    }
}

/// Whether an overlay source matches the launcher script that would be
/// generated at its destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptDrift {
    pub launcher: String,
    pub destination: PathBuf,
    pub generated_sha256: String,
    pub overlay_sha256: String,
}

impl ScriptDrift {
    pub fn differs(&self) -> bool {
        self.generated_sha256 != self.overlay_sha256
    }
}

/// Compare overlays that target launcher scripts with what would be
/// generated for them. Overlays for other files are ignored.
pub fn verify_overlays(
    launchers: &LauncherSet,
    runtime_executable: &str,
    scripts: &[ScriptDescriptor],
) -> Result<Vec<ScriptDrift>> {
    let root = Path::new("");
    let mut report = Vec::new();
    for script in scripts {
        check_destination(&script.destination)?;
        let generated = launchers.iter().find_map(|launcher| {
            if script.destination == posix_script_path(root, &launcher.name) {
                Some((launcher, render_posix(launcher, runtime_executable)))
            } else if script.destination == batch_script_path(root, &launcher.name) {
                Some((launcher, render_batch(launcher, runtime_executable)))
            } else {
                None
            }
        });
        let Some((launcher, generated)) = generated else {
            continue;
        };
        let (overlay_sha256, _) = sha256_file(&script.source).map_err(|e| {
            PackagingError::overlay(&script.source, "reading overlay source", false, Some(e))
        })?;
        report.push(ScriptDrift {
            launcher: launcher.name.clone(),
            destination: script.destination.clone(),
            generated_sha256: sha256_bytes(generated.as_bytes()),
            overlay_sha256,
        });
    }
    Ok(report)
}
