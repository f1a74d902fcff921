//! Linking through an external jlink-style tool.
//!
//! The tool is invoked as
//!
//! ```text
//! <program> --module-path <catalog>:<artifacts...> --add-modules <a,b,...>
//!           [--strip-debug] [--compress N] [--no-header-files] [--no-man-pages]
//!           --output <staging>
//! ```
//!
//! and must create `<staging>` itself.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::{module_list, ImageDescriptor, LinkTool};
use crate::error::{PackagingError, Result};
use crate::platform::PlatformCatalog;

#[derive(Debug, Clone)]
pub struct ExternalLinker {
    program: PathBuf,
    catalog_root: PathBuf,
}

impl ExternalLinker {
    /// Resolve `program` either as a path or through `PATH`.
    pub fn locate(program: &str, catalog: &PlatformCatalog) -> Result<Self> {
        let candidate = Path::new(program);
        let program = if candidate.components().count() > 1 {
            if !candidate.is_file() {
                return Err(PackagingError::link(
                    program,
                    "external linker does not exist",
                ));
            }
            candidate.to_path_buf()
        } else {
            which::which(program).map_err(|e| {
                PackagingError::link(program, format!("external linker not found in PATH: {e}"))
            })?
        };
        Ok(Self {
            program,
            catalog_root: catalog.root().to_path_buf(),
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn module_path(&self, image: &ImageDescriptor) -> Result<OsString> {
        let entries = std::iter::once(self.catalog_root.as_path())
            .chain(image.module_artifacts().map(|(_, path)| path));
        std::env::join_paths(entries).map_err(|e| {
            PackagingError::link(&image.name, format!("building module path: {e}"))
        })
    }

    fn args(&self, image: &ImageDescriptor, staging: &Path) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec!["--module-path".into(), self.module_path(image)?];
        args.push("--add-modules".into());
        args.push(module_list(image).join(",").into());
        args.extend(image.optimization.to_args().into_iter().map(OsString::from));
        args.push("--output".into());
        args.push(staging.as_os_str().to_owned());
        Ok(args)
    }
}

impl LinkTool for ExternalLinker {
    fn name(&self) -> &str {
        "external"
    }

    fn link(&self, image: &ImageDescriptor, staging: &Path) -> Result<()> {
        // jlink refuses to write into an existing directory.
        if staging.exists() {
            fs::remove_dir_all(staging).map_err(|e| {
                PackagingError::link_io(&image.name, format!("clearing '{}'", staging.display()), e)
            })?;
        }

        let args = self.args(image, staging)?;
        debug!("running {} {:?}", self.program.display(), args);
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                PackagingError::link_io(
                    &image.name,
                    format!("running '{}'", self.program.display()),
                    e,
                )
            })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackagingError::link(
                &image.name,
                format!(
                    "'{}' failed ({}): {}\n{}",
                    self.program.display(),
                    output.status,
                    stdout.trim(),
                    stderr.trim()
                ),
            ));
        }
        if !staging.is_dir() {
            return Err(PackagingError::link(
                &image.name,
                format!(
                    "'{}' succeeded but did not create '{}'",
                    self.program.display(),
                    staging.display()
                ),
            ));
        }
        Ok(())
    }
}
