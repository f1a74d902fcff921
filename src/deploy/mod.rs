//! Copying the finished image to an installation destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{PackagingError, Result};
use crate::filesystem::copy_dir_recursive;

#[derive(Debug, Clone)]
pub struct Deployment {
    destination: PathBuf,
}

impl Deployment {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Recursively copy `image_root` into the destination, creating it
    /// and any missing parents. Existing files are replaced. A symlink to
    /// a directory is deployed through.
    pub fn deploy(&self, image_root: &Path) -> Result<PathBuf> {
        match fs::metadata(&self.destination) {
            Ok(md) if !md.is_dir() => {
                return Err(PackagingError::deployment(
                    &self.destination,
                    "destination exists and is not a directory",
                    None,
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PackagingError::deployment(
                    &self.destination,
                    "inspecting destination",
                    Some(e),
                ));
            }
        }

        copy_dir_recursive(image_root, &self.destination).map_err(|e| {
            let message = if e.source.kind() == io::ErrorKind::PermissionDenied {
                format!("permission denied at '{}'", e.path.display())
            } else {
                format!("copying '{}'", e.path.display())
            };
            PackagingError::deployment(&self.destination, message, Some(e.source))
        })?;

        info!(
            "deployed {} to {}",
            image_root.display(),
            self.destination.display()
        );
        Ok(self.destination.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{set_mode, tree_digest};
    use tempfile::TempDir;

    fn image(temp: &TempDir) -> PathBuf {
        let root = temp.path().join("build/image");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/core"), "#!/bin/sh\n").unwrap();
        set_mode(&root.join("bin/core"), 0o755).unwrap();
        fs::create_dir_all(root.join("lib")).unwrap();
        fs::write(root.join("lib/modules"), "modules").unwrap();
        root
    }

    #[test]
    fn test_deploy_creates_intermediate_dirs() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let dest = temp.path().join("opt/tools/core");

        Deployment::new(&dest).deploy(&root).unwrap();

        assert_eq!(tree_digest(&dest).unwrap(), tree_digest(&root).unwrap());
    }

    #[test]
    fn test_redeploy_over_existing_directory() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let dest = temp.path().join("dist");
        let deployment = Deployment::new(&dest);

        deployment.deploy(&root).unwrap();
        fs::write(root.join("lib/modules"), "relinked").unwrap();
        deployment.deploy(&root).unwrap();

        assert_eq!(fs::read_to_string(dest.join("lib/modules")).unwrap(), "relinked");
    }

    #[test]
    fn test_destination_is_a_file() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let dest = temp.path().join("dist");
        fs::write(&dest, "not a dir").unwrap();

        let err = Deployment::new(&dest).deploy(&root).unwrap_err();
        assert_eq!(err.kind(), "DeploymentError");
        assert!(err.to_string().contains("not a directory"));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_through_directory_symlink() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let real = temp.path().join("real-opt");
        fs::create_dir_all(&real).unwrap();
        let link = temp.path().join("opt-link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let deployed = Deployment::new(&link).deploy(&root).unwrap();

        assert_eq!(deployed, link);
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(tree_digest(&real).unwrap(), tree_digest(&root).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_destination() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let link = temp.path().join("opt-link");
        std::os::unix::fs::symlink(temp.path().join("missing"), &link).unwrap();

        let err = Deployment::new(&link).deploy(&root).unwrap_err();
        assert_eq!(err.kind(), "DeploymentError");
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_destination() {
        let temp = TempDir::new().unwrap();
        let root = image(&temp);
        let locked = temp.path().join("locked");
        fs::create_dir_all(&locked).unwrap();
        set_mode(&locked, 0o555).unwrap();

        let result = Deployment::new(locked.join("core")).deploy(&root);
        set_mode(&locked, 0o755).unwrap();

        // Root ignores directory permissions.
        if let Err(err) = result {
            assert_eq!(err.kind(), "DeploymentError");
        }
    }
}
