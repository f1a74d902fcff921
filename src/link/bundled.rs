//! Directory-assembling linker.
//!
//! Copies the selected platform components out of the catalog and packs
//! the application modules into `lib/modules`. Output depends only on the
//! descriptor and the catalog, never on the order of earlier invocations.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{ImageDescriptor, LinkTool, MODULES_ARCHIVE};
use crate::artifact::tarball::{collect_dir, collect_tar, write_tar_file, EntryMap};
use crate::error::{PackagingError, Result};
use crate::filesystem::make_symlink;
use crate::platform::{PlatformCatalog, COMPONENT_MANIFEST};

pub struct BundledLinker {
    catalog: PlatformCatalog,
}

impl BundledLinker {
    pub fn new(catalog: PlatformCatalog) -> Self {
        Self { catalog }
    }

    fn copy_platform(&self, image: &ImageDescriptor, staging: &Path) -> Result<()> {
        // image-relative path -> providing component
        let mut provided: BTreeMap<PathBuf, String> = BTreeMap::new();

        for name in &image.platform_components {
            let component = self.catalog.get(name).ok_or_else(|| {
                PackagingError::link(name, "platform component vanished from the catalog")
            })?;
            for entry in WalkDir::new(&component.root)
                .follow_links(false)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| {
                    PackagingError::link_io(name, "walking platform component", e.into())
                })?;
                if entry.file_type().is_dir() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&component.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                if rel.as_os_str() == COMPONENT_MANIFEST || image.optimization.excludes(&rel) {
                    continue;
                }
                if let Some(owner) = provided.get(&rel) {
                    return Err(PackagingError::link(
                        name,
                        format!(
                            "'{}' is provided by both '{}' and '{}'",
                            rel.display(),
                            owner,
                            name
                        ),
                    ));
                }

                let dest = staging.join(&rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        PackagingError::link_io(name, format!("creating '{}'", parent.display()), e)
                    })?;
                }
                if entry.file_type().is_symlink() {
                    fs::read_link(entry.path())
                        .and_then(|target| make_symlink(&target, &dest))
                        .map_err(|e| {
                            PackagingError::link_io(
                                name,
                                format!("linking '{}'", dest.display()),
                                e,
                            )
                        })?;
                } else {
                    fs::copy(entry.path(), &dest).map_err(|e| {
                        PackagingError::link_io(
                            name,
                            format!("copying '{}'", entry.path().display()),
                            e,
                        )
                    })?;
                }
                debug!("{}: {}", name, rel.display());
                provided.insert(rel, name.clone());
            }
        }
        Ok(())
    }

    fn pack_modules(&self, image: &ImageDescriptor, staging: &Path) -> Result<()> {
        let mut entries = EntryMap::new();
        for (module, artifact) in image.module_artifacts() {
            let collected = if artifact.is_dir() {
                collect_dir(artifact, module)
            } else {
                collect_tar(artifact, module)
            }
            .map_err(|e| {
                PackagingError::link_io(
                    module,
                    format!("reading module artifact '{}'", artifact.display()),
                    e,
                )
            })?;
            for (rel, entry) in collected {
                if image.optimization.drops_module_entry(Path::new(&rel)) {
                    continue;
                }
                entries.insert(format!("{module}/{rel}"), entry);
            }
        }

        let path = staging.join(MODULES_ARCHIVE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PackagingError::link_io(&image.name, format!("creating '{}'", parent.display()), e)
            })?;
        }
        write_tar_file(&path, &entries, image.optimization.compress_level).map_err(|e| {
            PackagingError::link_io(&image.name, format!("writing '{}'", path.display()), e)
        })
    }
}

impl LinkTool for BundledLinker {
    fn name(&self) -> &str {
        "bundled"
    }

    fn link(&self, image: &ImageDescriptor, staging: &Path) -> Result<()> {
        self.copy_platform(image, staging)?;
        self.pack_modules(image, staging)
    }
}
