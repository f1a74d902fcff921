use std::path::{Component, Path, PathBuf};

use crate::error::{PackagingError, Result};

/// Resolve `path` against the directory holding the configuration file.
///
/// A leading `~/` expands to the user's home directory.
pub(crate) fn resolve_config_path(base_dir: &Path, path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// Parse a path that must stay inside some root (image-relative paths).
pub(crate) fn parse_relative_path(config_path: &Path, raw: &str, field: &str) -> Result<PathBuf> {
    let candidate = Path::new(raw);
    if raw.trim().is_empty() {
        return Err(PackagingError::config(
            config_path,
            format!("{field} must not be empty"),
        ));
    }
    if candidate.is_absolute() {
        return Err(PackagingError::config(
            config_path,
            format!("{field} must be relative, got absolute path '{raw}'"),
        ));
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            return Err(PackagingError::config(
                config_path,
                format!("{field} contains invalid traversal/root component in '{raw}'"),
            ));
        }
    }
    Ok(candidate.to_path_buf())
}

/// Names that end up as single file names (image, launchers).
pub(crate) fn validate_segment(config_path: &Path, value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PackagingError::config(
            config_path,
            format!("{field} must not be empty"),
        ));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(PackagingError::config(
            config_path,
            format!("{field} must be a safe filename segment, got '{value}'"),
        ));
    }
    Ok(())
}
