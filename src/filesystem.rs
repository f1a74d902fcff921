//! Filesystem helpers shared by the stages.
//!
//! These return plain `io` errors annotated with the offending path; each
//! stage maps them into its own error kind.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// An `io::Error` together with the path it happened on.
#[derive(Debug)]
pub struct PathError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl PathError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Recursively copy a directory, preserving symlinks and permissions.
///
/// Existing files at the destination are replaced; unrelated files are
/// left alone.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), PathError> {
    fs::create_dir_all(dst).map_err(|e| PathError::new(dst, e))?;

    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            PathError {
                path,
                source: e.into(),
            }
        })?;
        let src_path = entry.path();
        let rel = match src_path.strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => continue,
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let dst_path = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(src_path).map_err(|e| PathError::new(src_path, e))?;
            if dst_path.symlink_metadata().is_ok() {
                remove_any(&dst_path).map_err(|e| PathError::new(&dst_path, e))?;
            }
            make_symlink(&target, &dst_path).map_err(|e| PathError::new(&dst_path, e))?;
        } else if file_type.is_dir() {
            if dst_path.symlink_metadata().map(|m| !m.is_dir()).unwrap_or(false) {
                remove_any(&dst_path).map_err(|e| PathError::new(&dst_path, e))?;
            }
            fs::create_dir_all(&dst_path).map_err(|e| PathError::new(&dst_path, e))?;
            let perms = entry
                .metadata()
                .map_err(|e| PathError::new(src_path, e.into()))?
                .permissions();
            fs::set_permissions(&dst_path, perms).map_err(|e| PathError::new(&dst_path, e))?;
        } else {
            if dst_path.symlink_metadata().map(|m| m.is_dir()).unwrap_or(false) {
                remove_any(&dst_path).map_err(|e| PathError::new(&dst_path, e))?;
            }
            // fs::copy carries the permission bits over.
            fs::copy(src_path, &dst_path).map_err(|e| PathError::new(src_path, e))?;
        }
    }

    Ok(())
}

fn remove_any(path: &Path) -> io::Result<()> {
    let md = path.symlink_metadata()?;
    if md.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(unix)]
pub(crate) fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub(crate) fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_default();
    fs::copy(resolved, link).map(|_| ())
}

/// Set Unix permission bits. No-op on platforms without them.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Unix permission bits of `path` (0 on other platforms).
#[cfg(unix)]
pub fn mode_of(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::symlink_metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode_of(_path: &Path) -> io::Result<u32> {
    Ok(0)
}

/// Rename with a copy+remove fallback for cross-device moves.
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temp name next to the final output, unique within this process even
/// when the clock does not advance between calls.
pub fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(".{prefix}-{}-{n}-{seq}", std::process::id())
}

pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Digest of a whole tree: relative paths, file contents, symlink
/// targets and permission bits, in sorted order.
pub fn tree_digest(root: &Path) -> Result<String, PathError> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| PathError {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        let mode = mode_of(path).map_err(|e| PathError::new(path, e))?;
        hasher.update(mode.to_le_bytes());
        if entry.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(|e| PathError::new(path, e))?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else if entry.file_type().is_file() {
            let bytes = fs::read(path).map_err(|e| PathError::new(path, e))?;
            hasher.update(&bytes);
        }
        hasher.update([0]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write pretty JSON through a temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut payload = serde_json::to_vec_pretty(value)?;
    payload.push(b'\n');
    let tmp = parent.join(tmp_name("json"));
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)
}
