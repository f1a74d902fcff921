//! Deterministic tar writing and tar/directory input reading.
//!
//! Entries are emitted in lexicographic path order with zeroed mtime,
//! uid and gid, and modes normalized to 0644/0755, so identical inputs
//! always yield identical bytes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub(crate) const FILE_MODE: u32 = 0o644;
pub(crate) const EXEC_MODE: u32 = 0o755;

/// Where an entry's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntrySource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TarEntry {
    pub(crate) source: EntrySource,
    pub(crate) mode: u32,
    /// Name of the input that contributed this entry.
    pub(crate) origin: String,
}

/// Flat namespace keyed by `/`-separated relative path.
pub(crate) type EntryMap = BTreeMap<String, TarEntry>;

pub(crate) fn normalize_mode(mode: u32) -> u32 {
    if mode & 0o111 != 0 {
        EXEC_MODE
    } else {
        FILE_MODE
    }
}

/// Collect regular files below `dir`. Symlinks are followed.
pub(crate) fn collect_dir(dir: &Path, origin: &str) -> io::Result<Vec<(String, TarEntry)>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let mode = entry_mode(&entry.metadata()?);
        out.push((
            rel,
            TarEntry {
                source: EntrySource::File(entry.path().to_path_buf()),
                mode: normalize_mode(mode),
                origin: origin.to_string(),
            },
        ));
    }
    Ok(out)
}

#[cfg(unix)]
fn entry_mode(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode()
}

#[cfg(not(unix))]
fn entry_mode(_md: &fs::Metadata) -> u32 {
    FILE_MODE
}

/// Read the regular files of a tar archive into memory.
pub(crate) fn collect_tar(archive_path: &Path, origin: &str) -> io::Result<Vec<(String, TarEntry)>> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(file);
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let rel = entry
            .path()?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        if rel.is_empty() || rel.split('/').any(|part| part == "..") {
            continue;
        }
        let mode = entry.header().mode().unwrap_or(FILE_MODE);
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        out.push((
            rel,
            TarEntry {
                source: EntrySource::Bytes(bytes),
                mode: normalize_mode(mode),
                origin: origin.to_string(),
            },
        ));
    }
    Ok(out)
}

/// Write `entries` as a tar stream and return the inner writer.
pub(crate) fn write_tar<W: Write>(out: W, entries: &EntryMap) -> io::Result<W> {
    let mut builder = tar::Builder::new(out);
    for (rel, entry) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(entry.mode);
        match &entry.source {
            EntrySource::File(path) => {
                let mut f = File::open(path)?;
                header.set_size(f.metadata()?.len());
                header.set_cksum();
                builder.append_data(&mut header, rel, &mut f)?;
            }
            EntrySource::Bytes(bytes) => {
                header.set_size(bytes.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, rel, bytes.as_slice())?;
            }
        }
    }
    builder.into_inner()
}

/// Write `entries` to `path` as a tar archive, zstd-compressed when
/// `zstd_level` is non-zero.
pub(crate) fn write_tar_file(path: &Path, entries: &EntryMap, zstd_level: u8) -> io::Result<()> {
    let out = File::create(path)?;
    if zstd_level == 0 {
        let mut out = write_tar(out, entries)?;
        out.flush()?;
        return Ok(());
    }
    let encoder = zstd::stream::Encoder::new(out, i32::from(zstd_level))?;
    let encoder = write_tar(encoder, entries)?;
    encoder.finish()?.flush()
}
