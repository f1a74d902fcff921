//! Generated launcher scripts.
//!
//! Every launcher gets `bin/<name>` (POSIX sh, mode 0755) and
//! `bin/<name>.bat`. Both exec the image's runtime executable with the
//! launcher's flags and `module/entry` target.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::Launcher;
use crate::filesystem::set_mode;

pub const BIN_DIR: &str = "bin";

/// Environment variable the generated scripts read extra flags from.
pub const OPTIONS_VAR: &str = "LAUNCHER_OPTIONS";

pub fn posix_script_path(image_root: &Path, launcher: &str) -> PathBuf {
    image_root.join(BIN_DIR).join(launcher)
}

pub fn batch_script_path(image_root: &Path, launcher: &str) -> PathBuf {
    image_root.join(BIN_DIR).join(format!("{launcher}.bat"))
}

pub fn render_posix(launcher: &Launcher, runtime_executable: &str) -> String {
    let flags = launcher
        .flags
        .iter()
        .map(|f| f.replace('\\', "\\\\").replace('"', "\\\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "#!/bin/sh\n\
         # '{name}' launcher\n\
         {var}=\"{flags} ${{{var}}}\"\n\
         DIR=`dirname \"$0\"`\n\
         exec \"$DIR/{exe}\" ${var} -m {target} \"$@\"\n",
        name = launcher.name,
        var = OPTIONS_VAR,
        flags = flags,
        exe = runtime_executable,
        target = launcher.target(),
    )
}

pub fn render_batch(launcher: &Launcher, runtime_executable: &str) -> String {
    let flags = launcher.flags.join(" ");
    format!(
        "@echo off\r\n\
         rem '{name}' launcher\r\n\
         set {var}={flags} %{var}%\r\n\
         set DIR=%~dp0\r\n\
         \"%DIR%\\{exe}\" %{var}% -m {target} %*\r\n",
        name = launcher.name,
        var = OPTIONS_VAR,
        flags = flags,
        exe = runtime_executable,
        target = launcher.target(),
    )
}

/// Write both scripts for every launcher under `image_root/bin`.
pub fn write_launcher_scripts<'a>(
    image_root: &Path,
    launchers: impl IntoIterator<Item = &'a Launcher>,
    runtime_executable: &str,
) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(image_root.join(BIN_DIR))?;
    let mut written = Vec::new();
    for launcher in launchers {
        let posix = posix_script_path(image_root, &launcher.name);
        fs::write(&posix, render_posix(launcher, runtime_executable))?;
        set_mode(&posix, 0o755)?;
        written.push(posix);

        let batch = batch_script_path(image_root, &launcher.name);
        fs::write(&batch, render_batch(launcher, runtime_executable))?;
        written.push(batch);
    }
    Ok(written)
}
