//! # raster-locate
//!
//! Find a usable [Ghostscript](https://www.ghostscript.com/) executable for
//! page rasterisation, so the pipeline never has to know that it is called
//! `gs` on Unix and `gswin64c.exe` on Windows.
//!
//! ## Resolution order
//!
//! 1. `EDITION_RASTERIZER_PATH`: explicit path to an executable.
//! 2. Every directory on `PATH`, trying the platform's candidate names in order.
//! 3. Well-known install locations (`/opt/homebrew/bin`, `/usr/local/bin`,
//!    `C:\Program Files\gs\gs*\bin`, …).
//!
//! The first successful lookup is cached for the lifetime of the process.
//!
//! ## Platform support
//!
//! | OS      | Candidates                       |
//! |---------|----------------------------------|
//! | macOS   | `gs`                             |
//! | Linux   | `gs`                             |
//! | Windows | `gswin64c.exe`, `gswin32c.exe`   |

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

/// Environment variable that short-circuits discovery.
pub const ENV_OVERRIDE: &str = "EDITION_RASTERIZER_PATH";

#[derive(Error, Debug)]
pub enum LocateError {
    /// The override variable points at something that is not a file.
    #[error("{var} is set to '{path}', but no executable exists there")]
    OverrideMissing { var: &'static str, path: PathBuf },

    /// Nothing matched on PATH or in the fallback directories.
    #[error("Ghostscript not found (tried {tried:?} on PATH and {dirs} install directories)\nInstall ghostscript or set EDITION_RASTERIZER_PATH.")]
    NotFound { tried: Vec<&'static str>, dirs: usize },
}

/// Executable names to try, most preferred first.
pub fn candidate_names() -> &'static [&'static str] {
    if cfg!(windows) {
        &["gswin64c.exe", "gswin32c.exe", "gs.exe"]
    } else {
        &["gs"]
    }
}

/// Install directories searched after `PATH`.
fn fallback_dirs() -> Vec<PathBuf> {
    match std::env::consts::OS {
        "macos" => vec![
            PathBuf::from("/opt/homebrew/bin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/opt/local/bin"),
        ],
        "windows" => windows_install_dirs(),
        _ => vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")],
    }
}

/// `C:\Program Files\gs\gs<version>\bin`, newest version first.
fn windows_install_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for root in ["C:\\Program Files\\gs", "C:\\Program Files (x86)\\gs"] {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        let mut versions: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().join("bin"))
            .filter(|p| p.is_dir())
            .collect();
        versions.sort();
        versions.reverse();
        dirs.extend(versions);
    }
    dirs
}

static RESOLVED_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Locate the rasteriser executable, caching the first success.
pub fn locate_rasterizer() -> Result<PathBuf, LocateError> {
    if let Some(path) = RESOLVED_PATH.get() {
        return Ok(path.clone());
    }

    let path = resolve()?;
    let _ = RESOLVED_PATH.set(path.clone());
    Ok(path)
}

/// `true` when [`locate_rasterizer`] would succeed.
pub fn is_rasterizer_available() -> bool {
    locate_rasterizer().is_ok()
}

fn resolve() -> Result<PathBuf, LocateError> {
    if let Some(value) = std::env::var_os(ENV_OVERRIDE) {
        let p = PathBuf::from(value);
        if p.is_file() {
            return Ok(p);
        }
        return Err(LocateError::OverrideMissing {
            var: ENV_OVERRIDE,
            path: p,
        });
    }

    let names = candidate_names();
    if let Some(path_var) = std::env::var_os("PATH") {
        if let Some(found) = locate_in_path(&path_var, names) {
            return Ok(found);
        }
    }

    let dirs = fallback_dirs();
    locate_in_dirs(&dirs, names).ok_or_else(|| LocateError::NotFound {
        tried: names.to_vec(),
        dirs: dirs.len(),
    })
}

/// Search a `PATH`-style variable for the first matching executable name.
pub fn locate_in_path(path_var: &OsStr, names: &[&str]) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = std::env::split_paths(path_var).collect();
    locate_in_dirs(&dirs, names)
}

/// Names take priority over directories: `gswin64c` anywhere beats `gswin32c`.
pub fn locate_in_dirs(dirs: &[PathBuf], names: &[&str]) -> Option<PathBuf> {
    names.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
