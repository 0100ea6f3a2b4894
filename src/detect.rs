//! Cheap availability probes: manifest files and PATH lookups. Nothing here
//! spawns a process.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// True when a Cargo manifest sits at the target root.
pub fn is_rust_project(target: &Path) -> bool {
    target.join("Cargo.toml").is_file()
}

/// True when a package.json sits at the target root.
pub fn is_js_project(target: &Path) -> bool {
    target.join("package.json").is_file()
}

/// Walk up from `start` looking for a `.git` entry (directory or worktree file).
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Resolve `binary` against `PATH` without executing it.
pub fn find_on_path(binary: &str) -> Option<PathBuf> {
    find_in(binary, env::var_os("PATH")?.as_os_str())
}

/// Resolve `binary` against an explicit `PATH`-style directory list.
pub fn find_in(binary: &str, search_path: &OsStr) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    env::split_paths(search_path)
        .flat_map(|dir| executable_names(binary).into_iter().map(move |name| dir.join(name)))
        .find(|path| is_executable(path))
}

pub fn binary_on_path(binary: &str) -> bool {
    find_on_path(binary).is_some()
}

/// `binary_on_path`, or a lookup in `search_path` when one is given.
pub fn binary_available(binary: &str, search_path: Option<&OsStr>) -> bool {
    match search_path {
        Some(dirs) => find_in(binary, dirs).is_some(),
        None => binary_on_path(binary),
    }
}

#[cfg(windows)]
fn executable_names(binary: &str) -> Vec<String> {
    vec![binary.to_string(), format!("{binary}.exe"), format!("{binary}.cmd")]
}

#[cfg(not(windows))]
fn executable_names(binary: &str) -> Vec<String> {
    vec![binary.to_string()]
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
