//! Library path searching and system-directory checks.

use std::path::{Path, PathBuf};

/// Whether `path` lives under one of the OS-owned `prefixes`.
///
/// Matching is component-wise: `/lib` covers `/lib/x86_64-linux-gnu/libc.so.6`
/// but not `/lib64/libc.so.6`.
pub fn is_system_path(path: &Path, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

/// Find a library by filename in caller-supplied search directories.
///
/// Directories are tried in order. Returns `None` if the library is not
/// found in any of them.
#[must_use = "found library path should be used"]
pub fn find_library(lib_name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let file_name = Path::new(lib_name).file_name()?;
    search_paths
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|p| p.exists())
}

/// Where `source` lands inside the bundle directory.
pub fn bundle_destination(output_dir: &Path, source: &Path) -> Option<PathBuf> {
    source.file_name().map(|name| output_dir.join(name))
}
