//! Copying the dependency closure into the bundle directory.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::graph::DependencyGraph;
use crate::paths::bundle_destination;
use crate::pipeline::RunMode;

/// Original canonical path -> destination inside the bundle directory.
///
/// Destination filenames equal source filenames. Two sources with the same
/// filename map to the same destination and the last copy wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleMapping {
    output_dir: PathBuf,
    entries: BTreeMap<PathBuf, PathBuf>,
}

impl BundleMapping {
    pub(crate) fn new(output_dir: PathBuf, entries: BTreeMap<PathBuf, PathBuf>) -> Self {
        Self {
            output_dir,
            entries,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn destination(&self, source: &Path) -> Option<&Path> {
        self.entries.get(source).map(PathBuf::as_path)
    }

    /// `(source, destination)` pairs in source-path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .iter()
            .map(|(src, dst)| (src.as_path(), dst.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the copy phase actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub copied: usize,
    /// Destination already was the source file.
    pub skipped: usize,
}

/// Copy every node of `graph` into `output_dir`.
///
/// A destination that already is the source file (same canonical path) is
/// left alone, so re-running against a directory that holds the primary
/// artifact is a no-op for that file. In dry-run mode nothing is touched but
/// the mapping is still returned.
pub fn copy_bundle(
    graph: &DependencyGraph,
    output_dir: &Path,
    mode: RunMode,
) -> Result<(BundleMapping, CopyStats)> {
    let mut entries = BTreeMap::new();
    let mut stats = CopyStats::default();

    for source in graph.nodes() {
        let dest = bundle_destination(output_dir, source)
            .with_context(|| format!("Path has no file name: {}", source.display()))?;
        let name = dest.file_name().unwrap_or_default().to_string_lossy().into_owned();

        if mode.is_dry_run() {
            info!("  Would copy {} to {}", name, dest.display());
        } else if copy_file_to(source, &dest)? {
            info!("  Copying {} to {}", name, dest.display());
            stats.copied += 1;
        } else {
            info!("  Skipping copy for file already in destination: {}", name);
            stats.skipped += 1;
        }

        entries.insert(source.to_path_buf(), dest);
    }

    Ok((BundleMapping::new(output_dir.to_path_buf(), entries), stats))
}

/// Copy `source` to `dest`, replacing whatever is there.
///
/// Returns `Ok(false)` without copying if `dest` already resolves to `source`.
fn copy_file_to(source: &Path, dest: &Path) -> Result<bool> {
    if dest.exists() || dest.is_symlink() {
        match fs::canonicalize(dest) {
            Ok(existing) if existing == source => return Ok(false),
            Ok(_) => {}
            Err(_) => info!(
                "  Could not check equivalency for {}, will overwrite.",
                dest.display()
            ),
        }
        // an earlier bundle may have left a read-only copy behind
        fs::remove_file(dest)
            .with_context(|| format!("Failed to remove existing {}", dest.display()))?;
    }

    fs::copy(source, dest).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    Ok(true)
}

/// Add owner write permission (`u+w`).
///
/// Copies of libraries from read-only system locations keep their read-only
/// mode, which blocks in-place linkage edits.
pub fn add_owner_write(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .permissions();
    make_owner_writable(&mut perms);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn make_owner_writable(perms: &mut fs::Permissions) {
    perms.set_mode(perms.mode() | 0o200);
}

#[cfg(not(unix))]
fn make_owner_writable(perms: &mut fs::Permissions) {
    perms.set_readonly(false);
}
