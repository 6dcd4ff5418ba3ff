//! macOS: `otool -L` for discovery, `install_name_tool` for rewriting.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{Platform, Relocator, RewriteReport};
use crate::analyze::{parse_otool_output, Listing, Resolution};
use crate::command::CommandRunner;
use crate::copy::{add_owner_write, BundleMapping};
use crate::exclude::MACOS_SYSTEM_LIBRARIES;
use crate::graph::DependencyGraph;
use crate::pipeline::RunMode;
use crate::verify::LoaderEnv;

/// Install-name prefix meaning "next to the image doing the loading".
pub const LOADER_PATH: &str = "@loader_path";

#[derive(Debug, Default, Clone, Copy)]
pub struct MacosRelocator;

fn loader_relative(dest: &Path) -> String {
    let name = dest.file_name().unwrap_or_default().to_string_lossy();
    format!("{}/{}", LOADER_PATH, name)
}

impl Relocator for MacosRelocator {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn system_prefixes(&self) -> &'static [&'static str] {
        &["/usr/lib", "/System/Library"]
    }

    fn system_libraries(&self) -> &'static [&'static str] {
        MACOS_SYSTEM_LIBRARIES
    }

    /// Unlike `ldd`, a failing `otool` aborts the run.
    fn list_dependencies(&self, runner: &dyn CommandRunner, file: &Path) -> Result<Listing> {
        let output = runner.run("otool", &[OsStr::new("-L"), file.as_os_str()])?;
        if !output.success() {
            bail!(
                "otool failed for {}: {}",
                file.display(),
                output.stderr.trim()
            );
        }
        Ok(Listing::Dependencies(parse_otool_output(&output.stdout)))
    }

    /// Give each copy an `@loader_path` id, then point every reference to a
    /// bundled library at its bundled copy.
    ///
    /// References are read from the original file, since the copy is the one
    /// being edited.
    fn rewrite(
        &self,
        runner: &dyn CommandRunner,
        _graph: &DependencyGraph,
        bundle: &BundleMapping,
        mode: RunMode,
    ) -> Result<RewriteReport> {
        let mut report = RewriteReport::default();

        for (source, dest) in bundle.iter() {
            info!("  Fixing up {}...", dest.display());

            if mode.is_dry_run() {
                info!("    Would add owner write permission to {}", dest.display());
            } else {
                add_owner_write(dest)?;
            }
            let new_id = loader_relative(dest);
            report.run(
                runner,
                mode,
                "install_name_tool",
                &[OsStr::new("-id"), OsStr::new(&new_id), dest.as_os_str()],
            )?;

            let Listing::Dependencies(deps) = self.list_dependencies(runner, source)? else {
                continue;
            };
            for dep in deps {
                let Resolution::Path(old_path) = &dep.resolution else {
                    continue;
                };
                if !old_path.exists() {
                    continue;
                }
                let canonical = fs::canonicalize(old_path)
                    .with_context(|| format!("Failed to canonicalize {}", old_path.display()))?;
                if canonical == source {
                    continue;
                }
                let Some(dep_dest) = bundle.destination(&canonical) else {
                    continue;
                };
                let new_ref = loader_relative(dep_dest);
                report.run(
                    runner,
                    mode,
                    "install_name_tool",
                    &[
                        OsStr::new("-change"),
                        OsStr::new(&dep.name),
                        OsStr::new(&new_ref),
                        dest.as_os_str(),
                    ],
                )?;
            }
        }

        Ok(report)
    }

    fn loader_env(&self, _bundle_dir: &Path) -> LoaderEnv {
        LoaderEnv::new().with("DYLD_PRINT_LIBRARIES", "1")
    }
}
