//! Linux: `readelf` and `ldd` for discovery, `patchelf` for rewriting.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Platform, Relocator, RewriteReport};
use crate::analyze::{
    is_not_elf_error, parse_ldd_output, parse_readelf_output, ListedDependency, Listing,
    Resolution,
};
use crate::command::CommandRunner;
use crate::copy::BundleMapping;
use crate::exclude::LINUX_SYSTEM_LIBRARIES;
use crate::graph::DependencyGraph;
use crate::pipeline::RunMode;
use crate::verify::LoaderEnv;

/// Search-path token meaning "the directory this object was loaded from".
pub const ORIGIN: &str = "$ORIGIN";

#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxRelocator;

impl Relocator for LinuxRelocator {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn system_prefixes(&self) -> &'static [&'static str] {
        &["/lib", "/lib64", "/usr/lib", "/usr/lib64"]
    }

    fn system_libraries(&self) -> &'static [&'static str] {
        LINUX_SYSTEM_LIBRARIES
    }

    /// Direct dependencies come from the file's `NEEDED` entries
    /// (`readelf -d`). `ldd` prints the whole load-time closure, so it is
    /// only used to look up where each of those names resolves.
    ///
    /// `ldd` exits non-zero for static binaries and non-ELF files; those are
    /// leaves, not errors.
    fn list_dependencies(&self, runner: &dyn CommandRunner, file: &Path) -> Result<Listing> {
        let ldd = runner.run("ldd", &[file.as_os_str()])?;
        if !ldd.success() {
            debug!("ldd exited with {:?} for {}", ldd.code, file.display());
            return Ok(Listing::NotDynamic);
        }

        let readelf = runner.run("readelf", &[OsStr::new("-d"), file.as_os_str()])?;
        if !readelf.success() {
            if is_not_elf_error(&readelf.stderr) {
                return Ok(Listing::NotDynamic);
            }
            bail!(
                "readelf failed on {}: {}",
                file.display(),
                readelf.stderr.trim()
            );
        }

        let resolved: HashMap<String, Resolution> = parse_ldd_output(&ldd.stdout)
            .into_iter()
            .map(|dep| (dep.name, dep.resolution))
            .collect();

        let deps = parse_readelf_output(&readelf.stdout)
            .into_iter()
            .map(|name| {
                let resolution = match resolved.get(&name) {
                    Some(resolution) => resolution.clone(),
                    None if name.starts_with('/') => Resolution::Path(PathBuf::from(&name)),
                    None => Resolution::Unresolved,
                };
                ListedDependency { name, resolution }
            })
            .collect();
        Ok(Listing::Dependencies(deps))
    }

    fn rewrite(
        &self,
        runner: &dyn CommandRunner,
        graph: &DependencyGraph,
        bundle: &BundleMapping,
        mode: RunMode,
    ) -> Result<RewriteReport> {
        let mut report = RewriteReport::default();

        for (source, dest) in bundle.iter() {
            info!("  Fixing up {}...", dest.display());
            report.run(
                runner,
                mode,
                "patchelf",
                &[OsStr::new("--set-rpath"), OsStr::new(ORIGIN), dest.as_os_str()],
            )?;

            let Some(edges) = graph.dependencies(source) else {
                continue;
            };
            for (old_name, target) in edges {
                let Some(new_name) = bundle.destination(target).and_then(Path::file_name) else {
                    continue;
                };
                if OsStr::new(old_name) == new_name {
                    continue;
                }
                report.run(
                    runner,
                    mode,
                    "patchelf",
                    &[
                        OsStr::new("--replace-needed"),
                        OsStr::new(old_name),
                        new_name,
                        dest.as_os_str(),
                    ],
                )?;
            }
        }

        Ok(report)
    }

    fn loader_env(&self, bundle_dir: &Path) -> LoaderEnv {
        LoaderEnv::new()
            .with("LD_LIBRARY_PATH", bundle_dir)
            .with("LD_DEBUG", "libs")
    }
}
