//! Windows: PE import analysis is not implemented yet.
//!
//! The strategy is still selectable so the pipeline runs end to end: the
//! primary artifact is bundled on its own and nothing is rewritten.

use anyhow::Result;
use std::path::Path;
use tracing::warn;

use super::{Platform, Relocator, RewriteReport};
use crate::analyze::Listing;
use crate::command::CommandRunner;
use crate::copy::BundleMapping;
use crate::exclude::WINDOWS_SYSTEM_LIBRARIES;
use crate::graph::DependencyGraph;
use crate::pipeline::RunMode;
use crate::verify::{LoaderEnv, Verification};

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsRelocator;

impl Relocator for WindowsRelocator {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn system_prefixes(&self) -> &'static [&'static str] {
        &["C:\\Windows"]
    }

    fn system_libraries(&self) -> &'static [&'static str] {
        WINDOWS_SYSTEM_LIBRARIES
    }

    fn list_dependencies(&self, _runner: &dyn CommandRunner, file: &Path) -> Result<Listing> {
        warn!(
            "PE dependency analysis is not implemented, bundling {} alone",
            file.display()
        );
        Ok(Listing::NotDynamic)
    }

    fn rewrite(
        &self,
        _runner: &dyn CommandRunner,
        _graph: &DependencyGraph,
        _bundle: &BundleMapping,
        _mode: RunMode,
    ) -> Result<RewriteReport> {
        // DLLs next to the executable are found without any rewriting.
        Ok(RewriteReport::default())
    }

    fn loader_env(&self, _bundle_dir: &Path) -> LoaderEnv {
        LoaderEnv::new()
    }

    fn verify(&self, _bundle: &BundleMapping, _primary: &Path, _mode: RunMode) -> Verification {
        Verification::Skipped
    }
}
