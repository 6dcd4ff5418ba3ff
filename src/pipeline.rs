//! Discover, copy, rewrite, verify.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::command::CommandRunner;
use crate::copy::{copy_bundle, BundleMapping, CopyStats};
use crate::exclude::ExclusionPolicy;
use crate::graph::{resolve_closure, DependencyGraph};
use crate::platform::{Relocator, RewriteReport};
use crate::verify::Verification;

/// Whether mutating phases act or only describe what they would do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Execute,
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else {
            RunMode::Execute
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == RunMode::DryRun
    }
}

/// User configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Directories searched for libraries the platform lister cannot find.
    pub search_paths: Vec<PathBuf>,
    /// Library filenames never bundled (exact match).
    pub exclude: Vec<String>,
    /// Regexes matched against the whole library filename.
    pub exclude_regex: Vec<String>,
    pub mode: RunMode,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub graph: DependencyGraph,
    pub bundle: BundleMapping,
    pub copy: CopyStats,
    pub rewrite: RewriteReport,
    pub verification: Verification,
}

/// One platform strategy plus the command runner it talks through.
pub struct Pipeline<'a> {
    relocator: &'a dyn Relocator,
    runner: &'a dyn CommandRunner,
    options: Options,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        relocator: &'a dyn Relocator,
        runner: &'a dyn CommandRunner,
        options: Options,
    ) -> Self {
        Self {
            relocator,
            runner,
            options,
        }
    }

    /// Bundle `input` and its dependency closure into `output_dir`.
    ///
    /// Phases run strictly in order. A failure partway through leaves
    /// whatever was already copied or rewritten in place.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `input` does not exist
    /// - `output_dir` does not exist (outside dry-run)
    /// - dependency listing fails hard, or an exclusion pattern is invalid
    /// - a file cannot be copied or a tool cannot be started
    ///
    /// Rewrite commands that exit non-zero and failed verification are
    /// reported in the [`RunReport`], not as errors.
    pub fn run(&self, input: &Path, output_dir: &Path) -> Result<RunReport> {
        let mode = self.options.mode;
        if !input.exists() {
            bail!("File does not exist: {}", input.display());
        }
        if !mode.is_dry_run() && !output_dir.is_dir() {
            bail!("Output directory does not exist: {}", output_dir.display());
        }

        info!("=== Starting {} Relocation ===", self.relocator.platform());

        let policy = ExclusionPolicy::new(
            self.relocator.system_libraries().iter().copied(),
            self.options.exclude.iter().cloned(),
            self.options.exclude_regex.iter().cloned(),
        );

        info!("Phase 1: Discovering all dependencies...");
        let graph = resolve_closure(
            input,
            self.relocator,
            self.runner,
            &policy,
            &self.options.search_paths,
        )?;

        info!(
            "Phase 2: {} dependencies to output directory...",
            if mode.is_dry_run() { "Planning to copy" } else { "Copying" }
        );
        let (bundle, copy) = copy_bundle(&graph, output_dir, mode)?;

        info!(
            "Phase 3: {} library paths for all bundled files...",
            if mode.is_dry_run() { "Planning to relocate" } else { "Relocating" }
        );
        let rewrite = self.relocator.rewrite(self.runner, &graph, &bundle, mode)?;

        info!(
            "Phase 4: {} bundled library...",
            if mode.is_dry_run() { "Planning to verify" } else { "Verifying" }
        );
        let verification = self.relocator.verify(&bundle, graph.root(), mode);

        Ok(RunReport {
            graph,
            bundle,
            copy,
            rewrite,
            verification,
        })
    }
}
