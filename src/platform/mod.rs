//! Platform strategies: how to list, rewrite and verify on each OS.
//!
//! The strategy is picked once at startup with [`Platform::current`].

mod linux;
mod macos;
mod windows;

pub use linux::LinuxRelocator;
pub use macos::MacosRelocator;
pub use windows::WindowsRelocator;

use anyhow::{bail, Result};
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::analyze::Listing;
use crate::command::{render_command, CommandRunner};
use crate::copy::BundleMapping;
use crate::graph::DependencyGraph;
use crate::pipeline::RunMode;
use crate::verify::{verify_bundle, LoaderEnv, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    ///
    /// # Errors
    ///
    /// Returns an error on any OS other than Linux, macOS or Windows.
    pub fn current() -> Result<Self> {
        if cfg!(target_os = "linux") {
            Ok(Platform::Linux)
        } else if cfg!(target_os = "macos") {
            Ok(Platform::MacOs)
        } else if cfg!(target_os = "windows") {
            Ok(Platform::Windows)
        } else {
            bail!("Unsupported platform: {}", std::env::consts::OS)
        }
    }

    pub fn relocator(self) -> Box<dyn Relocator> {
        match self {
            Platform::Linux => Box::new(LinuxRelocator),
            Platform::MacOs => Box::new(MacosRelocator),
            Platform::Windows => Box::new(WindowsRelocator),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "Linux"),
            Platform::MacOs => write!(f, "macOS"),
            Platform::Windows => write!(f, "Windows"),
        }
    }
}

/// Commands issued by a rewrite pass and the ones that exited non-zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub commands: Vec<String>,
    pub failures: Vec<String>,
}

impl RewriteReport {
    /// Describe, and outside dry-run execute, one rewrite command.
    ///
    /// A non-zero exit is logged and recorded but does not stop the pass.
    /// Failing to start the tool at all is an error.
    pub(crate) fn run(
        &mut self,
        runner: &dyn CommandRunner,
        mode: RunMode,
        program: &str,
        args: &[&OsStr],
    ) -> Result<()> {
        let line = render_command(program, args);
        info!("    {}", line);
        if !mode.is_dry_run() {
            let output = runner.run(program, args)?;
            if !output.success() {
                warn!(
                    "    command exited with {:?}: {}: {}",
                    output.code,
                    line,
                    output.stderr.trim()
                );
                self.failures.push(line.clone());
            }
        }
        self.commands.push(line);
        Ok(())
    }
}

/// One platform's way of discovering and rewriting linkage.
pub trait Relocator {
    fn platform(&self) -> Platform;

    /// OS-owned directories whose libraries are never bundled.
    fn system_prefixes(&self) -> &'static [&'static str];

    /// Built-in denylist of library filenames.
    fn system_libraries(&self) -> &'static [&'static str];

    /// List the libraries `file` references.
    fn list_dependencies(&self, runner: &dyn CommandRunner, file: &Path) -> Result<Listing>;

    /// Rewrite the bundled copies so they find each other relative to
    /// their own directory. Never touches the originals.
    fn rewrite(
        &self,
        runner: &dyn CommandRunner,
        graph: &DependencyGraph,
        bundle: &BundleMapping,
        mode: RunMode,
    ) -> Result<RewriteReport>;

    /// Loader settings used while test-loading the bundle.
    fn loader_env(&self, bundle_dir: &Path) -> LoaderEnv;

    /// Try to load the bundled copy of `primary`.
    fn verify(&self, bundle: &BundleMapping, primary: &Path, mode: RunMode) -> Verification {
        verify_bundle(bundle, primary, mode, &self.loader_env(bundle.output_dir()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::command::CommandOutput;

    #[test]
    fn test_current_platform() {
        let platform = Platform::current().unwrap();
        assert_eq!(platform.relocator().platform(), platform);
    }

    #[test]
    fn test_report_records_failure_and_continues() {
        let mut runner = ScriptedRunner::new();
        let args = [OsStr::new("--set-rpath"), OsStr::new("$ORIGIN"), OsStr::new("/out/x")];
        runner.respond("patchelf", &args, CommandOutput::failed(1, "cannot open"));

        let mut report = RewriteReport::default();
        report.run(&runner, RunMode::Execute, "patchelf", &args).unwrap();
        report
            .run(&runner, RunMode::Execute, "patchelf", &[OsStr::new("--version")])
            .unwrap();

        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.failures, vec!["patchelf --set-rpath '$ORIGIN' /out/x"]);
    }

    #[test]
    fn test_report_dry_run_runs_nothing() {
        let runner = ScriptedRunner::new();
        let mut report = RewriteReport::default();
        report
            .run(&runner, RunMode::DryRun, "install_name_tool", &[OsStr::new("-id")])
            .unwrap();
        assert!(runner.calls().is_empty());
        assert_eq!(report.commands, vec!["install_name_tool -id"]);
    }
}
