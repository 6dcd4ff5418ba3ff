//! Test-loading the bundled primary artifact.

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::copy::BundleMapping;
use crate::pipeline::RunMode;

/// Environment overrides applied only while the verification load runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderEnv {
    vars: Vec<(String, OsString)>,
}

impl LoaderEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.vars.push((key.to_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn vars(&self) -> &[(String, OsString)] {
        &self.vars
    }

    /// Set every override; the returned guard puts the old values back.
    fn apply(&self) -> EnvGuard {
        let saved = self
            .vars
            .iter()
            .map(|(key, value)| {
                let previous = env::var_os(key);
                env::set_var(key, value);
                (key.clone(), previous)
            })
            .collect();
        EnvGuard { saved }
    }

    fn describe(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct EnvGuard {
    saved: Vec<(String, Option<OsString>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }
}

/// Outcome of the verification phase. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Dry run, or a platform without a loader check.
    Skipped,
    Loaded(PathBuf),
    /// The loader's own diagnostic.
    Failed(String),
}

impl Verification {
    pub fn is_failure(&self) -> bool {
        matches!(self, Verification::Failed(_))
    }
}

/// Load the bundled copy of `primary` with `loader_env` in effect.
pub fn verify_bundle(
    bundle: &BundleMapping,
    primary: &Path,
    mode: RunMode,
    loader_env: &LoaderEnv,
) -> Verification {
    let Some(target) = bundle.destination(primary) else {
        error!("VERIFICATION FAILED: Could not find primary artifact in the bundle map.");
        return Verification::Failed(format!(
            "{} is not part of the bundle",
            primary.display()
        ));
    };

    if mode.is_dry_run() {
        info!(
            "  Would set {} and test loading {} with dlopen.",
            loader_env.describe(),
            target.display()
        );
        return Verification::Skipped;
    }

    info!("  Attempting to dynamically load: {}", target.display());
    let result = {
        let _guard = loader_env.apply();
        load_library(target)
    };

    match result {
        Ok(()) => {
            info!("  Verification SUCCESS: Library loaded successfully.");
            Verification::Loaded(target.to_path_buf())
        }
        Err(message) => {
            error!("  VERIFICATION FAILED: dlopen reported an error: {}", message);
            Verification::Failed(message)
        }
    }
}

#[cfg(unix)]
fn load_library(path: &Path) -> Result<(), String> {
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;

    // SAFETY: `c_path` outlives the call, a non-null handle is closed exactly
    // once, and the dlerror string is copied before any other dl* call.
    unsafe {
        let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
        if handle.is_null() {
            let err = libc::dlerror();
            if err.is_null() {
                return Err(format!("dlopen failed for {}", path.display()));
            }
            return Err(CStr::from_ptr(err).to_string_lossy().into_owned());
        }
        libc::dlclose(handle);
    }
    Ok(())
}

#[cfg(not(unix))]
fn load_library(path: &Path) -> Result<(), String> {
    Err(format!(
        "dynamic load check is not supported on this platform: {}",
        path.display()
    ))
}
