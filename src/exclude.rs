//! Filename exclusion rules applied during dependency discovery.

use anyhow::{Context, Result};
use regex::Regex;
use std::cell::OnceCell;
use std::collections::HashSet;
use std::fmt;

/// Core glibc and loader libraries that every Linux system provides.
pub const LINUX_SYSTEM_LIBRARIES: &[&str] = &[
    "linux-vdso.so.1",
    "linux-gate.so.1",
    "ld-linux.so.2",
    "ld-linux-x86-64.so.2",
    "ld-linux-aarch64.so.1",
    "libc.so.6",
    "libm.so.6",
    "libdl.so.2",
    "librt.so.1",
    "libpthread.so.0",
    "libresolv.so.2",
    "libutil.so.1",
    "libgcc_s.so.1",
];

/// Libraries shipped with every macOS install.
pub const MACOS_SYSTEM_LIBRARIES: &[&str] = &[
    "libSystem.B.dylib",
    "libc++.1.dylib",
    "libc++abi.dylib",
    "libobjc.A.dylib",
];

/// Core Win32 DLLs.
pub const WINDOWS_SYSTEM_LIBRARIES: &[&str] = &[
    "kernel32.dll",
    "user32.dll",
    "gdi32.dll",
    "advapi32.dll",
    "shell32.dll",
    "ole32.dll",
    "ntdll.dll",
    "msvcrt.dll",
    "ws2_32.dll",
];

/// Why a filename was excluded. Used for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    System,
    Literal,
    Pattern(String),
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::System => write!(f, "system library"),
            ExclusionReason::Literal => write!(f, "user-excluded library"),
            ExclusionReason::Pattern(p) => write!(f, "user-excluded regex pattern '{}'", p),
        }
    }
}

struct Pattern {
    source: String,
    compiled: OnceCell<Result<Regex, regex::Error>>,
}

impl Pattern {
    /// Full-string match. Compiled on first use so a bad pattern only fails
    /// when something is actually tested against it.
    fn is_match(&self, filename: &str) -> Result<bool> {
        let compiled = self
            .compiled
            .get_or_init(|| Regex::new(&format!("^(?:{})$", self.source)));
        let re = compiled
            .as_ref()
            .map_err(Clone::clone)
            .with_context(|| format!("Invalid exclusion pattern '{}'", self.source))?;
        Ok(re.is_match(filename))
    }
}

/// Three-tier denylist: built-in system names, user literals, user regexes.
///
/// All tiers match the bare filename, never the directory part.
pub struct ExclusionPolicy {
    system: HashSet<String>,
    literals: HashSet<String>,
    patterns: Vec<Pattern>,
}

impl ExclusionPolicy {
    pub fn new<S, L, P>(system: S, literals: L, patterns: P) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        L: IntoIterator,
        L::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            system: system.into_iter().map(Into::into).collect(),
            literals: literals.into_iter().map(Into::into).collect(),
            patterns: patterns
                .into_iter()
                .map(|p| Pattern {
                    source: p.into(),
                    compiled: OnceCell::new(),
                })
                .collect(),
        }
    }

    /// Policy that excludes nothing.
    pub fn empty() -> Self {
        Self::new(
            Vec::<String>::new(),
            Vec::<String>::new(),
            Vec::<String>::new(),
        )
    }

    /// Return the first tier that excludes `filename`, if any.
    ///
    /// Tiers are checked system, literal, then patterns in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern reached during evaluation is not a
    /// valid regex.
    pub fn reason(&self, filename: &str) -> Result<Option<ExclusionReason>> {
        if self.system.contains(filename) {
            return Ok(Some(ExclusionReason::System));
        }
        if self.literals.contains(filename) {
            return Ok(Some(ExclusionReason::Literal));
        }
        for pattern in &self.patterns {
            if pattern.is_match(filename)? {
                return Ok(Some(ExclusionReason::Pattern(pattern.source.clone())));
            }
        }
        Ok(None)
    }

    pub fn is_excluded(&self, filename: &str) -> Result<bool> {
        Ok(self.reason(filename)?.is_some())
    }
}

impl fmt::Debug for ExclusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionPolicy")
            .field("system", &self.system.len())
            .field("literals", &self.literals)
            .field(
                "patterns",
                &self.patterns.iter().map(|p| &p.source).collect::<Vec<_>>(),
            )
            .finish()
    }
}
