//! Parsing linker-introspection reports (`ldd`, `readelf -d`, `otool -L`).

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Where a listed dependency points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The tool reported (or the name is) a filesystem path.
    Path(PathBuf),
    /// The tool could not locate the library.
    Unresolved,
    /// A loader-relative token (`@rpath/...`, `@loader_path/...`) that is not resolved here.
    LoaderRelative,
}

/// One library reference found in a binary's linkage metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDependency {
    /// The exact string the consumer uses to refer to the library.
    pub name: String,
    pub resolution: Resolution,
}

impl ListedDependency {
    /// Bare filename of the symbolic name, used for exclusion checks.
    pub fn filename(&self) -> &str {
        Path::new(&self.name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.name)
    }
}

/// Result of asking the platform which libraries a file references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// Not a dynamically linked artifact. Not an error, just nothing to follow.
    NotDynamic,
    Dependencies(Vec<ListedDependency>),
}

static LDD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<name>\S+)\s+=>\s+(?:(?P<missing>not found)|(?P<path>/.*?)(?:\s+\((?P<addr>0x[0-9a-fA-F]+)\))?)\s*$",
    )
    .expect("ldd line pattern is valid")
});

/// Parse `ldd` output into `name => path` entries.
///
/// `ldd` reports the whole load-time closure, not just the file's own
/// `NEEDED` entries, so this is only a name-to-path lookup table.
///
/// Example ldd output:
/// ```text
///         linux-vdso.so.1 (0x00007ffc8a5f2000)
///         libtinfo.so.6 => /lib64/libtinfo.so.6 (0x00007f0e0f000000)
///         libfoo.so.1 => not found
///         /lib64/ld-linux-x86-64.so.2 (0x00007f0e0f3a0000)
/// ```
///
/// Lines without `=>` (vdso, the interpreter) are not dependencies we can
/// relocate and are dropped.
pub fn parse_ldd_output(output: &str) -> Vec<ListedDependency> {
    output
        .lines()
        .filter_map(|line| LDD_LINE.captures(line))
        .map(|caps| {
            let resolution = match caps.name("path") {
                Some(path) => Resolution::Path(PathBuf::from(path.as_str())),
                None => Resolution::Unresolved,
            };
            ListedDependency {
                name: caps["name"].to_string(),
                resolution,
            }
        })
        .collect()
}

/// Parse readelf -d output to extract NEEDED library names.
///
/// These are a file's direct dependencies, spelled exactly as the linkage
/// metadata records them.
///
/// Example readelf output:
/// ```text
/// Dynamic section at offset 0x2d0e0 contains 28 entries:
///   Tag        Type                         Name/Value
///  0x0000000000000001 (NEEDED)             Shared library: [libtinfo.so.6]
///  0x0000000000000001 (NEEDED)             Shared library: [libc.so.6]
///  0x000000000000001d (RUNPATH)            Library runpath: [$ORIGIN]
/// ```
pub fn parse_readelf_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("(NEEDED)") && line.contains("Shared library:"))
        .filter_map(|line| {
            let start = line.find('[')?;
            let end = line.rfind(']')?;
            (start < end).then(|| line[start + 1..end].to_string())
        })
        .collect()
}

/// Whether readelf's stderr says the file simply is not a dynamic ELF object.
pub fn is_not_elf_error(stderr: &str) -> bool {
    stderr.contains("Not an ELF file")
        || stderr.contains("not a dynamic executable")
        || stderr.contains("File format not recognized")
}

/// Parse `otool -L` output.
///
/// The first line names the file itself and is skipped. Each remaining line
/// is an install name followed by a `(compatibility version ...)` suffix,
/// which is stripped.
///
/// ```text
/// /opt/app/lib/libfoo.dylib:
///         /opt/app/lib/libfoo.dylib (compatibility version 1.0.0, current version 1.0.0)
///         @rpath/libbar.dylib (compatibility version 2.0.0, current version 2.1.0)
///         /usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1311.0.0)
/// ```
pub fn parse_otool_output(output: &str) -> Vec<ListedDependency> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            let token = match line.find(" (") {
                Some(idx) => &line[..idx],
                None => line,
            };
            if token.is_empty() {
                return None;
            }
            let resolution = if token.starts_with('@') {
                Resolution::LoaderRelative
            } else {
                Resolution::Path(PathBuf::from(token))
            };
            Some(ListedDependency {
                name: token.to_string(),
                resolution,
            })
        })
        .collect()
}
