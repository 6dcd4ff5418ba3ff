//! Make an executable or shared library self-contained.
//!
//! Walks the shared-library closure of the input with the platform's own
//! introspection tool (`ldd` on Linux, `otool -L` on macOS), copies every
//! non-system dependency next to it, and rewrites linkage (`patchelf`,
//! `install_name_tool`) so the bundle loads from its own directory.

mod analyze;
mod command;
mod copy;
mod exclude;
mod graph;
mod paths;
mod pipeline;
mod platform;
mod verify;

pub use analyze::{
    is_not_elf_error, parse_ldd_output, parse_otool_output, parse_readelf_output,
    ListedDependency, Listing, Resolution,
};
pub use command::{render_command, CommandOutput, CommandRunner, SystemRunner};
pub use copy::{add_owner_write, copy_bundle, BundleMapping, CopyStats};
pub use exclude::{
    ExclusionPolicy, ExclusionReason, LINUX_SYSTEM_LIBRARIES, MACOS_SYSTEM_LIBRARIES,
    WINDOWS_SYSTEM_LIBRARIES,
};
pub use graph::{resolve_closure, DependencyGraph, DiscoveryWarning};
pub use paths::{bundle_destination, find_library, is_system_path};
pub use pipeline::{Options, Pipeline, RunMode, RunReport};
pub use platform::{
    LinuxRelocator, MacosRelocator, Platform, Relocator, RewriteReport, WindowsRelocator,
};
pub use verify::{verify_bundle, LoaderEnv, Verification};
