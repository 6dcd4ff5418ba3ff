//! Integration tests for leviso-relocate.
//!
//! The Linux tests talk to the real `ldd` and `readelf`; the pipeline tests
//! use a scripted runner so they do not depend on `patchelf` being installed.

use leviso_relocate::{
    render_command, resolve_closure, CommandOutput, CommandRunner, ExclusionPolicy, Listing,
    LinuxRelocator, Options, Pipeline, Relocator, RunMode, SystemRunner, LINUX_SYSTEM_LIBRARIES,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(target_os = "linux")]
use std::process::Command;
use tempfile::TempDir;

#[derive(Default)]
struct Scripted {
    responses: HashMap<String, CommandOutput>,
    calls: RefCell<Vec<String>>,
}

impl Scripted {
    fn needed(&mut self, file: &Path, names: &[&str]) {
        let mut report = String::from("\nDynamic section at offset 0x2df0 contains 27 entries:\n");
        for name in names {
            report.push_str(&format!(
                " 0x0000000000000001 (NEEDED)             Shared library: [{}]\n",
                name
            ));
        }
        self.responses.insert(
            render_command("readelf", &[OsStr::new("-d"), file.as_os_str()]),
            CommandOutput::ok(report),
        );
    }

    fn ldd(&mut self, file: &Path, report: String) {
        self.responses.insert(
            render_command("ldd", &[file.as_os_str()]),
            CommandOutput::ok(report),
        );
    }

    fn calls_to(&self, program: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(program))
            .cloned()
            .collect()
    }
}

impl CommandRunner for Scripted {
    fn run(&self, program: &str, args: &[&OsStr]) -> anyhow::Result<CommandOutput> {
        let line = render_command(program, args);
        self.calls.borrow_mut().push(line.clone());
        Ok(self
            .responses
            .get(&line)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

fn canonical_file(path: &Path, bytes: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
    fs::canonicalize(path).unwrap()
}

#[cfg(target_os = "linux")]
fn tool_available(tool: &str) -> bool {
    Command::new(tool).arg("--version").output().is_ok()
}

#[cfg(target_os = "linux")]
#[test]
fn test_list_real_binary() {
    if !tool_available("readelf") {
        eprintln!("Skipping: readelf not installed");
        return;
    }
    // /bin/sh exists on all Linux systems and is dynamically linked
    let listing = LinuxRelocator
        .list_dependencies(&SystemRunner, Path::new("/bin/sh"))
        .unwrap();
    let Listing::Dependencies(deps) = listing else {
        panic!("expected /bin/sh to be dynamic");
    };
    assert!(
        deps.iter().any(|d| d.name.contains("libc")),
        "Expected libc dependency in /bin/sh, got: {:?}",
        deps
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_real_binary_closure_is_all_system() {
    if !tool_available("readelf") {
        eprintln!("Skipping: readelf not installed");
        return;
    }
    // everything /bin/sh needs lives in system directories
    let policy = ExclusionPolicy::new(
        LINUX_SYSTEM_LIBRARIES.iter().copied(),
        Vec::<String>::new(),
        Vec::<String>::new(),
    );
    let graph =
        resolve_closure(Path::new("/bin/sh"), &LinuxRelocator, &SystemRunner, &policy, &[])
            .unwrap();
    assert_eq!(graph.len(), 1);
    assert!(graph.dependencies(graph.root()).unwrap().is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_elf_file() {
    // /etc/passwd is a text file; ldd refuses it, which is not an error
    let listing = LinuxRelocator
        .list_dependencies(&SystemRunner, Path::new("/etc/passwd"))
        .unwrap();
    assert_eq!(listing, Listing::NotDynamic);
}

#[cfg(target_os = "linux")]
fn compile_shared(
    dir: &Path,
    soname: &str,
    source: &str,
    link: Option<(&Path, &str)>,
) -> PathBuf {
    let out_dir = dir.join(soname.trim_end_matches(".so"));
    fs::create_dir_all(&out_dir).unwrap();
    let src = out_dir.join("lib.c");
    fs::write(&src, source).unwrap();
    let output = out_dir.join(soname);

    let mut cmd = Command::new("cc");
    cmd.args(["-shared", "-fPIC"])
        .arg(format!("-Wl,-soname,{}", soname))
        .arg("-o")
        .arg(&output)
        .arg(&src);
    if let Some((lib_dir, lib)) = link {
        cmd.arg(format!("-L{}", lib_dir.display()))
            .arg(format!("-l:{}", lib))
            .arg(format!("-Wl,-rpath,{}", lib_dir.display()));
    }
    let status = cmd.status().unwrap();
    assert!(status.success(), "cc failed building {}", soname);
    fs::canonicalize(output).unwrap()
}

#[cfg(target_os = "linux")]
#[test]
fn test_regex_exclusion_prunes_real_subtree() {
    if !tool_available("cc") || !tool_available("readelf") {
        eprintln!("Skipping: cc or readelf not installed");
        return;
    }
    // libtop -> libx.debug.so -> libonlyviadebug.so; ldd on libtop lists all three
    let temp = TempDir::new().unwrap();
    let hidden = compile_shared(
        temp.path(),
        "libonlyviadebug.so",
        "int onlyviadebug(void) { return 42; }\n",
        None,
    );
    let debug = compile_shared(
        temp.path(),
        "libx.debug.so",
        "int onlyviadebug(void);\nint xdebug(void) { return onlyviadebug() + 1; }\n",
        Some((hidden.parent().unwrap(), "libonlyviadebug.so")),
    );
    let top = compile_shared(
        temp.path(),
        "libtop.so",
        "int xdebug(void);\nint top(void) { return xdebug() + 1; }\n",
        Some((debug.parent().unwrap(), "libx.debug.so")),
    );
    let policy = |patterns: &[&str]| {
        ExclusionPolicy::new(
            LINUX_SYSTEM_LIBRARIES.iter().copied(),
            Vec::<String>::new(),
            patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        )
    };

    let full = resolve_closure(&top, &LinuxRelocator, &SystemRunner, &policy(&[]), &[]).unwrap();
    assert_eq!(full.len(), 3);
    let top_edges: Vec<_> = full.dependencies(&top).unwrap().keys().cloned().collect();
    assert_eq!(top_edges, vec!["libx.debug.so"]);
    assert_eq!(
        full.dependencies(&debug).unwrap().get("libonlyviadebug.so"),
        Some(&hidden)
    );

    let pruned = resolve_closure(
        &top,
        &LinuxRelocator,
        &SystemRunner,
        &policy(&[r"lib.*\.debug\.so"]),
        &[],
    )
    .unwrap();
    assert_eq!(pruned.nodes().collect::<Vec<_>>(), vec![top.as_path()]);
    assert!(!pruned.contains(&hidden));
}

#[test]
fn test_nonexistent_binary() {
    let result = resolve_closure(
        Path::new("/nonexistent/path/to/binary"),
        &LinuxRelocator,
        &SystemRunner,
        &ExclusionPolicy::empty(),
        &[],
    );
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("does not exist"),
        "Expected 'does not exist' in error message, got: {}",
        err_msg
    );
}

#[test]
fn test_libfoo_bundle_end_to_end() {
    let temp = TempDir::new().unwrap();
    let foo = canonical_file(&temp.path().join("build/libfoo.so"), b"foo");
    let bar = canonical_file(&temp.path().join("vendor/lib/libbar.so.3.0.1"), b"bar");
    let out = temp.path().join("bundle");
    fs::create_dir_all(&out).unwrap();

    let mut runner = Scripted::default();
    runner.needed(&foo, &["libbar.so.3", "libc.so.6"]);
    runner.ldd(
        &foo,
        format!(
            "\tlinux-vdso.so.1 (0x00007ffd1000)\n\tlibbar.so.3 => {} (0x00007f001000)\n\tlibc.so.6 => /lib64/libc.so.6 (0x00007f002000)\n\t/lib64/ld-linux-x86-64.so.2 (0x00007f003000)\n",
            bar.display()
        ),
    );

    let report = Pipeline::new(&LinuxRelocator, &runner, Options::default())
        .run(&foo, &out)
        .unwrap();

    // two nodes, one edge keyed by the soname libfoo actually uses
    assert_eq!(report.graph.len(), 2);
    let edges = report.graph.dependencies(&foo).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges.get("libbar.so.3"), Some(&bar));

    let mut bundled: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    bundled.sort();
    assert_eq!(bundled, vec!["libbar.so.3.0.1", "libfoo.so"]);

    // libfoo now finds libbar through $ORIGIN by its bundled filename
    let foo_copy = out.join("libfoo.so");
    let patchelf = runner.calls_to("patchelf");
    assert!(patchelf.contains(&render_command(
        "patchelf",
        &[OsStr::new("--set-rpath"), OsStr::new("$ORIGIN"), foo_copy.as_os_str()],
    )));
    assert!(patchelf.contains(&render_command(
        "patchelf",
        &[
            OsStr::new("--replace-needed"),
            OsStr::new("libbar.so.3"),
            OsStr::new("libbar.so.3.0.1"),
            foo_copy.as_os_str(),
        ],
    )));
    assert!(report.rewrite.failures.is_empty());
}

#[test]
fn test_dry_run_never_writes() {
    let temp = TempDir::new().unwrap();
    let foo = canonical_file(&temp.path().join("build/libfoo.so"), b"foo");
    let bar = canonical_file(&temp.path().join("vendor/libbar.so"), b"bar");
    let out = temp.path().join("bundle");
    fs::create_dir_all(&out).unwrap();

    let mut runner = Scripted::default();
    runner.needed(&foo, &["libbar.so"]);
    runner.ldd(&foo, format!("\tlibbar.so => {} (0x1000)\n", bar.display()));

    let options = Options {
        mode: RunMode::DryRun,
        ..Options::default()
    };
    let report = Pipeline::new(&LinuxRelocator, &runner, options)
        .run(&foo, &out)
        .unwrap();

    assert_eq!(report.bundle.len(), 2);
    assert!(!report.rewrite.commands.is_empty());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    assert!(runner.calls_to("patchelf").is_empty());
}

#[test]
fn test_rerun_in_place_copies_nothing() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("app");
    let tool = canonical_file(&dir.join("tool"), b"tool");
    let lib = canonical_file(&dir.join("libapp.so"), b"lib");

    let mut runner = Scripted::default();
    runner.needed(&tool, &["libapp.so"]);
    runner.ldd(&tool, format!("\tlibapp.so => {} (0x1000)\n", lib.display()));

    let pipeline = Pipeline::new(&LinuxRelocator, &runner, Options::default());
    let first = pipeline.run(&tool, &dir).unwrap();
    let second = pipeline.run(&tool, &dir).unwrap();

    assert_eq!(first.copy.copied, 0);
    assert_eq!(second.copy.copied, 0);
    assert_eq!(second.copy.skipped, 2);
}
