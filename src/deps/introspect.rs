//! Dependency introspectors.
//!
//! An introspector answers one question for one file: which shared libraries
//! does it ask the loader for, and where does each one live on this host?
//! The closure traversal treats it as a black box and calls it exactly once
//! per newly discovered node.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AssembleError, Result};
use crate::platform::PlatformDescriptor;
use crate::process::Cmd;
use crate::verify::{self, ElfIdentity};

/// One edge reported by an introspector.
///
/// An empty `path` means the library could not be located.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawDependency {
    pub identifier: String,
    #[serde(default)]
    pub path: PathBuf,
}

impl RawDependency {
    pub fn resolved(identifier: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            path: path.into(),
        }
    }

    pub fn unresolved(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            path: PathBuf::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }
}

pub trait Introspector: Send + Sync {
    /// Direct (not transitive) load-time dependencies of `path`.
    fn dependencies(&self, path: &Path) -> Result<Vec<RawDependency>>;
}

// =============================================================================
// readelf
// =============================================================================

/// Dynamic section entries we care about.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DynamicSection {
    pub needed: Vec<String>,
    pub runpath: Vec<String>,
}

/// Parse `readelf -d` output.
///
/// ```text
/// Dynamic section at offset 0x2d0e0 contains 28 entries:
///   Tag        Type                         Name/Value
///  0x0000000000000001 (NEEDED)             Shared library: [libtinfo.so.6]
///  0x000000000000001d (RUNPATH)            Library runpath: [$ORIGIN/../lib]
/// ```
pub fn parse_readelf_output(output: &str) -> DynamicSection {
    let mut section = DynamicSection::default();

    for line in output.lines() {
        let Some(value) = bracketed(line) else {
            continue;
        };
        if line.contains("(NEEDED)") {
            section.needed.push(value.to_string());
        } else if line.contains("(RUNPATH)") || line.contains("(RPATH)") {
            section
                .runpath
                .extend(value.split(':').filter(|p| !p.is_empty()).map(str::to_string));
        }
    }

    section
}

fn bracketed(line: &str) -> Option<&str> {
    let start = line.find('[')?;
    let end = line.rfind(']')?;
    (end > start).then(|| &line[start + 1..end])
}

/// Reads `DT_NEEDED` entries with `readelf -d` and resolves them against the
/// target's library directories under a sysroot. The program interpreter
/// (`PT_INTERP`) is reported as a dependency too, under its full requested
/// path, since the kernel loads it from exactly that path.
///
/// readelf reads the ELF headers directly without executing anything, so
/// this works for cross-compiled binaries (unlike `ldd`, which goes through
/// the host dynamic linker).
#[derive(Debug, Clone)]
pub struct ReadelfIntrospector {
    sysroot: PathBuf,
    /// Absolute target paths, searched under `sysroot` in order.
    search_dirs: Vec<PathBuf>,
    /// Candidates built for another machine are skipped, like the loader
    /// skips them.
    expected: ElfIdentity,
}

impl ReadelfIntrospector {
    /// Multiarch directories first, then the generic ones. `extra_dirs` are
    /// searched before all of them.
    pub fn for_platform(platform: &PlatformDescriptor, sysroot: &Path, extra_dirs: &[PathBuf]) -> Self {
        let multiarch = platform.multiarch();
        let mut search_dirs: Vec<PathBuf> = extra_dirs.to_vec();
        search_dirs.extend([
            PathBuf::from("/lib").join(&multiarch),
            PathBuf::from("/usr/lib").join(&multiarch),
        ]);
        if platform.architecture.is_64bit() {
            search_dirs.extend([PathBuf::from("/lib64"), PathBuf::from("/usr/lib64")]);
        }
        search_dirs.extend([PathBuf::from("/lib"), PathBuf::from("/usr/lib")]);
        Self {
            sysroot: sysroot.to_path_buf(),
            search_dirs,
            expected: ElfIdentity::expected_for(platform),
        }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    fn under_sysroot(&self, dir: &Path) -> PathBuf {
        match dir.strip_prefix("/") {
            Ok(rel) => self.sysroot.join(rel),
            Err(_) => self.sysroot.join(dir),
        }
    }

    /// Runpath entries as host directories. `$ORIGIN` already points at the
    /// host copy of the object; everything else is a target path.
    fn runpath_dirs(&self, object: &Path, runpath: &[String]) -> Vec<PathBuf> {
        let origin = object.parent().unwrap_or(Path::new("/"));
        runpath
            .iter()
            .map(|entry| {
                let origin_rel = entry
                    .strip_prefix("$ORIGIN")
                    .or_else(|| entry.strip_prefix("${ORIGIN}"));
                match origin_rel {
                    Some(rest) => origin.join(rest.trim_start_matches('/')),
                    None => self.under_sysroot(Path::new(entry)),
                }
            })
            .collect()
    }

    /// Find a library by soname in the runpath, then the search directories.
    ///
    /// The first candidate whose ELF header matches the target wins; a
    /// `/usr/lib/libz.so.1` built for another architecture is passed over.
    pub fn find_library(&self, name: &str, runpath_dirs: &[PathBuf]) -> Option<PathBuf> {
        runpath_dirs
            .iter()
            .cloned()
            .chain(self.search_dirs.iter().map(|d| self.under_sysroot(d)))
            .map(|dir| dir.join(name))
            .filter(|p| p.exists())
            .find(|p| self.matches_target(p))
    }

    fn matches_target(&self, candidate: &Path) -> bool {
        match verify::inspect(candidate) {
            Ok(Some(identity)) => identity == self.expected,
            Ok(None) => false,
            Err(e) => {
                eprintln!("  [WARN] Cannot read {}: {}", candidate.display(), e);
                false
            }
        }
    }

    /// The requested loader as a dependency. Its identifier is the full
    /// target path so no soname entry can replace it during planning.
    fn interpreter_dependency(&self, path: &Path) -> Result<Option<RawDependency>> {
        let Some(interp) = verify::interpreter(path)? else {
            return Ok(None);
        };
        let identifier = interp.to_string_lossy().into_owned();
        let on_host = self.under_sysroot(&interp);
        Ok(Some(if on_host.exists() {
            RawDependency::resolved(identifier, on_host)
        } else {
            RawDependency::unresolved(identifier)
        }))
    }
}

impl Introspector for ReadelfIntrospector {
    fn dependencies(&self, path: &Path) -> Result<Vec<RawDependency>> {
        let output = Cmd::new("readelf")
            .arg("-d")
            .arg_path(path)
            .error_msg("readelf failed - is binutils installed?")
            .run()
            .map_err(|e| AssembleError::Introspection {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        let section = parse_readelf_output(&output.stdout);
        let runpath_dirs = self.runpath_dirs(path, &section.runpath);

        let mut deps: Vec<RawDependency> = self.interpreter_dependency(path)?.into_iter().collect();
        deps.extend(section.needed.into_iter().map(|name| {
            if name.contains('/') {
                // The loader treats a NEEDED entry with a slash as a path.
                let identifier = Path::new(&name)
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                return RawDependency::resolved(identifier, name);
            }
            match self.find_library(&name, &runpath_dirs) {
                Some(found) => RawDependency::resolved(name, found),
                None => RawDependency::unresolved(name),
            }
        }));
        Ok(deps)
    }
}

// =============================================================================
// ldd
// =============================================================================

/// Parse `ldd` output.
///
/// `not found` entries come back unresolved; the vDSO is dropped because it
/// has no file behind it.
///
/// ```text
///     linux-vdso.so.1 (0x00007ffee9bfe000)
///     libc.so.6 => /lib64/libc.so.6 (0x00007f1234000000)
///     libfoo.so.1 => not found
///     /lib64/ld-linux-x86-64.so.2 (0x00007f1234500000)
/// ```
pub fn parse_ldd_output(output: &str) -> Vec<RawDependency> {
    let mut deps = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        if let Some((name, target)) = line.split_once("=>") {
            let name = name.trim();
            let target = target.trim();
            if name.is_empty() {
                continue;
            }
            if target.starts_with("not found") {
                deps.push(RawDependency::unresolved(name));
                continue;
            }
            match target.split_whitespace().next() {
                // Old glibc prints `linux-vdso.so.1 =>  (0x...)`.
                Some(path) if !path.starts_with('(') => {
                    deps.push(RawDependency::resolved(name, path));
                }
                _ => {}
            }
        } else if line.starts_with('/') {
            // The program interpreter. Keyed by its full path, which is what
            // the kernel opens.
            if let Some(path) = line.split_whitespace().next() {
                deps.push(RawDependency::resolved(path, path));
            }
        }
    }

    deps
}

/// Asks the host dynamic linker via `ldd`. Only valid for native builds.
#[derive(Debug, Clone, Default)]
pub struct LddIntrospector;

impl Introspector for LddIntrospector {
    fn dependencies(&self, path: &Path) -> Result<Vec<RawDependency>> {
        let output = Cmd::new("ldd")
            .arg_path(path)
            .allow_fail()
            .run()
            .map_err(|e| AssembleError::Introspection {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        let combined = format!("{}{}", output.stdout, output.stderr);
        if combined.contains("not a dynamic executable") || combined.contains("statically linked") {
            return Ok(Vec::new());
        }
        if !output.success() {
            return Err(AssembleError::Introspection {
                path: path.to_path_buf(),
                reason: format!("ldd exited with {}: {}", output.code(), output.stderr_trimmed()),
            });
        }

        Ok(parse_ldd_output(&output.stdout))
    }
}

// =============================================================================
// Precomputed manifest
// =============================================================================

/// A dependency graph computed elsewhere (typically inside the build
/// container) and handed over as JSON:
///
/// ```json
/// { "/app/server": [ { "identifier": "libssl.so.3", "path": "/usr/lib/libssl.so.3" } ] }
/// ```
///
/// Paths missing from the manifest have no dependencies.
#[derive(Debug, Clone, Default)]
pub struct ManifestIntrospector {
    edges: BTreeMap<PathBuf, Vec<RawDependency>>,
}

impl ManifestIntrospector {
    pub fn from_edges(edges: BTreeMap<PathBuf, Vec<RawDependency>>) -> Self {
        Self { edges }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let raw: BTreeMap<String, Vec<RawDependency>> = serde_json::from_str(json)?;
        Ok(Self::from_edges(
            raw.into_iter().map(|(k, v)| (PathBuf::from(k), v)).collect(),
        ))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| AssembleError::io(path, e))?;
        Self::from_json(&json).map_err(|e| AssembleError::Introspection {
            path: path.to_path_buf(),
            reason: format!("invalid dependency manifest: {}", e),
        })
    }
}

impl Introspector for ManifestIntrospector {
    fn dependencies(&self, path: &Path) -> Result<Vec<RawDependency>> {
        Ok(self.edges.get(path).cloned().unwrap_or_default())
    }
}
