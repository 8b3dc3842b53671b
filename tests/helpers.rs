//! Shared test utilities for scratchroot tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use object::elf;
use scratchroot::error::Result;
use scratchroot::provenance::{BuildContext, ProvenanceGenerator};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test environment with a build directory, a target sysroot and an output
/// location inside one temporary directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Where the binary and any bare-name libraries live
    pub build_dir: PathBuf,
    /// Target library tree
    pub sysroot: PathBuf,
    /// Trust-root bundle
    pub certs: PathBuf,
    /// Image root to produce
    pub output: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let build_dir = base.join("build");
        let sysroot = base.join("sysroot");
        fs::create_dir_all(&build_dir).expect("Failed to create build dir");
        fs::create_dir_all(sysroot.join("usr/lib")).expect("Failed to create sysroot");

        let certs = base.join("ca-certificates.crt");
        fs::write(&certs, "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n")
            .expect("Failed to write certs");

        Self {
            output: base.join("image"),
            build_dir,
            sysroot,
            certs,
            _temp_dir: temp_dir,
        }
    }

    pub fn base(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Write an x86-64 executable header to `build/<name>`.
    pub fn x86_64_binary(&self, name: &str) -> PathBuf {
        let path = self.build_dir.join(name);
        fs::write(&path, elf_header(true, elf::EM_X86_64)).expect("Failed to write binary");
        path
    }

    /// Write a library under the sysroot. Content is unique per path.
    pub fn sysroot_lib(&self, relative: &str) -> PathBuf {
        let path = self.sysroot.join(relative);
        write_lib(&path)
    }

    /// Write a library next to the binary.
    pub fn build_lib(&self, name: &str) -> PathBuf {
        write_lib(&self.build_dir.join(name))
    }

    /// Write a dependency manifest and return its path.
    pub fn manifest(&self, json: serde_json::Value) -> PathBuf {
        let path = self.base().join("deps.json");
        fs::write(&path, serde_json::to_string_pretty(&json).unwrap())
            .expect("Failed to write manifest");
        path
    }
}

fn write_lib(path: &Path) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create lib dir");
    }
    let mut content = elf_header(true, elf::EM_X86_64);
    content.extend_from_slice(path.to_string_lossy().as_bytes());
    fs::write(path, content).expect("Failed to write lib");
    path.to_path_buf()
}

/// Minimal little-endian ELF header with the given class and machine.
pub fn elf_header(is_64: bool, machine: u16) -> Vec<u8> {
    let len = if is_64 { 64 } else { 52 };
    let mut h = vec![0u8; len];
    h[..4].copy_from_slice(&elf::ELFMAG);
    h[4] = if is_64 { elf::ELFCLASS64 } else { elf::ELFCLASS32 };
    h[5] = elf::ELFDATA2LSB;
    h[6] = elf::EV_CURRENT;
    h[16..18].copy_from_slice(&elf::ET_EXEC.to_le_bytes());
    h[18..20].copy_from_slice(&machine.to_le_bytes());
    h[20..24].copy_from_slice(&1u32.to_le_bytes());
    h
}

/// Every regular file under `root`, as absolute image paths.
pub fn image_files(root: &Path) -> BTreeSet<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.expect("Failed to walk image root"))
        .filter(|e| e.file_type().is_file())
        .map(|e| Path::new("/").join(e.path().strip_prefix(root).unwrap()))
        .collect()
}

/// SBOM generator returning a fixed document.
pub struct FixedSbom;

pub const FIXED_SBOM: &[u8] = b"{\"spdxVersion\":\"SPDX-2.3\",\"packages\":[]}";

impl ProvenanceGenerator for FixedSbom {
    fn generate(&self, _context: &BuildContext) -> Result<Vec<u8>> {
        Ok(FIXED_SBOM.to_vec())
    }
}

/// SBOM generator that must never be reached.
pub struct Unreachable;

impl ProvenanceGenerator for Unreachable {
    fn generate(&self, _context: &BuildContext) -> Result<Vec<u8>> {
        panic!("provenance generator reached after a failed step");
    }
}
