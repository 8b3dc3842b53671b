//! Cross-build toolchain configuration.
//!
//! Produces one immutable [`ToolchainConfig`] per target. The external build
//! consumes it as environment assignments; nothing here mutates the process
//! environment.
//!
//! A single compiler family (clang + lld) is used for C, C++ and as the Rust
//! linker so that `-C linker-plugin-lto` can merge bitcode across languages.
//! For that to work the optimization and CPU tuning flags must agree in every
//! flag group, which is what [`ToolchainResolver::resolve`] guarantees.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::platform::{Libc, PlatformDescriptor};

/// Fully resolved compiler environment for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainConfig {
    /// Clang target, e.g. `aarch64-linux-gnu`.
    pub target_triple: String,
    /// Rust target, e.g. `aarch64-unknown-linux-gnu`.
    pub rust_target: String,
    pub c_compiler_path: PathBuf,
    pub cxx_compiler_path: PathBuf,
    pub linker_flags: Vec<String>,
    pub c_flags: Vec<String>,
    pub cxx_flags: Vec<String>,
    /// Primary-language (Rust) flags, i.e. the target's RUSTFLAGS.
    pub target_flags: Vec<String>,
    pub sysroot: PathBuf,
    pub pkg_config_search_root: PathBuf,
    /// pkg-config refuses to report flags for a non-host architecture unless
    /// `PKG_CONFIG_ALLOW_CROSS` is set. We always set it: the search root above
    /// already points into the target's library tree, so the reported flags
    /// are the target's, not the host's.
    pub pkg_config_cross_allowed: bool,
}

impl ToolchainConfig {
    /// Environment the external build step consumes, in a fixed order.
    pub fn env_assignments(&self) -> Vec<(String, String)> {
        let lower = self.rust_target.replace('-', "_");
        let upper = lower.to_uppercase();

        let mut rustflags = self.target_flags.clone();
        rustflags.extend(self.linker_flags.iter().map(|f| format!("-Clink-arg={}", f)));

        vec![
            ("CARGO_BUILD_TARGET".to_string(), self.rust_target.clone()),
            (
                format!("CC_{}", lower),
                self.c_compiler_path.display().to_string(),
            ),
            (
                format!("CXX_{}", lower),
                self.cxx_compiler_path.display().to_string(),
            ),
            (format!("CFLAGS_{}", lower), self.c_flags.join(" ")),
            (format!("CXXFLAGS_{}", lower), self.cxx_flags.join(" ")),
            (
                format!("CARGO_TARGET_{}_LINKER", upper),
                self.c_compiler_path.display().to_string(),
            ),
            (format!("CARGO_TARGET_{}_RUSTFLAGS", upper), rustflags.join(" ")),
            (
                "PKG_CONFIG_PATH".to_string(),
                self.pkg_config_search_root.display().to_string(),
            ),
            (
                "PKG_CONFIG_SYSROOT_DIR".to_string(),
                self.sysroot.display().to_string(),
            ),
            (
                "PKG_CONFIG_ALLOW_CROSS".to_string(),
                if self.pkg_config_cross_allowed { "1" } else { "0" }.to_string(),
            ),
        ]
    }

    /// Render `export KEY='value'` lines suitable for `eval` in a build script.
    pub fn render_env(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.env_assignments() {
            out.push_str(&format!("export {}='{}'\n", key, value.replace('\'', "'\\''")));
        }
        out
    }
}

/// Derives a [`ToolchainConfig`] from a platform.
#[derive(Debug, Clone)]
pub struct ToolchainResolver {
    c_compiler: PathBuf,
    cxx_compiler: PathBuf,
    sysroot: PathBuf,
    lto: bool,
    opt_level: String,
}

impl ToolchainResolver {
    /// Locate clang/clang++ under `llvm_root/bin`, or on PATH when no root is
    /// given. Lookup happens once, here, so `resolve` stays pure.
    pub fn locate(llvm_root: Option<&Path>, sysroot: &Path) -> Self {
        let find = |name: &str| match llvm_root {
            Some(root) => root.join("bin").join(name),
            None => which::which(name).unwrap_or_else(|_| PathBuf::from(name)),
        };
        Self::with_compilers(find("clang"), find("clang++"), sysroot)
    }

    pub fn with_compilers(c: impl Into<PathBuf>, cxx: impl Into<PathBuf>, sysroot: &Path) -> Self {
        Self {
            c_compiler: c.into(),
            cxx_compiler: cxx.into(),
            sysroot: sysroot.to_path_buf(),
            lto: false,
            opt_level: "3".to_string(),
        }
    }

    pub fn lto(mut self, enabled: bool) -> Self {
        self.lto = enabled;
        self
    }

    /// One of `0`..`3`, `s`, `z`. Shared by all flag groups.
    pub fn opt_level(mut self, level: &str) -> Self {
        self.opt_level = level.to_string();
        self
    }

    pub fn resolve(&self, platform: &PlatformDescriptor) -> ToolchainConfig {
        let target = platform.clang_target();
        let has_sysroot = self.sysroot != Path::new("/");

        // Flags shared verbatim by C and C++.
        let mut c_flags = vec![format!("--target={}", target)];
        if has_sysroot {
            c_flags.push(format!("--sysroot={}", self.sysroot.display()));
        }
        c_flags.push(format!("-O{}", self.opt_level));
        if self.lto {
            c_flags.push("-flto=thin".to_string());
        }

        let mut linker_flags = vec![format!("--target={}", target), "-fuse-ld=lld".to_string()];
        if has_sysroot {
            linker_flags.push(format!("--sysroot={}", self.sysroot.display()));
        }
        if self.lto {
            linker_flags.push("-flto=thin".to_string());
        }

        let mut target_flags = vec![format!("-Copt-level={}", self.opt_level)];
        if self.lto {
            target_flags.push("-Clinker-plugin-lto".to_string());
        }

        // Tuning goes into every group or none: mixing tuned and untuned
        // translation units under LTO produces miscompiled code.
        if let Some(cpu) = platform.tuning_cpu() {
            let native_flag = if platform.architecture.is_x86_family() {
                format!("-march={}", cpu)
            } else {
                format!("-mcpu={}", cpu)
            };
            c_flags.push(native_flag.clone());
            linker_flags.push(native_flag);
            target_flags.push(format!("-Ctarget-cpu={}", cpu));
        }

        let pkg_config_search_root = match platform.libc {
            Libc::Gnu => self
                .sysroot
                .join("usr/lib")
                .join(platform.multiarch())
                .join("pkgconfig"),
            Libc::Musl => self.sysroot.join("usr/lib/pkgconfig"),
        };

        ToolchainConfig {
            target_triple: target,
            rust_target: platform.rust_target(),
            c_compiler_path: self.c_compiler.clone(),
            cxx_compiler_path: self.cxx_compiler.clone(),
            linker_flags,
            cxx_flags: c_flags.clone(),
            c_flags,
            target_flags,
            sysroot: self.sysroot.clone(),
            pkg_config_search_root,
            pkg_config_cross_allowed: true,
        }
    }
}
