//! Configuration management for scratchroot.
//!
//! Reads configuration from `.env` files and environment variables.
//! Environment variables take precedence over `.env` files. Values are
//! collected into a map and never written back into the process environment.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::deps::DuplicatePolicy;

/// Default SBOM generator invocation. `{context}` and `{binary}` are
/// substituted at run time.
pub const DEFAULT_SBOM_COMMAND: &str = "syft scan dir:{context} -o spdx-json";

/// Default host trust-root bundle.
pub const DEFAULT_TRUST_ROOTS: &str = "/etc/ssl/certs/ca-certificates.crt";

const OPT_LEVELS: &[&str] = &["0", "1", "2", "3", "s", "z"];

/// Which dependency introspector to use when no manifest is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntrospectorKind {
    /// `readelf -d` plus sysroot search; safe for cross builds.
    Readelf,
    /// Host dynamic linker; native builds only.
    Ldd,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Root of the target's library tree (`/` for native builds).
    pub sysroot: PathBuf,
    /// LLVM installation whose `bin/` holds clang; PATH lookup when unset.
    pub llvm_root: Option<PathBuf>,
    pub lto: bool,
    pub opt_level: String,
    pub introspector: IntrospectorKind,
    /// Extra target library directories searched before the defaults.
    pub library_path: Vec<PathBuf>,
    pub sbom_command: Vec<String>,
    pub trust_roots: PathBuf,
    pub duplicates: DuplicatePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysroot: PathBuf::from("/"),
            llvm_root: None,
            lto: false,
            opt_level: "3".to_string(),
            introspector: IntrospectorKind::Readelf,
            library_path: Vec::new(),
            sbom_command: DEFAULT_SBOM_COMMAND
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            trust_roots: PathBuf::from(DEFAULT_TRUST_ROOTS),
            duplicates: DuplicatePolicy::FirstSorted,
        }
    }
}

impl Config {
    /// Load configuration from `.env` files and the environment.
    ///
    /// Searches for `.env` in:
    /// 1. The user config directory (`~/.config/scratchroot/.env`)
    /// 2. `base_dir`
    ///
    /// Later sources override earlier ones; the environment overrides both.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let mut vars = HashMap::new();

        let mut env_files = Vec::new();
        if let Some(config_dir) = dirs::config_dir() {
            env_files.push(config_dir.join("scratchroot/.env"));
        }
        env_files.push(base_dir.join(".env"));

        for env_file in env_files.iter().filter(|p| p.exists()) {
            let entries = dotenvy::from_path_iter(env_file)
                .with_context(|| format!("Failed to read {}", env_file.display()))?;
            for entry in entries {
                let (key, value) =
                    entry.with_context(|| format!("Failed to parse {}", env_file.display()))?;
                vars.insert(key, value);
            }
        }

        vars.extend(std::env::vars());
        Self::from_vars(&vars)
    }

    /// Build a configuration from already collected variables.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(sysroot) = get("SCRATCHROOT_SYSROOT") {
            config.sysroot = PathBuf::from(sysroot);
            if !config.sysroot.is_absolute() {
                bail!("SCRATCHROOT_SYSROOT must be absolute, got '{}'", sysroot);
            }
        }

        config.llvm_root = get("SCRATCHROOT_LLVM_ROOT").map(PathBuf::from);

        if let Some(lto) = get("SCRATCHROOT_LTO") {
            config.lto = parse_bool(lto).with_context(|| "Invalid SCRATCHROOT_LTO")?;
        }

        if let Some(level) = get("SCRATCHROOT_OPT_LEVEL") {
            if !OPT_LEVELS.contains(&level) {
                bail!(
                    "Invalid SCRATCHROOT_OPT_LEVEL '{}' (expected one of {})",
                    level,
                    OPT_LEVELS.join(", ")
                );
            }
            config.opt_level = level.to_string();
        }

        if let Some(kind) = get("SCRATCHROOT_INTROSPECTOR") {
            config.introspector = match kind {
                "readelf" => IntrospectorKind::Readelf,
                "ldd" => IntrospectorKind::Ldd,
                other => bail!(
                    "Invalid SCRATCHROOT_INTROSPECTOR '{}' (expected readelf or ldd)",
                    other
                ),
            };
        }

        if let Some(paths) = get("SCRATCHROOT_LIBRARY_PATH") {
            config.library_path = paths
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        if let Some(command) = get("SCRATCHROOT_SBOM_COMMAND") {
            config.sbom_command = command.split_whitespace().map(str::to_string).collect();
        }

        if let Some(trust_roots) = get("SCRATCHROOT_TRUST_ROOTS") {
            config.trust_roots = PathBuf::from(trust_roots);
        }

        if let Some(policy) = get("SCRATCHROOT_DUPLICATES") {
            config.duplicates = policy
                .parse::<DuplicatePolicy>()
                .map_err(|e: String| anyhow::anyhow!("Invalid SCRATCHROOT_DUPLICATES: {}", e))?;
        }

        Ok(config)
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SCRATCHROOT_SYSROOT: {}", self.sysroot.display());
        match &self.llvm_root {
            Some(root) => println!("  SCRATCHROOT_LLVM_ROOT: {}", root.display()),
            None => println!("  SCRATCHROOT_LLVM_ROOT: (PATH lookup)"),
        }
        println!("  SCRATCHROOT_LTO: {}", self.lto);
        println!("  SCRATCHROOT_OPT_LEVEL: {}", self.opt_level);
        println!("  SCRATCHROOT_INTROSPECTOR: {:?}", self.introspector);
        let library_path: Vec<String> = self
            .library_path
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!("  SCRATCHROOT_LIBRARY_PATH: {}", library_path.join(":"));
        println!("  SCRATCHROOT_SBOM_COMMAND: {}", self.sbom_command.join(" "));
        println!("  SCRATCHROOT_TRUST_ROOTS: {}", self.trust_roots.display());
        println!("  SCRATCHROOT_DUPLICATES: {:?}", self.duplicates);
        if self.trust_roots.exists() {
            println!("  Trust roots: FOUND");
        } else {
            println!("  Trust roots: NOT FOUND");
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}
