//! Toolchain command - prints the cross-build environment.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::toolchain::ToolchainResolver;

/// How the resolved configuration is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `export KEY='value'` lines for `eval`
    Env,
    Json,
}

pub struct ToolchainArgs {
    pub platform: String,
    pub cpu: Option<String>,
    pub lto: bool,
    pub opt_level: Option<String>,
    pub format: OutputFormat,
}

pub fn cmd_toolchain(config: &Config, args: ToolchainArgs) -> Result<()> {
    let platform = super::parse_platform(&args.platform, args.cpu)?;
    let opt_level = args.opt_level.as_deref().unwrap_or(&config.opt_level);
    if !["0", "1", "2", "3", "s", "z"].contains(&opt_level) {
        bail!("Invalid --opt-level '{}'", opt_level);
    }

    let resolved = ToolchainResolver::locate(config.llvm_root.as_deref(), &config.sysroot)
        .lto(args.lto || config.lto)
        .opt_level(opt_level)
        .resolve(&platform);

    match args.format {
        OutputFormat::Env => print!("{}", resolved.render_env()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resolved)?),
    }
    Ok(())
}
