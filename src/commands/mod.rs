//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `toolchain` - Print the cross-build environment for a target
//! - `verify` - Check a binary against its declared target
//! - `closure` - List the shared-library closure of a binary
//! - `assemble` - Build a scratch image root
//! - `preflight` - Run preflight checks
//! - `show` - Display information

pub mod assemble;
pub mod closure;
mod preflight;
pub mod show;
pub mod toolchain;
mod verify;

pub use assemble::cmd_assemble;
pub use closure::cmd_closure;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use toolchain::cmd_toolchain;
pub use verify::cmd_verify;

use anyhow::{Context, Result};

use crate::platform::PlatformDescriptor;

/// Parse a `--platform` value, attaching the flag name to errors.
fn parse_platform(platform: &str, cpu: Option<String>) -> Result<PlatformDescriptor> {
    Ok(PlatformDescriptor::parse(platform)
        .context("Invalid --platform")?
        .with_cpu_tuning(cpu))
}
