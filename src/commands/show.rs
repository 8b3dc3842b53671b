//! Show command - displays information.

use anyhow::Result;

use crate::config::Config;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show every naming of one platform
    Platform { platform: String },
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Platform { platform } => {
            let platform = super::parse_platform(&platform, None)?;
            println!("Platform: {}", platform.container_platform());
            println!("  Rust target:  {}", platform.rust_target());
            println!("  Clang target: {}", platform.clang_target());
            println!("  Multiarch:    {}", platform.multiarch());
        }
    }
    Ok(())
}
