//! Verify command - checks a binary's machine code against its target.

use anyhow::Result;
use std::path::Path;

use crate::verify::{self, BinaryArtifact};

pub fn cmd_verify(platform: &str, binary: &Path) -> Result<()> {
    let artifact = BinaryArtifact::new(binary, super::parse_platform(platform, None)?);
    let identity = verify::verify(&artifact)?;
    println!("{}: {} matches {}", binary.display(), identity, artifact.declared_target);
    Ok(())
}
