//! Closure command - lists the install mappings of a binary's libraries.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;
use crate::deps::{self, ClosureAssembler};
use crate::verify::{self, BinaryArtifact};

pub struct ClosureArgs {
    pub platform: String,
    pub binary: PathBuf,
    pub deps_manifest: Option<PathBuf>,
    pub json: bool,
}

pub fn cmd_closure(config: &Config, args: ClosureArgs) -> Result<()> {
    let platform = super::parse_platform(&args.platform, None)?;
    let artifact = BinaryArtifact::new(&args.binary, platform);
    verify::verify(&artifact)?;

    let introspector = deps::introspector_for(config, &artifact.declared_target, args.deps_manifest.as_ref())?;
    let mappings = ClosureAssembler::new(introspector)
        .sysroot(&config.sysroot)
        .duplicate_policy(config.duplicates)
        .closure(&artifact)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&mappings)?);
    } else {
        for mapping in &mappings {
            println!(
                "{} {} -> {}",
                mapping.identifier,
                mapping.source.display(),
                mapping.destination.display()
            );
        }
    }
    Ok(())
}
