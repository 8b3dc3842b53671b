//! Assemble command - builds a scratch image root.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::Config;
use crate::deps;
use crate::pipeline::{Assembler, AssemblyRequest};
use crate::provenance::CommandGenerator;
use crate::verify::BinaryArtifact;

pub struct AssembleArgs {
    pub platform: String,
    pub binary: PathBuf,
    pub output: PathBuf,
    pub trust_roots: Option<PathBuf>,
    pub context: Option<PathBuf>,
    pub deps_manifest: Option<PathBuf>,
    pub parallel: bool,
}

pub fn cmd_assemble(config: &Config, args: AssembleArgs) -> Result<()> {
    let platform = super::parse_platform(&args.platform, None)?;
    // The SBOM generator runs inside the context directory.
    let context_dir = match args.context {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("Invalid build context {}", dir.display()))?,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let binary = std::path::absolute(&args.binary)
        .with_context(|| format!("Invalid binary path {}", args.binary.display()))?;

    let introspector = deps::introspector_for(config, &platform, args.deps_manifest.as_ref())?;
    let generator = CommandGenerator::new(config.sbom_command.clone());

    let assembler = Assembler::new(introspector, Box::new(generator))
        .sysroot(&config.sysroot)
        .duplicate_policy(config.duplicates)
        .parallel(args.parallel);

    let request = AssemblyRequest {
        artifact: BinaryArtifact::new(binary, platform),
        context_dir,
        trust_roots: args.trust_roots.unwrap_or_else(|| config.trust_roots.clone()),
        output_root: args.output.clone(),
    };

    assembler
        .assemble(&request)
        .with_context(|| format!("Failed to assemble {}", args.output.display()))?;
    Ok(())
}
