//! End-to-end assembly: verify, closure, provenance, materialize.
//!
//! Each step must succeed before the next one starts. Nothing is written to
//! the output location until the binary has been verified and its full
//! closure planned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::deps::{ClosureAssembler, DuplicatePolicy, InstallMapping, Introspector};
use crate::error::{AssembleError, Result};
use crate::image::{self, ImageLayout, ImageRoot};
use crate::provenance::{self, BuildContext, ProvenanceGenerator};
use crate::timing::Timer;
use crate::verify::{self, BinaryArtifact, ElfIdentity};

/// Inputs of one assembly run.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub artifact: BinaryArtifact,
    /// Directory handed to the SBOM generator.
    pub context_dir: PathBuf,
    pub trust_roots: PathBuf,
    pub output_root: PathBuf,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct AssemblyReport {
    pub identity: ElfIdentity,
    pub mappings: Vec<InstallMapping>,
    pub root: ImageRoot,
}

pub struct Assembler {
    introspector: Arc<dyn Introspector>,
    generator: Box<dyn ProvenanceGenerator>,
    sysroot: PathBuf,
    duplicates: DuplicatePolicy,
    layout: ImageLayout,
    parallel: bool,
}

impl Assembler {
    pub fn new(introspector: Arc<dyn Introspector>, generator: Box<dyn ProvenanceGenerator>) -> Self {
        Self {
            introspector,
            generator,
            sysroot: PathBuf::from("/"),
            duplicates: DuplicatePolicy::default(),
            layout: ImageLayout::default(),
            parallel: false,
        }
    }

    pub fn sysroot(mut self, sysroot: &Path) -> Self {
        self.sysroot = sysroot.to_path_buf();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn layout(mut self, layout: ImageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Introspect each traversal frontier concurrently.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn assemble(&self, request: &AssemblyRequest) -> Result<AssemblyReport> {
        println!("=== Assembling image root ===");
        println!("  Binary: {}", request.artifact.path.display());
        println!("  Target: {}", request.artifact.declared_target);

        let timer = Timer::start("verify");
        let identity = verify::verify(&request.artifact)?;
        println!("  Verified: {}", identity);
        timer.finish();

        let timer = Timer::start("closure");
        let mappings = self.closure(&request.artifact)?;
        for mapping in &mappings {
            println!(
                "  {} -> {}",
                mapping.source.display(),
                mapping.destination.display()
            );
        }
        println!("  {} libraries", mappings.len());
        timer.finish();

        let timer = Timer::start("provenance");
        let context = BuildContext::new(&request.context_dir, &request.artifact.path);
        let provenance =
            provenance::record(self.generator.as_ref(), &context, &self.layout.provenance)?;
        println!("  SBOM: {} bytes", provenance.content.len());
        timer.finish();

        let timer = Timer::start("materialize");
        let root = image::materialize(
            &request.artifact,
            &mappings,
            &request.trust_roots,
            &provenance,
            &request.output_root,
            &self.layout,
        )?;
        timer.finish();

        println!("=== Image root complete ===");
        Ok(AssemblyReport {
            identity,
            mappings,
            root,
        })
    }

    fn closure(&self, artifact: &BinaryArtifact) -> Result<Vec<InstallMapping>> {
        let assembler = ClosureAssembler::new(Arc::clone(&self.introspector))
            .sysroot(&self.sysroot)
            .duplicate_policy(self.duplicates);

        if !self.parallel {
            return assembler.closure(artifact);
        }

        let rt = tokio::runtime::Runtime::new().map_err(|e| AssembleError::io(&artifact.path, e))?;
        rt.block_on(assembler.closure_concurrent(artifact))
    }
}
