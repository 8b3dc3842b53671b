//! Provenance (SBOM) recording.
//!
//! The SBOM content itself comes from an external generator; this module
//! only invokes it and captures the document. Any failure is fatal: an
//! image without its provenance manifest is not published.

use std::path::{Path, PathBuf};

use crate::error::{AssembleError, Result};
use crate::process::Cmd;

/// What the generator is asked to describe.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Source tree the binary was built from.
    pub context_dir: PathBuf,
    pub binary: PathBuf,
}

impl BuildContext {
    pub fn new(context_dir: impl Into<PathBuf>, binary: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            binary: binary.into(),
        }
    }

    /// Both paths made absolute against the current directory.
    pub fn absolute(&self) -> Result<Self> {
        let absolute =
            |path: &Path| std::path::absolute(path).map_err(|e| AssembleError::io(path, e));
        Ok(Self {
            context_dir: absolute(&self.context_dir)?,
            binary: absolute(&self.binary)?,
        })
    }
}

/// Produces an SBOM document for a build context.
pub trait ProvenanceGenerator {
    fn generate(&self, context: &BuildContext) -> Result<Vec<u8>>;
}

/// Runs an external SBOM tool and captures its stdout.
///
/// `{context}` and `{binary}` inside any argument are replaced with the
/// build context directory and binary path.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn expand(&self, context: &BuildContext) -> Vec<String> {
        let context_dir = context.context_dir.to_string_lossy();
        let binary = context.binary.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{context}", &context_dir)
                    .replace("{binary}", &binary)
            })
            .collect()
    }
}

impl ProvenanceGenerator for CommandGenerator {
    fn generate(&self, context: &BuildContext) -> Result<Vec<u8>> {
        // The tool runs inside the context directory, where relative
        // placeholders would no longer point at the right place.
        let context = context.absolute()?;
        let argv = self.expand(&context);
        let Some((program, args)) = argv.split_first() else {
            return Err(AssembleError::ProvenanceGenerationFailed {
                reason: "no SBOM command configured".to_string(),
            });
        };

        let result = Cmd::new(program)
            .args(args)
            .dir(&context.context_dir)
            .error_msg(format!("SBOM generator '{}' failed", program))
            .run()
            .map_err(|e| AssembleError::ProvenanceGenerationFailed {
                reason: format!("{:#}", e),
            })?;

        Ok(result.stdout_bytes)
    }
}

/// SBOM document and where it goes in the image root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceArtifact {
    pub content: Vec<u8>,
    pub destination: PathBuf,
}

/// Run the generator once. Empty output counts as a failure.
pub fn record(
    generator: &dyn ProvenanceGenerator,
    context: &BuildContext,
    destination: &Path,
) -> Result<ProvenanceArtifact> {
    if !context.context_dir.is_dir() {
        return Err(AssembleError::ProvenanceGenerationFailed {
            reason: format!(
                "build context {} is not a directory",
                context.context_dir.display()
            ),
        });
    }

    let content = generator.generate(context)?;
    if content.iter().all(u8::is_ascii_whitespace) {
        return Err(AssembleError::ProvenanceGenerationFailed {
            reason: "generator produced no output".to_string(),
        });
    }

    Ok(ProvenanceArtifact {
        content,
        destination: destination.to_path_buf(),
    })
}
