//! Error taxonomy for image assembly.
//!
//! Every variant is fatal. Nothing here is ever downgraded to a warning:
//! a partially assembled image is worse than a failed build.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the assembly components.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// The platform string could not be parsed or names an unsupported target.
    #[error("invalid platform '{input}': {reason}")]
    InvalidPlatformSpec { input: String, reason: String },

    /// The built artifact does not match the declared target.
    #[error("{} was not built for {expected} (found {found})", path.display())]
    TargetMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// A required library has no discoverable source path.
    #[error("'{}' requires missing library '{library}'", requested_by.display())]
    UnresolvedDependency {
        library: String,
        requested_by: PathBuf,
    },

    /// Two different sources compete for the same install path.
    #[error(
        "ambiguous install path {} for '{identifier}': {} vs {}",
        destination.display(),
        first.display(),
        second.display()
    )]
    AmbiguousInstallPath {
        identifier: String,
        destination: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },

    /// A destination already holds different content.
    #[error(
        "path collision at {}: {} differs from already installed {}",
        destination.display(),
        incoming.display(),
        existing.display()
    )]
    PathCollision {
        destination: PathBuf,
        existing: PathBuf,
        incoming: PathBuf,
    },

    /// The SBOM generator failed or produced nothing.
    #[error("provenance generation failed: {reason}")]
    ProvenanceGenerationFailed { reason: String },

    /// The dependency introspector could not inspect a file.
    #[error("failed to inspect {}: {reason}", path.display())]
    Introspection { path: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssembleError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_platform(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPlatformSpec {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = AssembleError> = std::result::Result<T, E>;
