//! Image root materialization.
//!
//! Produces the filesystem tree of a scratch image: the binary, its library
//! closure, the trust-root bundle and the provenance manifest, and nothing
//! else.

pub mod materialize;
pub mod root;

use std::path::PathBuf;

use serde::Serialize;

pub use materialize::{materialize, work_dir};
pub use root::{ImageEntry, ImageRoot};

/// Fixed install paths inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageLayout {
    pub binary: PathBuf,
    pub trust_roots: PathBuf,
    pub provenance: PathBuf,
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/app"),
            trust_roots: PathBuf::from("/etc/ssl/certs/ca-certificates.crt"),
            provenance: PathBuf::from("/sbom.spdx.json"),
        }
    }
}
