//! Shared-library dependency discovery.

pub mod closure;
pub mod introspect;

use std::path::PathBuf;
use std::sync::Arc;

pub use closure::{ClosureAssembler, DependencyGraph, DuplicatePolicy, InstallMapping, LibraryReference};
pub use introspect::{
    Introspector, LddIntrospector, ManifestIntrospector, RawDependency, ReadelfIntrospector,
};

use crate::config::{Config, IntrospectorKind};
use crate::error::Result;
use crate::platform::PlatformDescriptor;

/// Pick the introspector for a build. A precomputed manifest wins over the
/// configured tool.
pub fn introspector_for(
    config: &Config,
    platform: &PlatformDescriptor,
    manifest: Option<&PathBuf>,
) -> Result<Arc<dyn Introspector>> {
    if let Some(path) = manifest {
        return Ok(Arc::new(ManifestIntrospector::load(path)?));
    }
    Ok(match config.introspector {
        IntrospectorKind::Readelf => Arc::new(ReadelfIntrospector::for_platform(
            platform,
            &config.sysroot,
            &config.library_path,
        )),
        IntrospectorKind::Ldd => Arc::new(LddIntrospector),
    })
}
