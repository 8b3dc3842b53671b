//! scratchroot - minimal runtime image assembler.
//!
//! Takes a cross-compiled executable and produces the root filesystem of a
//! `FROM scratch` container image: the binary, its complete shared-library
//! closure, a trust-root bundle and an SBOM, and nothing else. Also resolves
//! the clang/lld cross-build environment the binary is compiled with.

pub mod commands;
pub mod config;
pub mod deps;
pub mod error;
pub mod hash;
pub mod image;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod provenance;
pub mod timing;
pub mod toolchain;
pub mod verify;

pub use error::{AssembleError, Result};
