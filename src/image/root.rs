//! Write-once view of an image root on disk.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::deps::closure::normalize_absolute;
use crate::error::{AssembleError, Result};
use crate::hash;

/// One installed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    /// Host file it was copied from, or a label for generated content.
    pub source: PathBuf,
    /// Hex SHA256 of the installed content.
    pub digest: String,
}

/// Files installed under `root_directory`, keyed by absolute image path.
///
/// Every destination is written at most once. Installing different content
/// at a taken destination is a `PathCollision`; installing identical
/// content again is a no-op.
#[derive(Debug, Clone, Serialize)]
pub struct ImageRoot {
    root_directory: PathBuf,
    entries: BTreeMap<PathBuf, ImageEntry>,
}

impl ImageRoot {
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn entries(&self) -> &BTreeMap<PathBuf, ImageEntry> {
        &self.entries
    }

    /// Host path of an image destination.
    pub fn host_path(&self, destination: &Path) -> PathBuf {
        let normalized = normalize_absolute(destination);
        match normalized.strip_prefix("/") {
            Ok(relative) => self.root_directory.join(relative),
            Err(_) => self.root_directory.join(normalized),
        }
    }

    /// Copy `source` to `destination`. Symlinks are followed: the image gets
    /// the file content, not the link.
    pub fn install_file(&mut self, source: &Path, destination: &Path, mode: Option<u32>) -> Result<()> {
        let digest = hash::hash_file(source).map_err(|e| AssembleError::io(source, e))?;
        let destination = normalize_absolute(destination);
        if !self.claim(&destination, source, &digest)? {
            return Ok(());
        }

        let target = self.host_path(&destination);
        create_parent(&target)?;
        fs::copy(source, &target).map_err(|e| AssembleError::io(source, e))?;
        if let Some(mode) = mode {
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .map_err(|e| AssembleError::io(&target, e))?;
        }
        Ok(())
    }

    /// Write generated content. `label` is recorded as the entry's source.
    pub fn install_bytes(&mut self, content: &[u8], destination: &Path, label: &Path) -> Result<()> {
        let digest = hash::hash_bytes(content);
        let destination = normalize_absolute(destination);
        if !self.claim(&destination, label, &digest)? {
            return Ok(());
        }

        let target = self.host_path(&destination);
        create_parent(&target)?;
        fs::write(&target, content).map_err(|e| AssembleError::io(&target, e))?;
        Ok(())
    }

    /// Point the root at a new location after the tree was moved there.
    pub(crate) fn relocate(&mut self, root_directory: &Path) {
        self.root_directory = root_directory.to_path_buf();
    }

    /// Record a destination. Returns false if identical content is already
    /// there.
    fn claim(&mut self, destination: &Path, source: &Path, digest: &str) -> Result<bool> {
        if let Some(existing) = self.entries.get(destination) {
            if existing.digest == digest {
                return Ok(false);
            }
            return Err(AssembleError::PathCollision {
                destination: destination.to_path_buf(),
                existing: existing.source.clone(),
                incoming: source.to_path_buf(),
            });
        }
        self.entries.insert(
            destination.to_path_buf(),
            ImageEntry {
                source: source.to_path_buf(),
                digest: digest.to_string(),
            },
        );
        Ok(true)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AssembleError::io(parent, e))?;
    }
    Ok(())
}
