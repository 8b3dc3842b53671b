//! Build the image root in a work directory and publish it atomically.
//!
//! The tree is assembled in `<output>.work`. Only a complete tree is renamed
//! to `<output>`; on failure the work directory is removed and whatever was
//! at `<output>` before stays untouched. A previous output is moved aside to
//! `<output>.old` for the swap and deleted once the new tree is in place.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::root::ImageRoot;
use super::ImageLayout;
use crate::deps::InstallMapping;
use crate::error::{AssembleError, Result};
use crate::provenance::ProvenanceArtifact;
use crate::verify::BinaryArtifact;

const BINARY_MODE: u32 = 0o755;

/// Work directory used while `output_root` is being built.
pub fn work_dir(output_root: &Path) -> Result<PathBuf> {
    sibling(output_root, ".work")
}

/// Where the previous output waits while the new one is renamed in.
pub fn backup_dir(output_root: &Path) -> Result<PathBuf> {
    sibling(output_root, ".old")
}

fn sibling(output_root: &Path, suffix: &str) -> Result<PathBuf> {
    let Some(name) = output_root.file_name() else {
        return Err(AssembleError::io(
            output_root,
            io::Error::new(io::ErrorKind::InvalidInput, "output root must name a directory"),
        ));
    };
    let mut sibling_name = OsString::from(name);
    sibling_name.push(suffix);
    Ok(output_root.with_file_name(sibling_name))
}

/// Populate and publish the image root.
///
/// Relative mapping sources are resolved against the binary's directory.
pub fn materialize(
    binary: &BinaryArtifact,
    mappings: &[InstallMapping],
    trust_roots: &Path,
    provenance: &ProvenanceArtifact,
    output_root: &Path,
    layout: &ImageLayout,
) -> Result<ImageRoot> {
    let work = work_dir(output_root)?;

    remove_dir_if_present(&work)?;
    fs::create_dir_all(&work).map_err(|e| AssembleError::io(&work, e))?;

    let mut root = ImageRoot::new(&work);
    let populated = populate(&mut root, binary, mappings, trust_roots, provenance, layout);
    if let Err(e) = populated {
        let _ = fs::remove_dir_all(&work);
        return Err(e);
    }

    if let Err(e) = publish(&work, output_root) {
        let _ = fs::remove_dir_all(&work);
        return Err(e);
    }
    root.relocate(output_root);

    println!(
        "  Image root: {} ({} files)",
        output_root.display(),
        root.entries().len()
    );
    Ok(root)
}

fn populate(
    root: &mut ImageRoot,
    binary: &BinaryArtifact,
    mappings: &[InstallMapping],
    trust_roots: &Path,
    provenance: &ProvenanceArtifact,
    layout: &ImageLayout,
) -> Result<()> {
    root.install_file(&binary.path, &layout.binary, Some(BINARY_MODE))?;

    let base = binary.path.parent().unwrap_or_else(|| Path::new(""));
    for mapping in mappings {
        let source = if mapping.source.is_absolute() {
            mapping.source.clone()
        } else {
            base.join(&mapping.source)
        };
        root.install_file(&source, &mapping.destination, None)?;
    }

    install_trust_roots(root, trust_roots, &layout.trust_roots)?;

    root.install_bytes(
        &provenance.content,
        &provenance.destination,
        Path::new("<provenance>"),
    )?;

    Ok(())
}

/// A single bundle file is installed at `destination`; a directory of
/// certificates is installed under `destination`'s parent.
fn install_trust_roots(root: &mut ImageRoot, bundle: &Path, destination: &Path) -> Result<()> {
    let metadata = fs::metadata(bundle).map_err(|e| AssembleError::io(bundle, e))?;
    if !metadata.is_dir() {
        return root.install_file(bundle, destination, None);
    }

    let parent = destination.parent().unwrap_or_else(|| Path::new("/"));
    for entry in WalkDir::new(bundle).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(bundle).to_path_buf();
            AssembleError::io(path, io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(bundle).unwrap_or(entry.path());
        root.install_file(entry.path(), &parent.join(relative), None)?;
    }
    Ok(())
}

/// Swap a complete work tree into place.
///
/// There is always either the old or the new tree at `output_root`, except
/// for the instant between the two renames. If the second rename fails the
/// old tree is moved back.
fn publish(work: &Path, output_root: &Path) -> Result<()> {
    let backup = backup_dir(output_root)?;
    remove_dir_if_present(&backup)?;

    let had_previous = output_root.exists();
    if had_previous {
        fs::rename(output_root, &backup).map_err(|e| AssembleError::io(output_root, e))?;
    }

    if let Err(e) = fs::rename(work, output_root) {
        if had_previous {
            if let Err(restore) = fs::rename(&backup, output_root) {
                eprintln!(
                    "  [WARN] Could not restore {} from {}: {}",
                    output_root.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(AssembleError::io(output_root, e));
    }

    if had_previous {
        // The new tree is already published; a leftover backup is only disk.
        if let Err(e) = remove_dir_if_present(&backup) {
            eprintln!("  [WARN] {}", e);
        }
    }
    Ok(())
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AssembleError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformDescriptor;
    use std::os::unix::fs::PermissionsExt;

    struct Fixture {
        dir: tempfile::TempDir,
        binary: BinaryArtifact,
        certs: PathBuf,
        provenance: ProvenanceArtifact,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join("app"), b"\x7fELF app").unwrap();
        fs::write(build.join("libB.so"), b"libB").unwrap();
        let certs = dir.path().join("ca-certificates.crt");
        fs::write(&certs, b"-----BEGIN CERTIFICATE-----").unwrap();

        Fixture {
            binary: BinaryArtifact::new(
                build.join("app"),
                PlatformDescriptor::parse("linux/amd64").unwrap(),
            ),
            certs,
            provenance: ProvenanceArtifact {
                content: b"{\"spdxVersion\":\"SPDX-2.3\"}".to_vec(),
                destination: PathBuf::from("/sbom.spdx.json"),
            },
            dir,
        }
    }

    fn mapping(identifier: &str, source: &Path, destination: &str) -> InstallMapping {
        InstallMapping {
            identifier: identifier.to_string(),
            source: source.to_path_buf(),
            destination: PathBuf::from(destination),
        }
    }

    #[test]
    fn test_work_dir_name() {
        assert_eq!(
            work_dir(Path::new("/out/image")).unwrap(),
            PathBuf::from("/out/image.work")
        );
        assert!(work_dir(Path::new("/")).is_err());
    }

    #[test]
    fn test_publishes_layout() {
        let f = fixture();
        let output = f.dir.path().join("image");
        let mappings = vec![mapping("libB.so", Path::new("libB.so"), "/libB.so")];

        let root = materialize(
            &f.binary,
            &mappings,
            &f.certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap();

        assert_eq!(root.root_directory(), output);
        let paths: Vec<&Path> = root.entries().keys().map(PathBuf::as_path).collect();
        assert_eq!(
            paths,
            vec![
                Path::new("/app"),
                Path::new("/etc/ssl/certs/ca-certificates.crt"),
                Path::new("/libB.so"),
                Path::new("/sbom.spdx.json"),
            ]
        );
        assert_eq!(fs::read(output.join("libB.so")).unwrap(), b"libB");
        let mode = fs::metadata(output.join("app")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!f.dir.path().join("image.work").exists());
    }

    #[test]
    fn test_collision_publishes_nothing() {
        let f = fixture();
        let output = f.dir.path().join("image");
        let other = f.dir.path().join("other-libc.so");
        fs::write(&other, b"different").unwrap();

        // The binary and a library both claim /app with different content.
        let mappings = vec![mapping("app", &other, "/app")];
        let err = materialize(
            &f.binary,
            &mappings,
            &f.certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap_err();

        assert!(matches!(err, AssembleError::PathCollision { .. }));
        assert!(!output.exists());
        assert!(!f.dir.path().join("image.work").exists());
    }

    #[test]
    fn test_failure_keeps_previous_output() {
        let f = fixture();
        let output = f.dir.path().join("image");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("marker"), b"previous build").unwrap();

        let mappings = vec![mapping("libgone.so", Path::new("/nonexistent_lib_12345.so"), "/lib/libgone.so")];
        assert!(materialize(
            &f.binary,
            &mappings,
            &f.certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .is_err());

        assert_eq!(fs::read(output.join("marker")).unwrap(), b"previous build");
    }

    #[test]
    fn test_success_replaces_previous_output() {
        let f = fixture();
        let output = f.dir.path().join("image");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("stale"), b"old").unwrap();

        materialize(
            &f.binary,
            &[],
            &f.certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap();

        assert!(!output.join("stale").exists());
        assert!(output.join("app").exists());
    }

    #[test]
    fn test_swap_leaves_no_backup_behind() {
        let f = fixture();
        let output = f.dir.path().join("image");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("stale"), b"old").unwrap();
        // Left by an interrupted earlier run.
        let backup = backup_dir(&output).unwrap();
        fs::create_dir_all(&backup).unwrap();
        fs::write(backup.join("older"), b"older").unwrap();

        materialize(
            &f.binary,
            &[],
            &f.certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap();

        assert_eq!(backup, f.dir.path().join("image.old"));
        assert!(!backup.exists());
        assert!(!output.join("stale").exists());
        assert!(output.join("app").exists());
    }

    #[test]
    fn test_failed_swap_restores_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("image");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("marker"), b"previous build").unwrap();

        // Renaming a missing work tree fails after the old output moved aside.
        let err = publish(&dir.path().join("image.work"), &output).unwrap_err();
        assert!(matches!(err, AssembleError::Io { .. }));
        assert_eq!(fs::read(output.join("marker")).unwrap(), b"previous build");
        assert!(!dir.path().join("image.old").exists());
    }

    #[test]
    fn test_certificate_directory() {
        let f = fixture();
        let certs = f.dir.path().join("certs");
        fs::create_dir_all(certs.join("nested")).unwrap();
        fs::write(certs.join("a.pem"), b"A").unwrap();
        fs::write(certs.join("nested/b.pem"), b"B").unwrap();
        let output = f.dir.path().join("image");

        let root = materialize(
            &f.binary,
            &[],
            &certs,
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap();

        assert!(root.entries().contains_key(Path::new("/etc/ssl/certs/a.pem")));
        assert_eq!(fs::read(output.join("etc/ssl/certs/nested/b.pem")).unwrap(), b"B");
    }

    #[test]
    fn test_missing_trust_roots() {
        let f = fixture();
        let output = f.dir.path().join("image");
        let err = materialize(
            &f.binary,
            &[],
            Path::new("/nonexistent_bundle_12345.crt"),
            &f.provenance,
            &output,
            &ImageLayout::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AssembleError::Io { .. }));
        assert!(!output.exists());
    }
}
