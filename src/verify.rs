//! Binary verification.
//!
//! Reads the ELF headers of a built artifact and checks machine, class,
//! byte order, loader and float ABI against the declared target. This gate runs before any
//! dependency discovery: an artifact built for the wrong architecture must
//! never reach the image root.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use object::elf::{self, FileHeader32, FileHeader64};
use object::read::elf::{FileHeader, ProgramHeader};
use object::{Endianness, FileKind};
use serde::Serialize;

use crate::error::{AssembleError, Result};
use crate::platform::{Architecture, Libc, PlatformDescriptor};

/// Largest ELF file header (64-bit).
const ELF_HEADER_LEN: u64 = 64;

const EF_ARM_EABIMASK: u32 = 0xff00_0000;
const EF_ARM_EABI_VER5: u32 = 0x0500_0000;
const EF_ARM_ABI_FLOAT_HARD: u32 = 0x0000_0400;

/// A compiled executable and the platform it claims to target.
#[derive(Debug, Clone)]
pub struct BinaryArtifact {
    pub path: PathBuf,
    pub declared_target: PlatformDescriptor,
}

impl BinaryArtifact {
    pub fn new(path: impl Into<PathBuf>, declared_target: PlatformDescriptor) -> Self {
        Self {
            path: path.into(),
            declared_target,
        }
    }
}

/// Machine markers read from an ELF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ElfIdentity {
    pub machine: u16,
    pub is_64bit: bool,
    pub little_endian: bool,
}

impl ElfIdentity {
    pub fn expected_for(platform: &PlatformDescriptor) -> Self {
        Self {
            machine: platform.architecture.elf_machine(),
            is_64bit: platform.architecture.is_64bit(),
            little_endian: platform.architecture.is_little_endian(),
        }
    }
}

impl fmt::Display for ElfIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-bit {}",
            machine_name(self.machine),
            if self.is_64bit { 64 } else { 32 },
            if self.little_endian { "LSB" } else { "MSB" }
        )
    }
}

fn machine_name(machine: u16) -> String {
    match machine {
        elf::EM_X86_64 => "x86-64".to_string(),
        elf::EM_AARCH64 => "AArch64".to_string(),
        elf::EM_ARM => "ARM".to_string(),
        elf::EM_386 => "Intel 80386".to_string(),
        elf::EM_RISCV => "RISC-V".to_string(),
        elf::EM_PPC64 => "PowerPC64".to_string(),
        elf::EM_S390 => "IBM S/390".to_string(),
        other => format!("machine {:#x}", other),
    }
}

/// What [`read_elf`] extracts beyond the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfDetails {
    pub identity: ElfIdentity,
    /// `e_flags`; carries the float ABI on ARM.
    pub flags: u32,
    /// `PT_INTERP`: the loader the kernel maps before the program runs.
    /// `None` for static executables and most shared libraries.
    pub interpreter: Option<PathBuf>,
}

/// Read the ELF identity of a file. Returns `Ok(None)` for non-ELF files.
///
/// Only the file header is read.
pub fn inspect(path: &Path) -> Result<Option<ElfIdentity>> {
    let mut header = Vec::with_capacity(ELF_HEADER_LEN as usize);
    File::open(path)
        .and_then(|f| f.take(ELF_HEADER_LEN).read_to_end(&mut header))
        .map_err(|e| AssembleError::io(path, e))?;
    Ok(parse_elf(&header).map(|details| details.identity))
}

/// Read the whole file, including the program headers.
pub fn read_elf(path: &Path) -> Result<Option<ElfDetails>> {
    let data = fs::read(path).map_err(|e| AssembleError::io(path, e))?;
    Ok(parse_elf(&data))
}

/// The program interpreter requested by `path`, if any.
pub fn interpreter(path: &Path) -> Result<Option<PathBuf>> {
    Ok(read_elf(path)?.and_then(|details| details.interpreter))
}

fn parse_elf(data: &[u8]) -> Option<ElfDetails> {
    match FileKind::parse(data) {
        Ok(FileKind::Elf64) => parse_header::<FileHeader64<Endianness>>(data, true),
        Ok(FileKind::Elf32) => parse_header::<FileHeader32<Endianness>>(data, false),
        _ => None,
    }
}

fn parse_header<H: FileHeader<Endian = Endianness>>(data: &[u8], is_64bit: bool) -> Option<ElfDetails> {
    let header = H::parse(data).ok()?;
    let endian = header.endian().ok()?;

    // A truncated read (header only) has no program headers; that is not an
    // error, there is just no interpreter to report.
    let interpreter = header
        .program_headers(endian, data)
        .ok()
        .and_then(|headers| {
            headers
                .iter()
                .find(|ph| ph.p_type(endian) == elf::PT_INTERP)
                .and_then(|ph| {
                    let offset: u64 = ph.p_offset(endian).into();
                    let size: u64 = ph.p_filesz(endian).into();
                    let start = usize::try_from(offset).ok()?;
                    let end = start.checked_add(usize::try_from(size).ok()?)?;
                    let bytes = data.get(start..end)?;
                    let bytes = bytes.split(|b| *b == 0).next().unwrap_or_default();
                    (!bytes.is_empty()).then(|| PathBuf::from(OsStr::from_bytes(bytes)))
                })
        });

    Some(ElfDetails {
        identity: ElfIdentity {
            machine: header.e_machine(endian),
            is_64bit,
            little_endian: endian == Endianness::Little,
        },
        flags: header.e_flags(endian),
        interpreter,
    })
}

/// The C library a loader belongs to, judged by its file name.
///
/// `ld-musl-x86_64.so.1` is musl; `ld-linux-*.so.*`, `ld-linux.so.*` and
/// `ld64.so.*` are glibc. Anything else is not classified.
pub fn loader_libc(interpreter: &Path) -> Option<Libc> {
    let name = interpreter.file_name()?.to_str()?;
    if name.starts_with("ld-musl-") {
        Some(Libc::Musl)
    } else if name.starts_with("ld-linux") || name.starts_with("ld64.so") {
        Some(Libc::Gnu)
    } else {
        None
    }
}

/// Fail with `TargetMismatch` unless the artifact's machine code matches its
/// declared target.
///
/// Beyond machine, class and byte order, a dynamically linked executable
/// must request the loader of the declared C library, and an EABI5 ARM
/// executable must use the hard-float calling convention every supported
/// ARM target declares.
pub fn verify(artifact: &BinaryArtifact) -> Result<ElfIdentity> {
    let target = &artifact.declared_target;
    let expected = ElfIdentity::expected_for(target);
    let mismatch = |found: String| AssembleError::TargetMismatch {
        path: artifact.path.clone(),
        expected: format!("{} ({})", target.rust_target(), expected),
        found,
    };

    let details = match read_elf(&artifact.path)? {
        None => return Err(mismatch("a non-ELF file".to_string())),
        Some(details) => details,
    };
    let found = details.identity;
    if found != expected {
        return Err(mismatch(found.to_string()));
    }

    if let Some(interp) = &details.interpreter {
        if let Some(libc) = loader_libc(interp) {
            if libc != target.libc {
                return Err(mismatch(format!(
                    "{} linked against {} (loader {})",
                    found,
                    libc,
                    interp.display()
                )));
            }
        }
    }

    if target.architecture == Architecture::Arm
        && details.flags & EF_ARM_EABIMASK == EF_ARM_EABI_VER5
        && details.flags & EF_ARM_ABI_FLOAT_HARD == 0
    {
        return Err(mismatch(format!("{} soft-float EABI5", found)));
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal little-endian ELF header with the given class and machine.
    fn elf_header(is_64: bool, machine: u16) -> Vec<u8> {
        let len = if is_64 { 64 } else { 52 };
        let mut h = vec![0u8; len];
        h[..4].copy_from_slice(&elf::ELFMAG);
        h[4] = if is_64 { elf::ELFCLASS64 } else { elf::ELFCLASS32 };
        h[5] = elf::ELFDATA2LSB;
        h[6] = elf::EV_CURRENT;
        h[16..18].copy_from_slice(&elf::ET_EXEC.to_le_bytes());
        h[18..20].copy_from_slice(&machine.to_le_bytes());
        h[20..24].copy_from_slice(&1u32.to_le_bytes());
        h
    }

    /// 64-bit little-endian executable with one `PT_INTERP` segment.
    fn elf_with_interpreter(machine: u16, interp: &str) -> Vec<u8> {
        let mut image = elf_header(true, machine);
        image[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        image[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        image[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let path_offset = 64u64 + 56;
        let path_len = interp.len() as u64 + 1;
        let mut phdr = vec![0u8; 56];
        phdr[0..4].copy_from_slice(&elf::PT_INTERP.to_le_bytes());
        phdr[8..16].copy_from_slice(&path_offset.to_le_bytes());
        phdr[32..40].copy_from_slice(&path_len.to_le_bytes());
        phdr[40..48].copy_from_slice(&path_len.to_le_bytes());
        image.extend_from_slice(&phdr);
        image.extend_from_slice(interp.as_bytes());
        image.push(0);
        image
    }

    /// 32-bit ARM header with the given `e_flags`.
    fn arm_header(flags: u32) -> Vec<u8> {
        let mut h = elf_header(false, elf::EM_ARM);
        h[36..40].copy_from_slice(&flags.to_le_bytes());
        h
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_matching_binary_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app", &elf_header(true, elf::EM_AARCH64));
        let artifact = BinaryArtifact::new(path, PlatformDescriptor::parse("linux/arm64").unwrap());
        let identity = verify(&artifact).unwrap();
        assert_eq!(identity.machine, elf::EM_AARCH64);
    }

    #[test]
    fn test_wrong_machine_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app", &elf_header(true, elf::EM_X86_64));
        let artifact = BinaryArtifact::new(path, PlatformDescriptor::parse("linux/arm64").unwrap());
        let err = verify(&artifact).unwrap_err();
        assert!(matches!(err, AssembleError::TargetMismatch { .. }));
        assert!(err.to_string().contains("x86-64"));
    }

    #[test]
    fn test_wrong_class_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app", &elf_header(false, elf::EM_X86_64));
        let artifact = BinaryArtifact::new(path, PlatformDescriptor::parse("linux/amd64").unwrap());
        assert!(matches!(
            verify(&artifact),
            Err(AssembleError::TargetMismatch { .. })
        ));
    }

    #[test]
    fn test_32bit_arm() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app", &elf_header(false, elf::EM_ARM));
        let artifact = BinaryArtifact::new(path, PlatformDescriptor::parse("linux/arm/v7").unwrap());
        assert!(verify(&artifact).is_ok());
    }

    #[test]
    fn test_non_elf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app.sh", b"#!/bin/sh\necho hi\n");
        assert_eq!(inspect(&path).unwrap(), None);
        let artifact = BinaryArtifact::new(path, PlatformDescriptor::parse("linux/amd64").unwrap());
        let err = verify(&artifact).unwrap_err();
        assert!(err.to_string().contains("non-ELF"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let artifact = BinaryArtifact::new(
            "/nonexistent_binary_12345",
            PlatformDescriptor::parse("linux/amd64").unwrap(),
        );
        assert!(matches!(verify(&artifact), Err(AssembleError::Io { .. })));
    }

    #[test]
    fn test_reads_program_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "app",
            &elf_with_interpreter(elf::EM_X86_64, "/lib64/ld-linux-x86-64.so.2"),
        );
        assert_eq!(
            interpreter(&path).unwrap(),
            Some(PathBuf::from("/lib64/ld-linux-x86-64.so.2"))
        );
        // The header-only read still identifies the file.
        assert_eq!(inspect(&path).unwrap().unwrap().machine, elf::EM_X86_64);

        let static_bin = write(dir.path(), "static", &elf_header(true, elf::EM_X86_64));
        assert_eq!(interpreter(&static_bin).unwrap(), None);
    }

    #[test]
    fn test_loader_libc() {
        assert_eq!(loader_libc(Path::new("/lib/ld-musl-aarch64.so.1")), Some(Libc::Musl));
        assert_eq!(loader_libc(Path::new("/lib64/ld-linux-x86-64.so.2")), Some(Libc::Gnu));
        assert_eq!(loader_libc(Path::new("/lib/ld-linux-armhf.so.3")), Some(Libc::Gnu));
        assert_eq!(loader_libc(Path::new("/lib64/ld64.so.2")), Some(Libc::Gnu));
        assert_eq!(loader_libc(Path::new("/opt/custom/loader")), None);
    }

    #[test]
    fn test_glibc_binary_declared_musl_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "app",
            &elf_with_interpreter(elf::EM_X86_64, "/lib64/ld-linux-x86-64.so.2"),
        );

        let gnu = PlatformDescriptor::parse("x86_64-unknown-linux-gnu").unwrap();
        assert!(verify(&BinaryArtifact::new(&path, gnu)).is_ok());

        let musl = PlatformDescriptor::parse("x86_64-unknown-linux-musl").unwrap();
        let err = verify(&BinaryArtifact::new(&path, musl)).unwrap_err();
        assert!(matches!(err, AssembleError::TargetMismatch { .. }));
        assert!(err.to_string().contains("ld-linux-x86-64.so.2"));
    }

    #[test]
    fn test_musl_binary_declared_gnu_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "app",
            &elf_with_interpreter(elf::EM_X86_64, "/lib/ld-musl-x86_64.so.1"),
        );
        let gnu = PlatformDescriptor::parse("linux/amd64").unwrap();
        assert!(matches!(
            verify(&BinaryArtifact::new(&path, gnu)),
            Err(AssembleError::TargetMismatch { .. })
        ));
    }

    #[test]
    fn test_static_binary_skips_libc_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app", &elf_header(true, elf::EM_X86_64));
        let musl = PlatformDescriptor::parse("x86_64-unknown-linux-musl").unwrap();
        assert!(verify(&BinaryArtifact::new(&path, musl)).is_ok());
    }

    #[test]
    fn test_arm_soft_float_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let platform = PlatformDescriptor::parse("linux/arm/v7").unwrap();

        let hard = write(dir.path(), "hard", &arm_header(EF_ARM_EABI_VER5 | EF_ARM_ABI_FLOAT_HARD));
        assert!(verify(&BinaryArtifact::new(&hard, platform.clone())).is_ok());

        let soft = write(dir.path(), "soft", &arm_header(EF_ARM_EABI_VER5 | 0x200));
        let err = verify(&BinaryArtifact::new(&soft, platform)).unwrap_err();
        assert!(err.to_string().contains("soft-float"));
    }
}
