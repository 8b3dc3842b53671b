//! Target platform parsing.
//!
//! Accepts both container platform strings (`linux/arm64`, `linux/arm/v7`)
//! and Rust/GNU target triples (`aarch64-unknown-linux-musl`) and normalizes
//! them into one descriptor, so `linux/arm64/v8` and `aarch64-unknown-linux-gnu`
//! compare equal.

use std::fmt;

use object::elf;
use serde::Serialize;

use crate::error::{AssembleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86_64,
    Aarch64,
    /// 32-bit hard-float ARM; the variant (`v6`/`v7`) picks the ISA level.
    Arm,
    I386,
    Riscv64,
    Ppc64le,
    S390x,
}

impl Architecture {
    fn from_container_name(name: &str) -> Option<Self> {
        match name {
            "amd64" | "x86_64" => Some(Self::X86_64),
            "arm64" | "aarch64" => Some(Self::Aarch64),
            "arm" => Some(Self::Arm),
            "386" | "i386" => Some(Self::I386),
            "riscv64" => Some(Self::Riscv64),
            "ppc64le" => Some(Self::Ppc64le),
            "s390x" => Some(Self::S390x),
            _ => None,
        }
    }

    /// Parse the architecture token of a target triple. Returns the implied
    /// variant for ARM triples.
    fn from_triple_token(token: &str) -> Option<(Self, Option<&'static str>)> {
        match token {
            "x86_64" => Some((Self::X86_64, None)),
            "aarch64" => Some((Self::Aarch64, None)),
            "armv7" => Some((Self::Arm, Some("v7"))),
            "arm" | "armv6" => Some((Self::Arm, Some("v6"))),
            "i386" | "i586" | "i686" => Some((Self::I386, None)),
            "riscv64" | "riscv64gc" => Some((Self::Riscv64, None)),
            "powerpc64le" => Some((Self::Ppc64le, None)),
            "s390x" => Some((Self::S390x, None)),
            _ => None,
        }
    }

    fn container_name(self) -> &'static str {
        match self {
            Self::X86_64 => "amd64",
            Self::Aarch64 => "arm64",
            Self::Arm => "arm",
            Self::I386 => "386",
            Self::Riscv64 => "riscv64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
        }
    }

    /// Normalize a container variant. Returns `Err` for variants the
    /// architecture does not have, `Ok(None)` for the baseline variant.
    fn normalize_variant(self, variant: Option<&str>) -> std::result::Result<Option<String>, String> {
        let allowed: &[&str] = match self {
            Self::X86_64 => &["v1", "v2", "v3", "v4"],
            Self::Aarch64 => &["v8"],
            Self::Arm => &["v6", "v7"],
            _ => &[],
        };
        match variant {
            None if self == Self::Arm => Ok(Some("v7".to_string())),
            None => Ok(None),
            Some(v) if !allowed.contains(&v) => Err(format!(
                "variant '{}' is not valid for {}",
                v,
                self.container_name()
            )),
            Some("v1") | Some("v8") => Ok(None),
            Some(v) => Ok(Some(v.to_string())),
        }
    }

    /// ELF `e_machine` value binaries for this architecture carry.
    pub fn elf_machine(self) -> u16 {
        match self {
            Self::X86_64 => elf::EM_X86_64,
            Self::Aarch64 => elf::EM_AARCH64,
            Self::Arm => elf::EM_ARM,
            Self::I386 => elf::EM_386,
            Self::Riscv64 => elf::EM_RISCV,
            Self::Ppc64le => elf::EM_PPC64,
            Self::S390x => elf::EM_S390,
        }
    }

    pub fn is_64bit(self) -> bool {
        !matches!(self, Self::Arm | Self::I386)
    }

    pub fn is_little_endian(self) -> bool {
        self != Self::S390x
    }

    /// x86 compilers take `-march` for CPU tuning, everything else `-mcpu`.
    pub fn is_x86_family(self) -> bool {
        matches!(self, Self::X86_64 | Self::I386)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Libc {
    Gnu,
    Musl,
}

impl Libc {
    fn as_str(self) -> &'static str {
        match self {
            Self::Gnu => "gnu",
            Self::Musl => "musl",
        }
    }
}

impl fmt::Display for Libc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized build target.
///
/// Immutable once constructed; the `with_*` methods return a new value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PlatformDescriptor {
    pub os: Os,
    pub architecture: Architecture,
    pub variant: Option<String>,
    pub libc: Libc,
    /// Passed through verbatim to flag generation; never validated here.
    pub cpu_tuning: Option<String>,
}

impl PlatformDescriptor {
    /// Parse a container platform (`os/arch[/variant]`) or a target triple
    /// (`arch-vendor-os[-env]`).
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AssembleError::invalid_platform(input, "empty platform"));
        }
        if input.contains('/') {
            Self::parse_container(input)
        } else {
            Self::parse_triple(input)
        }
    }

    fn parse_container(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('/').collect();
        if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(AssembleError::invalid_platform(
                input,
                "expected os/arch[/variant]",
            ));
        }

        let os = parse_os(input, parts[0])?;
        let architecture = Architecture::from_container_name(parts[1]).ok_or_else(|| {
            AssembleError::invalid_platform(input, format!("unknown architecture '{}'", parts[1]))
        })?;
        let variant = architecture
            .normalize_variant(parts.get(2).copied())
            .map_err(|reason| AssembleError::invalid_platform(input, reason))?;

        Ok(Self {
            os,
            architecture,
            variant,
            libc: Libc::Gnu,
            cpu_tuning: None,
        })
    }

    fn parse_triple(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('-').collect();
        if parts.len() < 2 || parts.len() > 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(AssembleError::invalid_platform(
                input,
                "expected arch-vendor-os[-env]",
            ));
        }

        let (architecture, implied_variant) = Architecture::from_triple_token(parts[0])
            .ok_or_else(|| {
                AssembleError::invalid_platform(
                    input,
                    format!("unknown architecture '{}'", parts[0]),
                )
            })?;

        // The vendor is optional: `aarch64-linux-gnu` and
        // `aarch64-unknown-linux-gnu` name the same target.
        let os_index = parts
            .iter()
            .skip(1)
            .position(|p| *p == "linux")
            .map(|i| i + 1)
            .ok_or_else(|| AssembleError::invalid_platform(input, "unsupported operating system"))?;
        if os_index > 2 {
            return Err(AssembleError::invalid_platform(input, "too many vendor segments"));
        }
        let os = parse_os(input, parts[os_index])?;

        let env = match &parts[os_index + 1..] {
            [] => None,
            [env] => Some(*env),
            _ => {
                return Err(AssembleError::invalid_platform(
                    input,
                    "trailing segments after environment",
                ))
            }
        };

        let libc = match (architecture, env) {
            (Architecture::Arm, None | Some("gnueabihf")) => Libc::Gnu,
            (Architecture::Arm, Some("musleabihf")) => Libc::Musl,
            (Architecture::Arm, Some(other)) => {
                return Err(AssembleError::invalid_platform(
                    input,
                    format!("arm targets require a hard-float environment, got '{}'", other),
                ))
            }
            (_, None | Some("gnu")) => Libc::Gnu,
            (_, Some("musl")) => Libc::Musl,
            (_, Some(other)) => {
                return Err(AssembleError::invalid_platform(
                    input,
                    format!("unknown environment '{}'", other),
                ))
            }
        };

        Ok(Self {
            os,
            architecture,
            variant: implied_variant.map(str::to_string),
            libc,
            cpu_tuning: None,
        })
    }

    pub fn with_cpu_tuning(mut self, cpu: Option<String>) -> Self {
        self.cpu_tuning = cpu.filter(|c| !c.is_empty());
        self
    }

    pub fn with_libc(mut self, libc: Libc) -> Self {
        self.libc = libc;
        self
    }

    /// CPU to tune for: the explicit tuning, else the x86-64 microarchitecture
    /// level implied by an `amd64` variant (`v3` is `x86-64-v3`).
    pub fn tuning_cpu(&self) -> Option<String> {
        if let Some(cpu) = &self.cpu_tuning {
            return Some(cpu.clone());
        }
        match (self.architecture, self.variant.as_deref()) {
            (Architecture::X86_64, Some(level)) => Some(format!("x86-64-{}", level)),
            _ => None,
        }
    }

    /// `linux/arm/v7`
    pub fn container_platform(&self) -> String {
        match &self.variant {
            Some(v) => format!("linux/{}/{}", self.architecture.container_name(), v),
            None => format!("linux/{}", self.architecture.container_name()),
        }
    }

    fn env_suffix(&self) -> String {
        match self.architecture {
            Architecture::Arm => format!("{}eabihf", self.libc.as_str()),
            _ => self.libc.as_str().to_string(),
        }
    }

    fn is_armv6(&self) -> bool {
        self.architecture == Architecture::Arm && self.variant.as_deref() == Some("v6")
    }

    /// `armv7-unknown-linux-gnueabihf`
    pub fn rust_target(&self) -> String {
        let arch = match self.architecture {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm if self.is_armv6() => "arm",
            Architecture::Arm => "armv7",
            Architecture::I386 => "i686",
            Architecture::Riscv64 => "riscv64gc",
            Architecture::Ppc64le => "powerpc64le",
            Architecture::S390x => "s390x",
        };
        format!("{}-unknown-linux-{}", arch, self.env_suffix())
    }

    /// `armv7-linux-gnueabihf`
    pub fn clang_target(&self) -> String {
        let arch = match self.architecture {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm if self.is_armv6() => "armv6",
            Architecture::Arm => "armv7",
            Architecture::I386 => "i686",
            Architecture::Riscv64 => "riscv64",
            Architecture::Ppc64le => "powerpc64le",
            Architecture::S390x => "s390x",
        };
        format!("{}-linux-{}", arch, self.env_suffix())
    }

    /// Debian multiarch tuple, e.g. `arm-linux-gnueabihf`.
    pub fn multiarch(&self) -> String {
        let arch = match self.architecture {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm => "arm",
            Architecture::I386 => "i386",
            Architecture::Riscv64 => "riscv64",
            Architecture::Ppc64le => "powerpc64le",
            Architecture::S390x => "s390x",
        };
        format!("{}-linux-{}", arch, self.env_suffix())
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.container_platform(), self.rust_target())?;
        if let Some(cpu) = &self.cpu_tuning {
            write!(f, " tuned for {}", cpu)?;
        }
        Ok(())
    }
}

fn parse_os(input: &str, token: &str) -> Result<Os> {
    match token {
        "linux" => Ok(Os::Linux),
        other => Err(AssembleError::invalid_platform(
            input,
            format!("unsupported operating system '{}'", other),
        )),
    }
}
