//! Host tool availability checks.

use crate::config::{Config, IntrospectorKind};
use crate::process;

use super::types::CheckResult;

/// Check the tools this configuration will call.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let introspector = match config.introspector {
        IntrospectorKind::Readelf => ("readelf", "binutils", "Required for library dependency detection"),
        IntrospectorKind::Ldd => ("ldd", "libc-bin", "Required for native library dependency detection"),
    };

    let mut required_tools = vec![introspector];
    if let Some(program) = config.sbom_command.first() {
        required_tools.push((program.as_str(), program.as_str(), "Required to generate the SBOM"));
    }

    for (tool, package, purpose) in required_tools {
        results.push(check_tool_exists(config, tool, package, purpose, true));
    }

    let optional_tools = [
        ("clang", "clang", "Required by the external build step"),
        ("clang++", "clang", "Required by the external build step"),
        ("ld.lld", "lld", "Required when linking with -fuse-ld=lld"),
    ];

    for (tool, package, purpose) in optional_tools {
        results.push(check_tool_exists(config, tool, package, purpose, false));
    }

    if config.sbom_command.is_empty() {
        results.push(CheckResult::fail(
            "SBOM command",
            "SCRATCHROOT_SBOM_COMMAND is empty",
        ));
    }

    results
}

/// Compilers are looked up under `SCRATCHROOT_LLVM_ROOT/bin` first.
fn check_tool_exists(
    config: &Config,
    tool: &str,
    package: &str,
    purpose: &str,
    required: bool,
) -> CheckResult {
    if let Some(root) = &config.llvm_root {
        let candidate = root.join("bin").join(tool);
        if candidate.is_file() {
            return CheckResult::pass_with(tool, &candidate.display().to_string());
        }
    }

    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;

    #[test]
    fn test_missing_sbom_tool_fails() {
        let config = Config {
            sbom_command: vec!["nonexistent_sbom_tool_12345".to_string()],
            ..Config::default()
        };
        let results = check_host_tools(&config);
        let sbom = results
            .iter()
            .find(|c| c.name == "nonexistent_sbom_tool_12345")
            .unwrap();
        assert_eq!(sbom.status, CheckStatus::Fail);
    }

    #[test]
    fn test_introspector_tool_follows_config() {
        let config = Config {
            introspector: IntrospectorKind::Ldd,
            ..Config::default()
        };
        let names: Vec<String> = check_host_tools(&config).into_iter().map(|c| c.name).collect();
        assert!(names.contains(&"ldd".to_string()));
        assert!(!names.contains(&"readelf".to_string()));
    }

    #[test]
    fn test_llvm_root_is_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/ld.lld"), b"").unwrap();
        let config = Config {
            llvm_root: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let lld = check_host_tools(&config)
            .into_iter()
            .find(|c| c.name == "ld.lld")
            .unwrap();
        assert_eq!(lld.status, CheckStatus::Pass);
        assert!(lld.details.unwrap().starts_with(&dir.path().display().to_string()));
    }
}
