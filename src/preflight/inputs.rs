//! Checks on configured input paths.

use crate::config::Config;

use super::types::CheckResult;

pub fn check_inputs(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if config.sysroot.as_os_str() == "/" {
        results.push(CheckResult::skip("Sysroot", "native build"));
    } else if config.sysroot.is_dir() {
        results.push(CheckResult::pass_with(
            "Sysroot",
            &config.sysroot.display().to_string(),
        ));
    } else {
        results.push(CheckResult::fail(
            "Sysroot",
            &format!("{} is not a directory", config.sysroot.display()),
        ));
    }

    for dir in &config.library_path {
        if !dir.is_dir() {
            results.push(CheckResult::warn(
                "Library path",
                &format!("{} does not exist", dir.display()),
            ));
        }
    }

    if config.trust_roots.exists() {
        results.push(CheckResult::pass_with(
            "Trust roots",
            &config.trust_roots.display().to_string(),
        ));
    } else {
        results.push(CheckResult::fail(
            "Trust roots",
            &format!(
                "{} not found. Set SCRATCHROOT_TRUST_ROOTS or install ca-certificates.",
                config.trust_roots.display()
            ),
        ));
    }

    results
}
