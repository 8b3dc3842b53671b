//! Preflight checks for image assembly.
//!
//! Validates host tools and configured inputs before assembling.
//! Run with `scratchroot preflight` to check everything is ready.

mod host_tools;
mod inputs;
mod types;

use anyhow::{bail, Result};

use crate::config::Config;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(config));

    println!("Checking inputs...");
    checks.extend(inputs::check_inputs(config));

    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before assembling.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
