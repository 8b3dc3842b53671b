//! Tests that drive the `scratchroot` binary.

mod helpers;

use std::path::Path;
use std::process::{Command, Output};

use helpers::TestEnv;

fn scratchroot(cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_scratchroot"))
        .args(args)
        .current_dir(cwd)
        .env("SCRATCHROOT_LLVM_ROOT", "/opt/llvm")
        .env_remove("SCRATCHROOT_SYSROOT")
        .env_remove("SCRATCHROOT_OPT_LEVEL")
        .env_remove("SCRATCHROOT_LTO")
        .output()
        .expect("Failed to run scratchroot")
}

#[test]
fn test_toolchain_json_carries_tuning_everywhere() {
    let env = TestEnv::new();
    let output = scratchroot(
        env.base(),
        &[
            "toolchain",
            "--platform",
            "linux/arm64",
            "--cpu",
            "neoverse-n1",
            "--lto",
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["rust_target"], "aarch64-unknown-linux-gnu");
    assert_eq!(config["c_compiler_path"], "/opt/llvm/bin/clang");

    let contains = |group: &str, flag: &str| {
        config[group]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f.as_str() == Some(flag))
    };
    assert!(contains("c_flags", "-mcpu=neoverse-n1"));
    assert!(contains("cxx_flags", "-mcpu=neoverse-n1"));
    assert!(contains("linker_flags", "-mcpu=neoverse-n1"));
    assert!(contains("target_flags", "-Ctarget-cpu=neoverse-n1"));
    assert!(contains("target_flags", "-Clinker-plugin-lto"));
}

#[test]
fn test_toolchain_env_format() {
    let env = TestEnv::new();
    let output = scratchroot(env.base(), &["toolchain", "--platform", "linux/amd64"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("export CARGO_BUILD_TARGET='x86_64-unknown-linux-gnu'"));
    assert!(stdout.contains("export PKG_CONFIG_ALLOW_CROSS='1'"));
}

#[test]
fn test_invalid_platform_exits_nonzero() {
    let env = TestEnv::new();
    let output = scratchroot(env.base(), &["toolchain", "--platform", "windows/amd64"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid platform"));
}

#[test]
fn test_verify_rejects_wrong_architecture() {
    let env = TestEnv::new();
    let app = env.x86_64_binary("app");
    let app = app.to_str().unwrap();

    let ok = scratchroot(env.base(), &["verify", "--platform", "linux/amd64", "--binary", app]);
    assert!(ok.status.success());

    let wrong = scratchroot(env.base(), &["verify", "--platform", "linux/arm64", "--binary", app]);
    assert!(!wrong.status.success());
    assert!(String::from_utf8_lossy(&wrong.stderr).contains("was not built for"));
}

#[test]
fn test_env_file_is_read_from_working_directory() {
    let env = TestEnv::new();
    std::fs::write(env.base().join(".env"), "SCRATCHROOT_OPT_LEVEL=z\n").unwrap();

    let output = scratchroot(
        env.base(),
        &["toolchain", "--platform", "linux/amd64", "--format", "json"],
    );
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["target_flags"][0], "-Copt-level=z");
}

#[test]
fn test_assemble_has_no_cpu_flag() {
    let env = TestEnv::new();
    let app = env.x86_64_binary("app");
    let output = scratchroot(
        env.base(),
        &[
            "assemble",
            "--platform",
            "linux/amd64",
            "--cpu",
            "znver3",
            "--binary",
            app.to_str().unwrap(),
            "--output",
            "image",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--cpu"));
    assert!(!env.output.exists());
}

#[test]
fn test_toolchain_amd64_variant_tunes_all_groups() {
    let env = TestEnv::new();
    let output = scratchroot(
        env.base(),
        &["toolchain", "--platform", "linux/amd64/v3", "--format", "json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for group in ["c_flags", "cxx_flags", "linker_flags"] {
        assert!(config[group]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f.as_str() == Some("-march=x86-64-v3")));
    }
    assert!(config["target_flags"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f.as_str() == Some("-Ctarget-cpu=x86-64-v3")));
}
