//! scratchroot - assemble minimal scratch image roots.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use scratchroot::commands::{self, assemble, closure, show, toolchain};
use scratchroot::config::Config;

#[derive(Parser)]
#[command(name = "scratchroot")]
#[command(about = "Minimal runtime image assembler")]
#[command(
    after_help = "QUICK START:\n  scratchroot preflight                              Check host tools\n  eval \"$(scratchroot toolchain --platform linux/arm64)\"  Configure the cross build\n  scratchroot assemble --platform linux/arm64 --binary target/app --output image"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cross-build environment for a target
    Toolchain {
        /// Target platform (linux/arm64, linux/amd64/v3, aarch64-unknown-linux-musl, ...)
        #[arg(long)]
        platform: String,
        /// CPU tuning (e.g. neoverse-n1, x86-64-v3)
        #[arg(long)]
        cpu: Option<String>,
        /// Enable cross-language thin LTO
        #[arg(long)]
        lto: bool,
        /// Optimization level (0-3, s, z; default from SCRATCHROOT_OPT_LEVEL)
        #[arg(long)]
        opt_level: Option<String>,
        #[arg(long, value_enum, default_value = "env")]
        format: Format,
    },

    /// Check that a binary was built for the declared platform
    Verify {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        binary: PathBuf,
    },

    /// List the shared-library closure of a binary
    Closure {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        binary: PathBuf,
        /// Precomputed dependency graph (JSON) instead of readelf/ldd
        #[arg(long)]
        deps_manifest: Option<PathBuf>,
        /// Print mappings as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assemble a scratch image root
    Assemble {
        #[arg(long)]
        platform: String,
        #[arg(long)]
        binary: PathBuf,
        /// Output directory (replaced only on success)
        #[arg(short, long)]
        output: PathBuf,
        /// Trust-root bundle (default from SCRATCHROOT_TRUST_ROOTS)
        #[arg(long)]
        trust_roots: Option<PathBuf>,
        /// Build context passed to the SBOM generator (default: current directory)
        #[arg(long)]
        context: Option<PathBuf>,
        /// Precomputed dependency graph (JSON) instead of readelf/ldd
        #[arg(long)]
        deps_manifest: Option<PathBuf>,
        /// Introspect dependencies concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Run preflight checks (verify host tools and inputs)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Env,
    Json,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show target names derived from a platform
    Platform {
        #[arg(long)]
        platform: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let base_dir = std::env::current_dir().context("Failed to determine current directory")?;
    let config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Toolchain {
            platform,
            cpu,
            lto,
            opt_level,
            format,
        } => {
            let format = match format {
                Format::Env => toolchain::OutputFormat::Env,
                Format::Json => toolchain::OutputFormat::Json,
            };
            commands::cmd_toolchain(
                &config,
                toolchain::ToolchainArgs {
                    platform,
                    cpu,
                    lto,
                    opt_level,
                    format,
                },
            )?;
        }

        Commands::Verify { platform, binary } => {
            commands::cmd_verify(&platform, &binary)?;
        }

        Commands::Closure {
            platform,
            binary,
            deps_manifest,
            json,
        } => {
            commands::cmd_closure(
                &config,
                closure::ClosureArgs {
                    platform,
                    binary,
                    deps_manifest,
                    json,
                },
            )?;
        }

        Commands::Assemble {
            platform,
            binary,
            output,
            trust_roots,
            context,
            deps_manifest,
            parallel,
        } => {
            commands::cmd_assemble(
                &config,
                assemble::AssembleArgs {
                    platform,
                    binary,
                    output,
                    trust_roots,
                    context,
                    deps_manifest,
                    parallel,
                },
            )?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => show::ShowTarget::Config,
                ShowTarget::Platform { platform } => show::ShowTarget::Platform { platform },
            };
            commands::cmd_show(show_target, &config)?;
        }
    }

    Ok(())
}
