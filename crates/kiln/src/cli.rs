use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kiln_core::StageKind;

/// Kiln: idempotent provisioning of the ROCm runtime and a llama.cpp build
#[derive(Parser, Debug)]
#[command(name = "kiln", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file (defaults to ./kiln.toml when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Installation root of the ROCm runtime
    #[arg(long, value_name = "PATH")]
    pub install_root: Option<PathBuf>,

    /// Working directory for sources, builds and caches
    #[arg(long, value_name = "PATH")]
    pub workspace: Option<PathBuf>,

    /// GPU architecture, e.g. gfx1151
    #[arg(long, value_name = "ID")]
    pub gpu_target: Option<String>,

    /// Never prompt
    #[arg(long)]
    pub non_interactive: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Prepare the host: directories and system packages
    Provision {
        #[arg(long)]
        force: bool,
    },
    /// Install the ROCm runtime tarball
    InstallRuntime {
        /// Archive URL or local path instead of the newest nightly
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        force: bool,
        /// Only check that the installed runtime works
        #[arg(long, conflicts_with = "configure_only")]
        verify_only: bool,
        /// Only rewrite the environment script and loader configuration
        #[arg(long)]
        configure_only: bool,
    },
    /// Build and install llama.cpp for the GPU target
    BuildArtifact {
        #[arg(long)]
        force: bool,
        /// Install the runtime first if the toolchain is incomplete
        #[arg(long)]
        install_toolchain: bool,
        /// Compile without installing
        #[arg(long, group = "build_mode")]
        build_only: bool,
        /// Install the outputs of a previous build
        #[arg(long, group = "build_mode")]
        install: bool,
        /// Start from an empty build directory
        #[arg(long, group = "build_mode")]
        clean: bool,
    },
    /// Smoke-test a binary against a model
    Validate {
        /// Binary to run (defaults to the first configured artifact binary)
        binary: Option<PathBuf>,
        /// Model file (defaults to the configured model)
        model: Option<PathBuf>,
    },
    /// Trim the runtime to what the artifact links against
    Package {
        /// Put the archived full runtime back
        #[arg(long, conflicts_with = "no_archive")]
        restore: bool,
        /// Delete the full runtime instead of archiving it
        #[arg(long)]
        no_archive: bool,
    },
    /// Run every stage in order
    Run {
        /// Skip the stages before this one without checking them
        #[arg(long, value_name = "STAGE")]
        from: Option<StageKind>,
        #[arg(long)]
        force: bool,
        /// Report what each stage would do
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the state of every stage
    Status,
    /// List available nightly runtime tarballs
    ListNightly {
        #[arg(short, long)]
        platform: Option<String>,
        #[arg(short, long)]
        target: Option<String>,
        #[arg(short, long, default_value_t = 5)]
        count: usize,
        /// Print only the URLs
        #[arg(short, long)]
        quiet: bool,
    },
}

impl Commands {
    pub fn force(&self) -> bool {
        match self {
            Commands::Provision { force }
            | Commands::InstallRuntime { force, .. }
            | Commands::BuildArtifact { force, .. }
            | Commands::Run { force, .. } => *force,
            _ => false,
        }
    }
}
