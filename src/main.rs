//! marshal - RISC-V workload builder.
//!
//! Builds boot binaries (Linux + bbl) and disk images for workloads described
//! in JSON, and launches them under QEMU or spike.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use marshal::binary::KernelBuilder;
use marshal::commands::{self, show::ShowTarget as ShowWhat, Target};
use marshal::config::Config;
use marshal::executor::BuildEnv;
use marshal::launch::{Emulator, Qemu, Spike};
use marshal::overlay::LoopMounter;

#[derive(Parser)]
#[command(name = "marshal")]
#[command(about = "Build and run boot code and disk images for RISC-V workloads")]
#[command(
    after_help = "QUICK START:\n  marshal -c br-disk.json build     Build a workload\n  marshal -c br-disk.json launch    Boot it in QEMU\n  marshal show graph                Show what needs rebuilding"
)]
struct Cli {
    /// Workload file (absolute, or relative to the workload directory)
    #[arg(short, long = "config", default_value = "br-disk.json")]
    config_file: PathBuf,

    /// Use a custom workload directory
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Print debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workload's binary and image, plus its jobs
    Build {
        /// Build only this job
        #[arg(short, long)]
        job: Option<String>,
        /// Also build the initramfs binary
        #[arg(short, long)]
        initramfs: bool,
    },

    /// Launch the workload (or one job) in an emulator
    Launch {
        /// Use the spike ISA simulator instead of QEMU
        #[arg(short, long)]
        spike: bool,
        /// Launch this job instead of the base workload
        #[arg(short, long)]
        job: Option<String>,
        /// Boot the initramfs binary
        #[arg(short, long)]
        initramfs: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: Option<ShowTarget>,
    },

    /// Remove the workload's outputs
    Clean {
        /// Clean only this job
        #[arg(short, long)]
        job: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show build graph with up-to-date status
    Graph,
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let cwd = std::env::current_dir()?;
    let mut config = Config::load(&cwd);
    if let Some(workdir) = &cli.workdir {
        config.workload_dir = cwd.join(workdir);
    }
    tracing::debug!(?config, "loaded configuration");

    let mounter = LoopMounter::new(&config.mount_point);
    let qemu = Qemu::default();
    let env = BuildEnv {
        config: &config,
        mounter: &mounter,
        emulator: &qemu,
        binaries: &KernelBuilder,
    };

    let target = |job: Option<String>, initramfs: bool| Target {
        cfg_file: cli.config_file.clone(),
        job,
        initramfs,
    };

    match cli.command {
        Commands::Build { job, initramfs } => {
            commands::cmd_build(env, &target(job, initramfs))?;
        }

        Commands::Launch {
            spike,
            job,
            initramfs,
        } => {
            let spike_emu = Spike::default();
            let emulator: &dyn Emulator = if spike { &spike_emu } else { &qemu };
            commands::cmd_launch(&config, emulator, &target(job, initramfs))?;
        }

        Commands::Show { what } => {
            let what = match what {
                None | Some(ShowTarget::Graph) => ShowWhat::Graph,
                Some(ShowTarget::Config) => ShowWhat::Config,
            };
            commands::cmd_show(env, what, &target(None, false))?;
        }

        Commands::Clean { job } => {
            commands::cmd_clean(&config, &target(job, false))?;
        }
    }

    Ok(())
}
