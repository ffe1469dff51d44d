//! `rbvault`: the CLI surface of spec.md §6. A thin shell over
//! [`rbvault::runtime`] — each subcommand maps to one handler function
//! there, the way the teacher's `proxmox-backup-manager` binary
//! dispatches named subcommands to small handler functions (see
//! DESIGN.md). Declarative parsing is `clap` (derive API) rather than
//! the teacher's `proxmox-router` macro system, which is wired into
//! PBS's own REST API registry and has no bearing on a standalone
//! binary with no HTTP surface of its own.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rbvault_config::Config;
use rbvault_types::ImageId;

/// Incremental RBD snapshot backups from live Ceph/Proxmox clusters to
/// a dedicated backup cluster.
#[derive(Parser)]
#[command(name = "rbvault", version, about)]
struct Cli {
    /// Path to the configuration document (spec.md §6 "Environment").
    #[arg(short, long, default_value = "/etc/rbvault/rbvault.json")]
    config: PathBuf,

    /// Suppress the live progress view; accounting still runs to
    /// completion (the "machine/debug mode" of spec.md §4.9).
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run Producer + Consumers, then both Expirer phases.
    Backup,
    /// Freshness verification; reconcile results store; then `check`.
    Precheck,
    /// Deep checksum verification; reconcile results store; then `check`.
    CheckSnap,
    /// Report stored failures older than 2h.
    Check,
    /// Print a summary of the backup cluster.
    Stats,
    /// List restorable images, or the snapshots of one image.
    Ls {
        image: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List currently-mounted restore sessions.
    #[command(name = "list-mapped")]
    ListMapped {
        #[arg(long)]
        json: bool,
    },
    /// Mount a snapshot for restore.
    Map { image: String, snap: String },
    /// Unmount a previously mapped snapshot.
    Unmap { image: String, snap: String },
}

fn init_logging(config: &Config) {
    let level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rbvault: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match run(&config, cli.command, cli.quiet).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, command: Commands, quiet: bool) -> Result<i32> {
    match command {
        Commands::Backup => {
            rbvault::runtime::run_backup(config, quiet).await?;
            Ok(0)
        }
        Commands::Precheck => rbvault::runtime::run_precheck(config, quiet).await,
        Commands::CheckSnap => rbvault::runtime::run_check_snap(config, quiet).await,
        Commands::Check => rbvault::runtime::run_check(config),
        Commands::Stats => cmd_stats(config).await,
        Commands::Ls { image, json } => cmd_ls(config, image, json).await,
        Commands::ListMapped { json } => cmd_list_mapped(json),
        Commands::Map { image, snap } => cmd_map(&image, &snap),
        Commands::Unmap { image, snap } => cmd_unmap(&image, &snap),
    }
}

/// The statistics reporter's internals are delegated (spec.md §1, §6);
/// this prints the one summary this crate can produce on its own — the
/// number of images currently held on the backup cluster.
async fn cmd_stats(config: &Config) -> Result<i32> {
    let backup = rbvault::runtime::build_backup_driver(config);
    let images = backup
        .list_images(&config.backup_cluster.pool)
        .await
        .context("listing images on the backup cluster")?;
    println!("backup cluster {:?}: {} image(s)", config.backup_cluster.name, images.len());
    Ok(0)
}

async fn cmd_ls(config: &Config, image: Option<String>, json: bool) -> Result<i32> {
    let backup = rbvault::runtime::build_backup_driver(config);

    if let Some(image) = image {
        let image = ImageId::new(image);
        let snaps = backup.snapshots(&image).await.context("listing snapshots")?;
        if json {
            println!("{}", serde_json::to_string_pretty(&snaps)?);
        } else {
            for snap in snaps {
                println!("{snap}");
            }
        }
        return Ok(0);
    }

    let images = backup
        .list_images(&config.backup_cluster.pool)
        .await
        .context("listing images on the backup cluster")?;
    let names: Vec<&str> = images.iter().map(ImageId::as_str).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(0)
}

/// The restore-mount subsystem's mechanics are out of scope (spec.md
/// §1); this crate keeps no mount-session state of its own, so there is
/// never anything mapped.
fn cmd_list_mapped(json: bool) -> Result<i32> {
    if json {
        println!("[]");
    } else {
        println!("(nothing mapped)");
    }
    Ok(0)
}

fn cmd_map(image: &str, snap: &str) -> Result<i32> {
    anyhow::bail!("map {image}@{snap}: restore/mount subsystem is out of scope for this build")
}

fn cmd_unmap(image: &str, snap: &str) -> Result<i32> {
    anyhow::bail!("unmap {image}@{snap}: restore/mount subsystem is out of scope for this build")
}
