mod commands;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rk_core::config::{Config, CONFIG_ENV};
use rk_core::types::DEFAULT_SSH_PORT;
use uuid::Uuid;

use commands::Context;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// routerkeep CLI -- run commands on network devices and manage their backups.
#[derive(Parser)]
#[command(name = "rk", version, about)]
struct Cli {
    /// Path to config.toml (defaults to ~/.routerkeep/config.toml).
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single command on a device and print its output.
    Run {
        /// Device ID.
        device: String,
        /// Command line to execute remotely.
        command: String,
    },

    /// Copy a file from a device.
    Download {
        device: String,
        /// Remote path.
        remote: String,
        /// Local destination; parent directories are created.
        local: PathBuf,
    },

    /// Manage devices.
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// List, take, test and delete backups.
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show which backups the retention policy would delete.
    Prune {
        /// Actually delete them.
        #[arg(long)]
        apply: bool,
    },

    /// Manage scheduled tasks.
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// List stored backups, newest first.
    List {
        /// Only show backups of this device.
        #[arg(long)]
        device: Option<String>,
    },
    /// Back a device up now.
    Now { device: String },
    /// Save and download a test backup to check SSH and SFTP access.
    Test { device: String },
    /// Delete a backup record and its downloaded file.
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum DeviceAction {
    List,
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,
        #[arg(long, default_value = "admin")]
        user: String,
        /// mikrotik, olt, switch or other.
        #[arg(long, default_value = "mikrotik")]
        kind: String,
        /// Password auth; omit to use the configured private key.
        #[arg(long, env = "ROUTERKEEP_DEVICE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Remove a device; its tasks are kept.
    Delete { id: String },
}

#[derive(Subcommand)]
enum TaskAction {
    List,
    Add {
        /// Device ID.
        device: String,
        /// Command line to execute remotely.
        command: String,
        #[arg(long)]
        title: Option<String>,
        /// First run (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<String>,
        /// Repeat interval such as 24h, 90m or 6 (hours).
        #[arg(long)]
        every: Option<String>,
        /// Stop repeating after this time (RFC 3339).
        #[arg(long)]
        until: Option<String>,
    },
    /// Print the last result of a task.
    Show { id: Uuid },
    /// Reactivate a completed or failed task.
    Retry { id: Uuid },
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.verbose {
        rk_telemetry::logging::init_logging("rk", "debug");
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path.clone())
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    let ctx = Context::open(config).await?;
    let result = dispatch(&ctx, cli.command).await;
    ctx.close().await;
    result
}

async fn dispatch(ctx: &Context, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { device, command } => {
            print!("{}", commands::run::run(ctx, &device, &command).await?);
        }
        Commands::Download {
            device,
            remote,
            local,
        } => {
            let bytes = commands::download::run(ctx, &device, &remote, &local).await?;
            println!("Downloaded {remote} to {} ({bytes} bytes).", local.display());
        }
        Commands::Devices { action } => match action {
            DeviceAction::List => print!("{}", commands::devices::list(ctx).await?),
            DeviceAction::Add {
                id,
                name,
                host,
                port,
                user,
                kind,
                password,
            } => {
                let device = commands::devices::add(
                    ctx,
                    commands::devices::NewDevice {
                        id,
                        name,
                        kind: commands::devices::parse_kind(&kind)?,
                        host,
                        port,
                        username: user,
                        password,
                    },
                )
                .await?;
                println!("Device {} saved ({}).", device.id, device.target.key());
            }
            DeviceAction::Delete { id } => print!("{}", commands::devices::delete(ctx, &id).await?),
        },
        Commands::Backups { action } => match action {
            BackupAction::List { device } => {
                print!("{}", commands::backups::list(ctx, device.as_deref()).await?);
            }
            BackupAction::Now { device } => print!("{}", commands::backups::now(ctx, &device).await?),
            BackupAction::Test { device } => {
                print!("{}", commands::backups::test_backup(ctx, &device).await?);
            }
            BackupAction::Delete { id } => print!("{}", commands::backups::delete(ctx, id).await?),
        },
        Commands::Prune { apply } => {
            print!("{}", commands::prune::run(ctx, apply).await?);
        }
        Commands::Tasks { action } => match action {
            TaskAction::List => print!("{}", commands::tasks::list(ctx).await?),
            TaskAction::Add {
                device,
                command,
                title,
                at,
                every,
                until,
            } => {
                let task = commands::tasks::add(
                    ctx,
                    commands::tasks::NewTask {
                        title: title.unwrap_or_else(|| command.clone()),
                        device_id: device,
                        command,
                        at: at.as_deref().map(commands::parse_time).transpose()?,
                        every,
                        until: until.as_deref().map(commands::parse_time).transpose()?,
                    },
                )
                .await?;
                println!(
                    "Task {} scheduled for {}.",
                    task.id,
                    commands::format_time(task.run_at)
                );
            }
            TaskAction::Show { id } => print!("{}", commands::tasks::show_result(ctx, id).await?),
            TaskAction::Retry { id } => {
                let task = commands::tasks::retry(ctx, id).await?;
                println!("Task {} reactivated.", task.id);
            }
            TaskAction::Delete { id } => {
                commands::tasks::delete(ctx, id).await?;
                println!("Task {id} deleted.");
            }
        },
    }
    Ok(())
}
