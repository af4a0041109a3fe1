//! `xray-manager` command line.
//!
//! Structured results are printed to stdout as pretty JSON; links and QR
//! codes are printed as-is. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use xray_manager::config::load_or_default;
use xray_manager::document::TransportPatch;
use xray_manager::lifecycle::{build_manager, run_daemon};
use xray_manager::observability::init_logging;
use xray_manager::profiles::CodeFormat;

#[derive(Parser)]
#[command(name = "xray-manager")]
#[command(about = "Validated, rollback-safe management of an xray server configuration", long_about = None)]
struct Cli {
    /// Manager settings file.
    #[arg(short, long, default_value = "/etc/xray-manager/manager.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Client profiles
    #[command(subcommand)]
    Profiles(ProfileCommand),
    /// Inbound transport settings
    #[command(subcommand)]
    Transport(TransportCommand),
    /// Configuration backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// The supervised xray unit
    #[command(subcommand)]
    Service(ServiceCommand),
    /// Profile and service statistics
    Stats,
    /// Host and xray information
    System,
    /// Validate the live configuration file
    Check,
    /// Snapshot history, newest first
    Snapshots,
    /// Watch for out-of-band edits and serve metrics until stopped
    Daemon,
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List all profiles
    List,
    /// Show one profile
    Show { id: Uuid },
    /// Create a profile with a fresh identity
    Create {
        label: String,
        /// Inbound port; defaults to the first managed inbound
        #[arg(long)]
        port: Option<u16>,
    },
    /// Delete a profile
    Delete { id: Uuid },
    /// Print a profile's connection link
    Link { id: Uuid },
    /// Print a profile's connection link as a QR code
    Qr {
        id: Uuid,
        /// svg or terminal
        #[arg(long, default_value = "terminal")]
        format: CodeFormat,
    },
}

#[derive(Subcommand)]
enum TransportCommand {
    /// Change transport settings of one inbound
    Set(TransportArgs),
}

#[derive(Args)]
struct TransportArgs {
    /// Inbound port
    port: u16,
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    service_name: Option<String>,
    /// TLS server name
    #[arg(long)]
    server_name: Option<String>,
    /// REALITY destination (host:port)
    #[arg(long)]
    dest: Option<String>,
    /// REALITY server names (repeatable)
    #[arg(long = "reality-server-name")]
    server_names: Vec<String>,
    /// REALITY short ids (repeatable)
    #[arg(long = "short-id")]
    short_ids: Vec<String>,
}

impl From<TransportArgs> for TransportPatch {
    fn from(args: TransportArgs) -> Self {
        let non_empty = |v: Vec<String>| if v.is_empty() { None } else { Some(v) };
        TransportPatch {
            path: args.path,
            host: args.host,
            service_name: args.service_name,
            server_name: args.server_name,
            dest: args.dest,
            server_names: non_empty(args.server_names),
            short_ids: non_empty(args.short_ids),
        }
    }
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Archive the live configuration and unit files
    Create,
    /// Restore from an archive or a plain JSON file
    Restore { path: PathBuf },
}

#[derive(Subcommand)]
enum ServiceCommand {
    Start,
    Stop,
    Restart,
    Status,
    /// Recent journal lines
    Logs {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(&cli.config)?;
    init_logging(&config.observability);

    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    let manager = Arc::new(build_manager(config)?);

    match cli.command {
        Commands::Profiles(command) => match command {
            ProfileCommand::List => print_json(&manager.list_profiles().await?)?,
            ProfileCommand::Show { id } => print_json(&manager.get_profile(&id).await?)?,
            ProfileCommand::Create { label, port } => {
                print_json(&manager.create_profile(&label, port).await?)?
            }
            ProfileCommand::Delete { id } => {
                let commit = manager.delete_profile(&id).await?;
                eprintln!("Deleted {} (previous file kept as snapshot {})", id, commit.snapshot_sequence);
            }
            ProfileCommand::Link { id } => println!("{}", manager.link_for(&id).await?),
            ProfileCommand::Qr { id, format } => {
                println!("{}", manager.connection_code(&id, format).await?)
            }
        },
        Commands::Transport(TransportCommand::Set(args)) => {
            let port = args.port;
            print_json(&manager.set_transport(port, args.into()).await?)?
        }
        Commands::Backup(command) => match command {
            BackupCommand::Create => print_json(&manager.create_backup().await?)?,
            BackupCommand::Restore { path } => {
                let commit = manager.restore_backup(&path).await?;
                eprintln!(
                    "Restored {} (previous file kept as snapshot {})",
                    path.display(),
                    commit.snapshot_sequence
                );
            }
        },
        Commands::Service(command) => {
            let service = manager.service();
            match command {
                ServiceCommand::Start => service.start().await?,
                ServiceCommand::Stop => service.stop().await?,
                ServiceCommand::Restart => service.restart().await?,
                ServiceCommand::Status => print_json(&service.status().await?)?,
                ServiceCommand::Logs { lines } => {
                    for line in service.logs(lines).await? {
                        println!("{}", line);
                    }
                }
            }
        }
        Commands::Stats => print_json(&manager.statistics().await)?,
        Commands::System => print_json(&manager.system_info().await)?,
        Commands::Check => {
            manager.verify().await?;
            eprintln!("{} is valid", manager.reconciler().config_path().display());
        }
        Commands::Snapshots => print_json(&manager.snapshot_history())?,
        Commands::Daemon => run_daemon(manager).await?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
