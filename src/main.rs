use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use armada_core::config::ArmadaConfig;
use armada_core::observability::{self, LogFormat};
use armada_keys::KeyManager;
use armadactl::Orchestrator;

#[derive(Parser)]
#[command(name = "armadactl", version, about = "Distributed compute orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestrator daemon.
    Serve {
        /// Path to the TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Manage SSH keys for worker node access.
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
        /// Key store directory.
        #[arg(long, default_value = "/var/lib/armada/keys")]
        store_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Generate a new keypair.
    Generate { name: String },
    /// List stored key names.
    List,
    /// Show key metadata and validity.
    Info,
    /// Validate a stored keypair.
    Validate { name: String },
    /// Delete a keypair (no-op if absent).
    Delete { name: String },
    /// Copy a keypair into a timestamped backup directory.
    Backup { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            observability::init(LogFormat::Json);
            let config = match config {
                Some(path) => ArmadaConfig::from_file(&path)?,
                None => ArmadaConfig::default(),
            };
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(serve(config))
        }
        Command::Keys { command, store_dir } => {
            observability::init(LogFormat::Human);
            run_keys(command, store_dir)
        }
    }
}

async fn serve(config: ArmadaConfig) -> Result<()> {
    // The compute network client and node agent dispatcher are external
    // collaborators wired in by the embedding deployment; the built-in
    // simulated backend keeps the daemon runnable standalone.
    warn!("No compute backend configured, using the simulated backend");
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(armada_sched::dispatch::mock::MockDispatcher::new()),
        Arc::new(armada_fleet::provider::mock::MockProvider::new()),
    )?;
    orchestrator.start();
    info!("Orchestrator running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}

fn run_keys(command: KeysCommand, store_dir: PathBuf) -> Result<()> {
    let manager = KeyManager::open(store_dir)?;
    match command {
        KeysCommand::Generate { name } => {
            let pair = manager.generate_key(&name)?;
            println!("Generated key '{}'", pair.name);
            println!("  private: {}", pair.private_key_path.display());
            println!("  public:  {}", pair.public_key);
        }
        KeysCommand::List => {
            for name in manager.list_keys()? {
                println!("{}", name);
            }
        }
        KeysCommand::Info => {
            for info in manager.keys_info()? {
                let created = info
                    .created_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                let valid = if info.valid { "valid" } else { "INVALID" };
                println!("{}\t{}\t{}", info.name, created, valid);
            }
        }
        KeysCommand::Validate { name } => {
            let check = manager.validate_key_pair(&name);
            if check.valid {
                println!("Key '{}' is valid", name);
            } else {
                println!(
                    "Key '{}' is invalid: {}",
                    name,
                    check.reason.unwrap_or_else(|| "unknown".to_string())
                );
                std::process::exit(1);
            }
        }
        KeysCommand::Delete { name } => {
            manager.delete_key(&name)?;
            println!("Deleted key '{}'", name);
        }
        KeysCommand::Backup { name } => {
            let dir = manager.backup_keys(&name)?;
            println!("Backed up key '{}' to {}", name, dir.display());
        }
    }
    Ok(())
}
