//! statechart - interactive statechart shell
//!
//! Drives the bundled showcase machine: start and stop it, send events with
//! headers, inspect states and variables, persist and restore by key.

mod shell;
mod showcase;

use clap::Parser;
use statechart_core::{LoggingListener, StateMachine, StateMachineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statechart")]
#[command(about = "Interactive shell for a hierarchical state machine")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "STATECHART_CONFIG")]
    config: Option<PathBuf>,

    /// Machine id (overrides the configuration)
    #[arg(short, long)]
    machine_id: Option<String>,

    /// Shell history file
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Log every listener callback
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = StateMachineConfig::from_file(path).inspect_err(|e| {
                tracing::error!("Failed to load config: {}", e);
            })?;
            config.apply_env_overrides();
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => StateMachineConfig::from_env(),
    };
    if let Some(id) = cli.machine_id {
        config.machine.id = Some(id);
    }
    config.validate()?;

    let machine = StateMachine::new(showcase::model()?, config)?;
    if cli.verbose {
        machine.add_state_listener(Arc::new(LoggingListener));
    }
    tracing::info!("Created machine {}", machine.uuid());

    let history_path = cli.history_file.unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".statechart_history"))
            .unwrap_or_else(|_| ".statechart_history".into())
    });

    shell::Shell::new(machine).run(history_path)
}
