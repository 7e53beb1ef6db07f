//! CmSync CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CmSync - keeps cm handle state in step with their DMI plugins
#[derive(Parser, Debug)]
#[command(name = "cmsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (`.toml` or `.json`); defaults to the global cmsync.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the watchdog until Ctrl-C
    Run,
    /// Register cm handles (ADVISED)
    Register {
        /// Handle id
        #[arg(long, requires = "dmi")]
        id: Option<String>,
        /// DMI plugin URL of the handle
        #[arg(long)]
        dmi: Option<String>,
        /// Module set tag
        #[arg(long)]
        module_set_tag: Option<String>,
        /// JSON file with an array of {id, dmiServiceName, moduleSetTag}
        #[arg(long, conflicts_with = "id")]
        file: Option<PathBuf>,
    },
    /// Show one handle, or all handles with per-state counts
    Status {
        id: Option<String>,
    },
    /// Delete a handle (DELETING, then DELETED)
    Delete {
        id: String,
        /// Also remove the DELETED entry from the registry
        #[arg(long)]
        purge: bool,
    },
    /// Move a READY handle to another module set tag
    Upgrade {
        id: String,
        module_set_tag: String,
    },
    /// Query a DMI plugin's health endpoint
    Health {
        /// DMI plugin URL
        dmi: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = cli::load_config(args.config.as_deref())?;

    match args.command {
        Command::Run => cli::run(config).await,
        Command::Register {
            id,
            dmi,
            module_set_tag,
            file,
        } => {
            let handles = match (file, id, dmi) {
                (Some(path), _, _) => cli::read_handles(&path)?,
                (None, Some(id), Some(dmi)) => vec![cli::new_handle(id, dmi, module_set_tag)],
                _ => anyhow::bail!("either --file or --id with --dmi is required"),
            };
            cli::register(config, handles).await
        }
        Command::Status { id } => cli::status(config, id.as_deref()).await,
        Command::Delete { id, purge } => cli::delete(config, &id, purge).await,
        Command::Upgrade { id, module_set_tag } => {
            cli::upgrade(config, &id, &module_set_tag).await
        }
        Command::Health { dmi } => cli::health(&config, &dmi).await,
    }
}
