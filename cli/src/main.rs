//! PortMirror CLI - Mirror Kubernetes NodePort services on 127.0.0.1
//!
//! A command-line tool that keeps a loopback listener open for every
//! NodePort service in a cluster, and inspects what it would mirror.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::ClusterArgs;

#[derive(Parser)]
#[command(name = "portmirror")]
#[command(author, version, about = "Mirror Kubernetes NodePort services as loopback listeners")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable additional debugging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the cluster and keep listeners in sync (default)
    Watch {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Delay between retries while the cluster is unavailable
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },

    /// List NodePort services once
    #[command(alias = "ls")]
    Services {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Include services that are not NodePort
        #[arg(short, long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective settings
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Change stored settings
    Set {
        /// Kubeconfig to watch
        #[arg(long)]
        kubeconfig: Option<PathBuf>,
        /// kubectl binary
        #[arg(long)]
        kubectl: Option<PathBuf>,
        /// Retry delay in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
        /// kubectl request timeout in seconds
        #[arg(long)]
        request_timeout_secs: Option<u64>,
    },
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Some(Commands::Watch {
            cluster,
            retry_delay_ms,
        }) => commands::watch::run(cluster, retry_delay_ms).await?,
        Some(Commands::Services { cluster, all, json }) => {
            commands::services::run(cluster, all, json).await?
        }
        Some(Commands::Config { action }) => match action {
            None => commands::config::show(false).await?,
            Some(ConfigAction::Show { json }) => commands::config::show(json).await?,
            Some(ConfigAction::Set {
                kubeconfig,
                kubectl,
                retry_delay_ms,
                request_timeout_secs,
            }) => {
                commands::config::set(kubeconfig, kubectl, retry_delay_ms, request_timeout_secs)
                    .await?
            }
        },
        None => commands::watch::run(ClusterArgs::default(), None).await?,
    }

    Ok(())
}
