//! ilink CLI
//!
//! Talks to iOS devices through the local usbmuxd:
//! - device listing and pairing-record inspection
//! - lockdown queries and recovery mode
//! - forwarding local TCP ports to device-side ports

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use il_core::{LinkConfig, LinkContext};
use ilink::commands;
use ilink::output::print_error;

#[derive(Parser)]
#[command(name = "ilink")]
#[command(author, version, about = "Talk to iOS devices through usbmuxd")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// usbmuxd address (overrides config and environment)
    #[arg(long, global = true)]
    mux_address: Option<String>,

    /// Device UDID (defaults to the first attached device)
    #[arg(short, long, global = true, env = "ILINK_UDID")]
    udid: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached devices
    #[command(alias = "list")]
    Devices,

    /// Query lockdown values
    Info {
        /// Single key to read (whole domain when omitted)
        key: Option<String>,
        /// Lockdown domain, e.g. com.apple.disk_usage
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Show the pairing record usbmuxd holds for the device
    PairRecord {
        /// Print the host certificate PEM instead of a summary
        #[arg(long)]
        pem: bool,
    },

    /// Reboot the device into recovery mode
    Recovery,

    /// Forward a local TCP address to a device port
    Proxy {
        /// Local address to listen on, e.g. 127.0.0.1:2222
        local: String,
        /// Port on the device
        device_port: u16,
    },

    /// Expose the device debugserver on a local TCP address
    Debugserver {
        /// Local address to listen on
        local: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => {
                let (config, path) = effective_config(&cli)?;
                commands::config_show(&config, &path, cli.json)
            }
            ConfigAction::Path => {
                commands::config_path(&config_file(&cli));
                Ok(())
            }
            ConfigAction::Init { force } => commands::config_init(&config_file(&cli), *force),
        };
    }

    let (config, _) = effective_config(&cli)?;
    let ctx = LinkContext::new(config);

    match cli.command {
        Commands::Devices => commands::devices_command(&ctx, cli.json).await,
        Commands::Info { key, domain } => {
            commands::info_command(&ctx, key.as_deref(), domain.as_deref(), cli.json).await
        }
        Commands::PairRecord { pem } => commands::pair_record_command(&ctx, pem, cli.json).await,
        Commands::Recovery => commands::recovery_command(&ctx).await,
        Commands::Proxy { local, device_port } => {
            commands::proxy_command(&ctx, &local, device_port, shutdown_token()).await
        }
        Commands::Debugserver { local } => {
            commands::debugserver_command(&ctx, &local, shutdown_token()).await
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn config_file(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(il_core::config::default_config_path)
}

/// Config file, then environment, then command-line flags
fn effective_config(cli: &Cli) -> Result<(LinkConfig, PathBuf)> {
    let (mut config, path) = commands::load_link_config(cli.config.as_deref())?;
    config.apply_env();
    if let Some(address) = &cli.mux_address {
        config.mux_address = address.clone();
    }
    if let Some(udid) = &cli.udid {
        config.udid = Some(udid.clone());
    }
    Ok((config, path))
}

/// Token cancelled on Ctrl+C or SIGTERM
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
