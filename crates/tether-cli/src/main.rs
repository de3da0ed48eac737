//! Tether CLI
//!
//! Relay hub, chunked file transfer and node messaging over WebSockets.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::{Payload, RELAY_WS_PATH};
use tether_files::TransferReceiver;
use tether_node::{NodeClient, SendOptions, await_outcome, send_file, serve_storage};
use tether_relay::RelayServer;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration};

/// Tether - relay hub and file transfer between NAT'd nodes
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (default: <config dir>/tether/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node id, overriding the configuration file
    #[arg(long, env = "TETHER_NODE_ID", global = true)]
    node_id: Option<String>,

    /// Relay URL, overriding the configuration file
    #[arg(long, env = "TETHER_RELAY_URL", global = true)]
    relay_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay hub
    Relay {
        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Receive files from other nodes
    Receive {
        /// Storage directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Send a file to a node
    Send {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Target node id
        #[arg(required = true)]
        target: String,

        /// Store under this name instead of the file's own
        #[arg(long)]
        name: Option<String>,

        /// Return once EOF is sent instead of waiting for the receiver
        #[arg(long)]
        no_wait: bool,
    },

    /// Send a generic message to a node
    Message {
        /// Target node id
        #[arg(required = true)]
        target: String,

        /// Payload entries; values are parsed as JSON when possible
        #[arg(value_name = "KEY=VALUE")]
        entries: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }
    if let Some(relay_url) = cli.relay_url {
        config.relay.url = relay_url;
    }

    // Initialize logging; RUST_LOG wins over both flag and config
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    tracing::debug!(path = %config_path.display(), node_id = %config.node.id, "configuration loaded");

    match cli.command {
        Commands::Relay { bind } => {
            run_relay(bind, &config).await?;
        }
        Commands::Receive { output } => {
            receive_files(output, &config).await?;
        }
        Commands::Send {
            file,
            target,
            name,
            no_wait,
        } => {
            send(file, target, name, no_wait, &config).await?;
        }
        Commands::Message { target, entries } => {
            send_message(target, &entries, &config).await?;
        }
        Commands::Config => {
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Run the relay hub until Ctrl+C
async fn run_relay(bind: Option<String>, config: &Config) -> anyhow::Result<()> {
    let addr = match bind {
        Some(bind) => bind.parse()?,
        None => config.parse_listen_addr()?,
    };

    let server = RelayServer::bind_with_config(addr, config.relay_server_config()).await?;

    println!("Tether Relay");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: ws://{}{RELAY_WS_PATH}", server.local_addr());
    println!(
        "Max message size: {}",
        format_bytes(config.relay.max_message_size as u64)
    );
    println!("Press Ctrl+C to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("\nShutting down...");
    Ok(())
}

/// Serve incoming transfers until Ctrl+C or disconnect
async fn receive_files(output: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    let storage_dir = output.unwrap_or_else(|| config.transfer.storage_dir.clone());
    std::fs::create_dir_all(&storage_dir)
        .with_context(|| format!("failed to create {}", storage_dir.display()))?;

    let client = NodeClient::new(config.node.id.clone(), config.relay.url.clone());
    client.connect().await?;

    let receiver_config = config.receiver_config(storage_dir.clone());
    let reap_interval = (receiver_config.idle_timeout / 4)
        .clamp(Duration::from_secs(1), Duration::from_secs(60));
    let receiver = Arc::new(TransferReceiver::new(receiver_config));
    let reaper = receiver.spawn_reaper(reap_interval);

    println!("Node: {}", client.node_id());
    println!("Relay: {}", client.relay_url());
    println!("Storage: {}", storage_dir.display());
    println!("Ready to receive files. Press Ctrl+C to stop");

    tokio::select! {
        result = serve_storage(&client, &receiver) => {
            result?;
            println!("\nRelay connection closed");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    reaper.abort();
    client.disconnect().await;
    Ok(())
}

/// Send a file and, unless `no_wait`, wait for the receiver's verdict
async fn send(
    file: PathBuf,
    target: String,
    name: Option<String>,
    no_wait: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let file_size = sendable_size(&file)?;
    let display_name = name.clone().unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(file_size));
    println!("Target: {target}");

    let client = NodeClient::new(config.node.id.clone(), config.relay.url.clone());
    client.connect().await?;

    let options = SendOptions {
        filename: name,
        chunker: config.chunker(),
    };
    let progress = TransferProgress::new(file_size, &display_name);
    let started = Instant::now();

    let summary = match send_file(&client, &file, &target, &options, |p| {
        progress.update(p.bytes_sent);
    })
    .await
    {
        Ok(summary) => summary,
        Err(e) => {
            progress.abandon();
            client.disconnect().await;
            return Err(e.into());
        }
    };

    if no_wait {
        progress.finish_with_message(format!(
            "Sent {} chunks of {} to {target}",
            summary.data_chunks, summary.filename
        ));
        client.disconnect().await;
        return Ok(());
    }

    progress.set_message(format!("Waiting for {target} to store {}", summary.filename));
    let outcome = await_outcome(&client).await;
    client.disconnect().await;

    match outcome {
        Ok(outcome) => {
            progress.finish_with_message(format!(
                "{} ({})",
                outcome.message,
                format_duration(started.elapsed())
            ));
            println!("Stored on {} in folder {}", outcome.receiver, outcome.folder_id);
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            anyhow::bail!("Transfer failed: {e}")
        }
    }
}

/// Size of a file worth sending
///
/// A lone EOF is always answered with "File transfer not found", so empty
/// files are refused before connecting.
fn sendable_size(file: &Path) -> anyhow::Result<u64> {
    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let file_size = std::fs::metadata(file)?.len();
    if file_size == 0 {
        anyhow::bail!("File is empty: {}", file.display());
    }
    Ok(file_size)
}

/// Send one generic message
async fn send_message(target: String, entries: &[String], config: &Config) -> anyhow::Result<()> {
    let payload = parse_payload(entries)?;

    let client = NodeClient::new(config.node.id.clone(), config.relay.url.clone());
    client.connect().await?;
    client.send(&target, payload).await?;
    client.disconnect().await;

    println!("Message sent to {target}");
    Ok(())
}

/// Build a payload from `KEY=VALUE` entries
fn parse_payload(entries: &[String]) -> anyhow::Result<Payload> {
    let mut payload = Payload::new();

    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("expected KEY=VALUE, got {entry:?}"))?;
        if key.is_empty() {
            anyhow::bail!("empty key in {entry:?}");
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        payload.insert(key.to_string(), value);
    }

    Ok(payload)
}
