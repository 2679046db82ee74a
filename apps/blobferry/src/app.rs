//! Command dispatch: wires the store, the `local` backend and the client
//! together and follows a transfer until it ends or is paused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use blobferry_client::TransferClient;
use blobferry_protocol::{
    Constraints, DownloadRequest, LocalLocator, NetworkRequirement, TransferEvent, TransferId,
    TransferState, UploadRequest,
};
use blobferry_transfer::{FsAccessorProvider, FsBackend, MemoryStore};

use crate::config::Config;

/// Name the filesystem backend is registered under.
const LOCAL_BACKEND: &str = "local";

#[derive(Parser)]
#[command(name = "blobferry")]
#[command(about = "Resumable chunked uploads and downloads")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upload a local file in chunks
    Upload {
        /// File to upload
        file: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    /// Download an object into a local file
    Download {
        /// Destination file
        file: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    /// Resume a paused or interrupted transfer
    Resume { id: u64 },
    /// Cancel a transfer for good
    Cancel { id: u64 },
    /// List known transfers
    List,
    /// Forget a finished or cancelled transfer
    Remove { id: u64 },
}

#[derive(Args)]
pub struct Target {
    /// Container holding the object
    #[arg(long, short = 'c')]
    container: String,

    /// Object name inside the container
    #[arg(long, short = 'o')]
    object: String,

    /// Treat the file argument as a handle under the configured resolved_root
    #[arg(long)]
    resolved: bool,

    /// Network condition required before the transfer starts
    #[arg(long, value_enum, default_value_t = Network::Any)]
    network: Network,

    /// Only run while charging
    #[arg(long)]
    requires_charging: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Network {
    Any,
    Connected,
    Unmetered,
}

impl Target {
    fn locator(&self, file: &Path) -> anyhow::Result<LocalLocator> {
        if self.resolved {
            return Ok(LocalLocator::resolved(file.to_string_lossy()));
        }
        let absolute = std::path::absolute(file)
            .with_context(|| format!("cannot resolve {}", file.display()))?;
        Ok(LocalLocator::path(absolute.to_string_lossy()))
    }

    fn constraints(&self) -> Constraints {
        Constraints {
            network: match self.network {
                Network::Any => NetworkRequirement::NotRequired,
                Network::Connected => NetworkRequirement::Connected,
                Network::Unmetered => NetworkRequirement::Unmetered,
            },
            requires_charging: self.requires_charging,
            requires_storage_not_low: false,
        }
    }
}

/// Runs one command to completion.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let client = build_client(&config).await?;

    match command {
        Command::Upload { file, target } => {
            let id = client
                .upload(UploadRequest {
                    container_name: target.container.clone(),
                    object_name: target.object.clone(),
                    backend_id: LOCAL_BACKEND.into(),
                    locator: Some(target.locator(&file)?),
                    constraints: Some(target.constraints()),
                })
                .await?;
            println!("upload {id} created");
            follow(&client, id).await
        }
        Command::Download { file, target } => {
            let id = client
                .download(DownloadRequest {
                    container_name: target.container.clone(),
                    object_name: target.object.clone(),
                    backend_id: LOCAL_BACKEND.into(),
                    locator: Some(target.locator(&file)?),
                    constraints: Some(target.constraints()),
                })
                .await?;
            println!("download {id} created");
            follow(&client, id).await
        }
        Command::Resume { id } => {
            let id = TransferId(id);
            client.resume(id).await?;
            follow(&client, id).await
        }
        Command::Cancel { id } => {
            client.cancel(TransferId(id)).await?;
            println!("transfer {id} cancelled");
            Ok(())
        }
        Command::List => {
            for record in client.transfers().await? {
                let size = record
                    .total_size
                    .map_or_else(|| "?".to_string(), |s| s.to_string());
                println!(
                    "{:>5}  {:<8}  {:<13}  {:<14}  {:>12}  {}/{}",
                    record.id.to_string(),
                    record.kind.to_string(),
                    format!("{:?}", record.state),
                    format!("{:?}", record.interrupt_state),
                    size,
                    record.container_name,
                    record.object_name,
                );
            }
            Ok(())
        }
        Command::Remove { id } => {
            client.remove(TransferId(id)).await?;
            println!("transfer {id} removed");
            Ok(())
        }
    }
}

async fn build_client(config: &Config) -> anyhow::Result<TransferClient> {
    let store = MemoryStore::open(&config.store_path)
        .await
        .with_context(|| format!("cannot open store {}", config.store_path.display()))?;

    let accessors = match &config.resolved_root {
        Some(root) => FsAccessorProvider::with_resolved_root(root),
        None => FsAccessorProvider::new(),
    };

    let client = TransferClient::builder()
        .store(Arc::new(store))
        .accessors(Arc::new(accessors))
        .backend(LOCAL_BACKEND, Arc::new(FsBackend::new(&config.remote_root)))
        .config(config.engine.clone())
        .build()?;
    Ok(client)
}

/// Reports events for `id` until it completes, fails or is paused.
/// Ctrl-C pauses the transfer so a later `resume` continues it.
async fn follow(client: &TransferClient, id: TransferId) -> anyhow::Result<()> {
    let mut events = client.subscribe(id);

    // Events published before the subscription existed are gone; the
    // record tells whether the transfer already ended.
    let record = client.transfer(id).await?;
    match record.state {
        TransferState::Completed => {
            println!("transfer {id} completed");
            return Ok(());
        }
        TransferState::Failed => {
            let reason = record.last_error.unwrap_or_else(|| "unknown error".into());
            anyhow::bail!("transfer {id} failed: {reason}");
        }
        TransferState::WaitToBegin | TransferState::InProgress => {}
    }

    let mut pausing = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                let percent = event.percentage().unwrap_or_default();
                match event {
                    TransferEvent::Progress { transferred_bytes, total_bytes, bytes_per_second, eta_secs, .. } => {
                        info!(
                            transfer = %id,
                            transferred_bytes,
                            total_bytes,
                            bytes_per_second = bytes_per_second.round() as u64,
                            eta_secs = eta_secs.map(|s| s.round() as u64),
                            "{percent:.1}%"
                        );
                    }
                    TransferEvent::SystemPaused { .. } => {
                        info!(transfer = %id, "waiting for execution constraints");
                    }
                    TransferEvent::Resumed { .. } => {
                        info!(transfer = %id, "continuing from previous run");
                    }
                    TransferEvent::UserPaused { .. } => {
                        println!("transfer {id} paused; continue with `blobferry resume {id}`");
                        return Ok(());
                    }
                    TransferEvent::Completed { .. } => {
                        println!("transfer {id} completed");
                        return Ok(());
                    }
                    TransferEvent::Failed { kind, message, .. } => {
                        anyhow::bail!("transfer {id} failed ({kind}): {message}");
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !pausing => {
                pausing = true;
                if let Err(e) = signal {
                    warn!("cannot listen for Ctrl-C: {e}");
                    continue;
                }
                info!(transfer = %id, "pausing");
                client.pause(id).await?;
            }
        }
    }
}
