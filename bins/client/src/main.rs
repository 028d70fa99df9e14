//! boxsync: keep a local folder in sync with a boxsync server.
//!
//! `watch` runs the continuous sync engine; the remaining subcommands are
//! one-shot operator actions against the same API.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use boxsync_client::{
    derive_client_id, ApiClient, FolderWatcher, RemoteStore as _, SyncEngine, WATCH_DEBOUNCE,
};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "boxsync")]
#[command(version)]
#[command(about = "File sync client with server-side version history")]
struct Cli {
    /// Server URL (the supervisor's public address)
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Client name; the client id is derived from it
    #[arg(short, long, global = true, default_value = "client")]
    name: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a folder and continuously sync it
    Watch {
        /// Local sync folder
        folder: PathBuf,
    },

    /// List files on the server
    List,

    /// List all versions of a file
    Versions { file_name: String },

    /// Download a file (current or a specific version)
    Download {
        file_name: String,

        /// Version to download; latest when omitted
        #[arg(long)]
        version: Option<u64>,

        /// Output path; defaults to the file name in the working directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Promote an old version to be the new latest
    Restore { file_name: String, version: u64 },

    /// Rename a file and its whole history
    Rename { old_name: String, new_name: String },

    /// Delete a file's current copy (history stays downloadable)
    Delete { file_name: String },

    /// List recorded conflicts
    Conflicts,

    /// Mark a conflict as resolved
    Resolve {
        conflict_id: String,

        /// Resolution method, e.g. keep_winner or keep_mine
        #[arg(long, default_value = "keep_winner")]
        method: String,

        #[arg(long)]
        keep_version: Option<u64>,
    },

    /// Show supervisor fleet status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client_id = derive_client_id(&cli.name);
    let api = ApiClient::new(&cli.server, &client_id);

    match cli.command {
        Commands::Watch { folder } => watch_command(api, folder).await?,
        Commands::List => {
            for entry in api.list_files().await? {
                println!(
                    "{}\tv{}\t{} bytes\t{}\t{} versions",
                    entry.name, entry.version, entry.size, entry.client_id, entry.total_versions
                );
            }
        }
        Commands::Versions { file_name } => {
            for record in api.versions(&file_name).await? {
                let origin = record
                    .restored_from
                    .map(|v| format!(" (restored from v{v})"))
                    .unwrap_or_default();
                println!(
                    "v{}\t{} bytes\t{}\t{}{origin}",
                    record.version, record.size, record.client_id, record.created_at
                );
            }
        }
        Commands::Download {
            file_name,
            version,
            output,
        } => {
            let bytes = match version {
                Some(v) => api.download_version(&file_name, v).await?,
                None => api.download(&file_name).await?,
            };
            let target = output.unwrap_or_else(|| PathBuf::from(&file_name));
            std::fs::write(&target, &bytes)?;
            println!("wrote {} bytes to {}", bytes.len(), target.display());
        }
        Commands::Restore { file_name, version } => {
            let response = api.restore(&file_name, version).await?;
            println!("{}", response.message);
        }
        Commands::Rename { old_name, new_name } => {
            api.rename(&old_name, &new_name).await?;
            println!("renamed {old_name} to {new_name}");
        }
        Commands::Delete { file_name } => {
            api.delete(&file_name).await?;
            println!("deleted {file_name}");
        }
        Commands::Conflicts => {
            for conflict in api.conflicts().await? {
                println!(
                    "{}\t{}\t{:?}\twinner={}\tlosers={}",
                    conflict.id,
                    conflict.file_name,
                    conflict.status,
                    conflict.winner.client_id,
                    conflict
                        .losers
                        .iter()
                        .map(|l| l.record.client_id.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
        }
        Commands::Resolve {
            conflict_id,
            method,
            keep_version,
        } => {
            api.resolve_conflict(&conflict_id, &method, keep_version)
                .await?;
            println!("resolved {conflict_id}");
        }
        Commands::Status => {
            let status = api.supervisor_status().await?;
            println!(
                "{}:{} — {}/{} workers healthy, root {}",
                status.bind_address,
                status.proxy_port,
                status.healthy_servers,
                status.total_servers,
                status.shared_storage_root
            );
            for server in status.servers {
                println!(
                    "  :{}\t{}\tstarted {}",
                    server.port,
                    if server.healthy { "healthy" } else { "unhealthy" },
                    server.started_at
                );
            }
        }
    }

    Ok(())
}

async fn watch_command(api: ApiClient, folder: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&folder)?;
    info!(folder = %folder.display(), client = api.client_id(), "starting sync");

    let watcher = FolderWatcher::start(&folder, WATCH_DEBOUNCE)?;
    let client_id = api.client_id().to_owned();
    let engine = SyncEngine::new(api, folder, &client_id);
    boxsync_client::run_sync_loop(engine, watcher).await?;
    Ok(())
}
