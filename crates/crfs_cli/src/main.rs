//! CRFS CLI
//!
//! Runs the sync server and inspects its data directory.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP sync server
//! - `dump-log` - Print operation journal records
//! - `verify` - Check journals, blobs and the directory snapshot
//! - `token` - Issue an access token
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CRFS sync server and maintenance tools.
#[derive(Parser)]
#[command(name = "crfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, env = "CRFS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, env = "CRFS_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Accept blobs without checking that they hash to their address
        #[arg(long)]
        no_verify_digests: bool,

        /// Reject pushes of hashes whose blob was not uploaded
        #[arg(long)]
        require_blobs: bool,

        /// Reject blob requests that do not name their user
        #[arg(long)]
        require_blob_owner: bool,

        /// Hex secret enabling token authentication
        #[arg(long, env = "CRFS_AUTH_SECRET", hide_env_values = true)]
        auth_secret: Option<String>,

        /// Token lifetime in seconds
        #[arg(long, default_value = "86400")]
        token_expiry: u64,

        /// Maximum hashes per push
        #[arg(long, default_value = "10000")]
        max_push_batch: usize,

        /// Maximum blob size in bytes
        #[arg(long, default_value = "67108864")]
        max_blob_size: usize,

        /// Acknowledge pushes without syncing the journal to disk
        #[arg(long)]
        no_sync: bool,

        /// Filesystem journals kept open at once
        #[arg(long, default_value = "256")]
        max_open_journals: usize,
    },

    /// Print operation journal records
    DumpLog {
        /// Only this filesystem
        #[arg(long)]
        fs: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check journals, blobs and the directory snapshot
    Verify {
        /// Skip re-hashing stored blobs
        #[arg(long)]
        skip_digests: bool,
    },

    /// Issue an access token for a user and filesystem
    Token {
        /// User id
        #[arg(long)]
        user: String,

        /// Filesystem id
        #[arg(long)]
        fs: String,

        /// Hex secret shared with the server
        #[arg(long, env = "CRFS_AUTH_SECRET", hide_env_values = true)]
        auth_secret: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            no_verify_digests,
            require_blobs,
            require_blob_owner,
            auth_secret,
            token_expiry,
            max_push_batch,
            max_blob_size,
            no_sync,
            max_open_journals,
        } => {
            let options = commands::serve::ServeOptions {
                bind,
                data_dir: cli.data_dir,
                verify_digests: !no_verify_digests,
                require_blobs,
                require_blob_owner,
                auth_secret,
                token_expiry,
                max_push_batch,
                max_blob_size,
                sync_on_write: !no_sync,
                max_open_journals,
            };
            commands::serve::run(options)?;
        }
        Commands::DumpLog { fs, format } => {
            let path = cli.data_dir.ok_or("Data directory required for dump-log")?;
            commands::dump_log::run(&path, fs.as_deref(), &format)?;
        }
        Commands::Verify { skip_digests } => {
            let path = cli.data_dir.ok_or("Data directory required for verify")?;
            commands::verify::run(&path, !skip_digests)?;
        }
        Commands::Token {
            user,
            fs,
            auth_secret,
        } => {
            commands::token::run(&user, &fs, &auth_secret)?;
        }
        Commands::Version => {
            println!("CRFS CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Protocol v{}", crfs_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
