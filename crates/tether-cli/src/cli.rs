use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Inspect credentials and replay queued requests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Path to the queue database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Keychain profile that holds the credential
    #[arg(long, global = true, value_name = "NAME", default_value = "default")]
    pub profile: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a credential issued by the auth server
    Login {
        #[arg(long, value_name = "JWT")]
        access_token: String,
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
    },
    /// Remove the stored credential
    Logout,
    /// Access token operations
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Offline queue operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Replay queued requests when the API host is reachable
    Sync {
        /// Keep probing and replay whenever connectivity returns
        #[arg(long)]
        watch: bool,
    },
    /// Show connectivity, credential, and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Decode and validate an access token (the stored one by default)
    Inspect {
        #[arg(long, value_name = "JWT")]
        token: Option<String>,
    },
    /// Exchange the refresh token for a new access token now
    Refresh,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued requests, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue a request for later delivery
    Add {
        /// POST, PUT, PATCH, or DELETE
        method: String,
        /// Endpoint path, relative to the API base URL
        endpoint: String,
        /// Request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Replay queued requests now
    Drain {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
