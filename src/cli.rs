use clap::{Parser, Subcommand};

/// Gatekeeper — session token store for the API gateway
#[derive(Parser)]
#[command(name = "gatekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage session tokens in the configured backend
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a new token for a consumer
    Issue {
        #[arg(long)]
        owner: String,
        /// Credential flow that produced the token
        #[arg(long, default_value = "")]
        source: String,
        #[arg(long, default_value = "")]
        client_address: String,
    },
    /// Show a stored token, expired or not
    Get {
        #[arg(long)]
        id: String,
    },
    /// Check whether a token is present and unexpired
    Validate {
        #[arg(long)]
        id: String,
    },
    /// List every token held by a consumer
    List {
        #[arg(long)]
        owner: String,
    },
    /// Extend a live token by the configured timeout
    Renew {
        #[arg(long)]
        id: String,
    },
    /// Revoke one token
    Revoke {
        #[arg(long)]
        id: String,
    },
    /// Revoke all tokens of a consumer
    RevokeOwner {
        #[arg(long)]
        owner: String,
    },
}
