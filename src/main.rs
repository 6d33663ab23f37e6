use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::cli::{self, TokenCommands};
use gatekeeper::config;
use gatekeeper::models::token::TokenView;
use gatekeeper::service::TokenService;
use gatekeeper::store::{self, TokenRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=info".into()),
    );
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        cli::Commands::Token { command } => {
            let repo = store::connect(&cfg)
                .await
                .with_context(|| format!("failed to initialise {:?} token backend", cfg.backend))?;
            let service = TokenService::new(repo, cfg.token_timeout());
            handle_token_command(command, &service).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn handle_token_command(cmd: TokenCommands, service: &TokenService) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue {
            owner,
            source,
            client_address,
        } => {
            let token = service.issue(&owner, &source, &client_address).await?;
            print_json(&TokenView::from(token))
        }
        TokenCommands::Get { id } => match service.repository().get(&id).await? {
            Some(token) => print_json(&TokenView::from(token)),
            None => anyhow::bail!("token '{}' not found", id),
        },
        TokenCommands::Validate { id } => {
            let valid = service.validate(&id).await?.is_some();
            print_json(&serde_json::json!({ "id": id, "valid": valid }))
        }
        TokenCommands::List { owner } => print_json(&service.list(&owner).await?),
        TokenCommands::Renew { id } => match service.renew(&id).await? {
            Some(token) => print_json(&TokenView::from(token)),
            None => anyhow::bail!("token '{}' not found or already expired", id),
        },
        TokenCommands::Revoke { id } => {
            service.revoke(&id).await?;
            println!("Revoked token {}", id);
            Ok(())
        }
        TokenCommands::RevokeOwner { owner } => {
            service.revoke_owner(&owner).await?;
            println!("Revoked all tokens of {}", owner);
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
