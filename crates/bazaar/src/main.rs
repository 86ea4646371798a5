//! # bazaar
//!
//! Bazaar realtime messaging server binary: loads settings, wires the
//! marketplace collaborators and runs the HTTP/WebSocket server until
//! Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bazaar_core::{Role, UserId, UserIdentity};
use bazaar_server::services::http::MarketplaceClient;
use bazaar_server::services::jwt::JwtTokenValidator;
use bazaar_server::services::memory::InMemoryMarketplace;
use bazaar_server::{BazaarServer, Collaborators, ServerConfig};
use bazaar_settings::BazaarSettings;
use clap::Parser;

/// Bazaar realtime messaging server.
#[derive(Parser, Debug)]
#[command(name = "bazaar", about = "Bazaar realtime messaging server")]
struct Cli {
    /// Settings file (defaults to `~/.bazaar/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Serve every collaborator from memory instead of the marketplace API.
    #[arg(long)]
    standalone: bool,

    /// Seed a standalone user as `id:username`; its token is `dev-<id>`.
    #[arg(long = "dev-user", value_parser = parse_dev_user, requires = "standalone")]
    dev_users: Vec<DevUser>,
}

/// A user seeded into the in-memory marketplace.
#[derive(Clone, Debug, PartialEq, Eq)]
struct DevUser {
    id: UserId,
    username: String,
}

impl DevUser {
    fn token(&self) -> String {
        format!("dev-{}", self.id)
    }
}

fn parse_dev_user(raw: &str) -> Result<DevUser, String> {
    let (id, username) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected id:username, got {raw:?}"))?;
    let id: i64 = id
        .trim()
        .parse()
        .map_err(|e| format!("invalid user id {id:?}: {e}"))?;
    let username = username.trim();
    if username.is_empty() {
        return Err("username must not be empty".into());
    }
    Ok(DevUser {
        id: UserId::new(id),
        username: username.to_owned(),
    })
}

fn load_settings(cli: &Cli) -> Result<BazaarSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(bazaar_settings::settings_path);
    let mut settings = bazaar_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    Ok(settings)
}

fn build_collaborators(cli: &Cli, settings: &BazaarSettings) -> Result<Collaborators> {
    if cli.standalone {
        let market = Arc::new(InMemoryMarketplace::new());
        for user in &cli.dev_users {
            let token = user.token();
            tracing::info!(user_id = %user.id, username = %user.username, %token, "dev user seeded");
            market.add_user_with_token(
                UserIdentity::new(user.id, user.username.clone(), Role::User),
                token,
            );
        }
        tracing::warn!("standalone mode: collaborators are in-memory, nothing is persisted");
        return Ok(Collaborators::in_memory(market));
    }

    let tokens = JwtTokenValidator::new(&settings.auth.jwt_secret, settings.auth.issuer.as_deref())
        .context("Invalid auth settings (set auth.jwtSecret or BAZAAR_JWT_SECRET)")?;
    let client = MarketplaceClient::new(
        settings.marketplace.base_url.clone(),
        settings.marketplace.api_key.clone(),
        settings.marketplace.timeout(),
    )
    .context("Failed to build marketplace client")?;
    tracing::info!(base_url = client.base_url(), "using marketplace API");
    Ok(Collaborators::remote(tokens, client))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;
    bazaar_logging::init_logging(&settings.logging);

    let services = build_collaborators(&cli, &settings)?;
    let mut server = BazaarServer::new(ServerConfig::from(&settings), services);
    match bazaar_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
    }

    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Bazaar listening on http://{}", handle.addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let outcome = server.shutdown(handle).await;
    tracing::info!(clean = outcome.is_clean(), "Shutdown complete");
    Ok(())
}
