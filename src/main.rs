//! Sign-in bot
//!
//! A conversational webhook that prompts users to sign in through an OpenID
//! Connect provider and resumes the conversation when the token arrives.

mod activity;
mod api;
mod auth;
mod config;
mod db;
mod dialog;
mod directory;
mod runtime;

use api::{create_router, AppState};
use auth::{OidcBackend, OidcClient, OidcIdentityProvider, SessionStore};
use chrono::Utc;
use config::BotConfig;
use db::Database;
use directory::UserDirectory;
use runtime::{DatabaseStateStore, HttpConnector, TurnProcessor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signin_bot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = BotConfig::from_env()?;

    let db = if config.uses_in_memory_db() {
        tracing::info!("Using in-memory database");
        Database::open_in_memory()?
    } else {
        if let Some(parent) = PathBuf::from(&config.db_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %config.db_path, "Opening database");
        Database::open(&config.db_path)?
    };

    // Requests older than the prompt timeout can never be redeemed
    let purged = db.purge_pending_sign_ins(Utc::now() - config.prompt_timeout)?;
    if purged > 0 {
        tracing::info!(purged, "Dropped expired sign-in requests");
    }

    let oidc: Arc<dyn OidcBackend> = match config.static_metadata.clone() {
        Some(metadata) => Arc::new(OidcClient::with_metadata(config.oidc.clone(), metadata)?),
        None => Arc::new(OidcClient::new(config.oidc.clone())?),
    };
    tracing::info!(
        authority = %config.oidc.authority,
        client_id = %config.oidc.client_id,
        scope = %config.oidc.scope(),
        connection = config.connection_name.as_deref().unwrap_or("default"),
        "Identity provider configured"
    );

    // Directory lives for the process and is shared by every conversation
    let directory = Arc::new(UserDirectory::new());
    let mut provider = OidcIdentityProvider::new(db.clone(), directory.clone(), &config.public_url)
        .with_prompt_timeout(config.prompt_timeout);
    if let Some(name) = &config.connection_name {
        provider = provider.with_connection(name);
    }
    let processor = TurnProcessor::builder()
        .state_store(Arc::new(DatabaseStateStore::new(db.clone())))
        .identity_provider(Arc::new(provider))
        .directory(directory.clone())
        .prompt_timeout(config.prompt_timeout)
        .build()?;

    let state = AppState {
        processor: Arc::new(processor),
        connector: Arc::new(HttpConnector::new(config.channel_auth_token.clone())?),
        oidc,
        db,
        directory,
        sessions: Arc::new(SessionStore::new()),
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(public_url = %config.public_url, "Sign-in bot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
