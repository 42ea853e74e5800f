//! Process configuration from environment variables

use crate::auth::{OidcSettings, ProviderMetadata};
use crate::runtime::DEFAULT_PROMPT_TIMEOUT_SECS;
use chrono::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3978;
pub const DEFAULT_METADATA_PATH: &str = "/.well-known/openid-configuration";
/// Opens a process-scoped sqlite database instead of a file
pub const IN_MEMORY_DB: &str = ":memory:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("Missing required dependency: {0}")]
    MissingDependency(&'static str),
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub oidc: OidcSettings,
    /// Fixed endpoints for providers without a discovery document
    pub static_metadata: Option<ProviderMetadata>,
    /// Externally reachable base URL, used in sign-in card links
    pub public_url: String,
    pub port: u16,
    pub db_path: String,
    pub prompt_timeout: Duration,
    pub connection_name: Option<String>,
    /// Bearer token for proactive posts to the channel's service URL
    pub channel_auth_token: Option<String>,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let port = match get("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let timeout_secs = match get("SIGNIN_TIMEOUT_SECS") {
            Some(value) => match value.parse::<i64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SIGNIN_TIMEOUT_SECS",
                        value,
                    })
                }
            },
            None => DEFAULT_PROMPT_TIMEOUT_SECS,
        };

        let public_url = get("BOT_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let oidc = OidcSettings {
            authority: require("OAUTH_AUTHORITY")?,
            metadata_path: get("OAUTH_ID_METADATA")
                .unwrap_or_else(|| DEFAULT_METADATA_PATH.to_string()),
            client_id: require("OAUTH_APP_ID")?,
            client_secret: require("OAUTH_APP_PASSWORD")?,
            redirect_uri: get("OAUTH_REDIRECT_URI")
                .unwrap_or_else(|| format!("{public_url}/auth/callback")),
            scopes: get("OAUTH_SCOPES")
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
        };

        let static_metadata = match (
            get("OAUTH_AUTHORIZATION_ENDPOINT"),
            get("OAUTH_TOKEN_ENDPOINT"),
        ) {
            (Some(authorization_endpoint), Some(token_endpoint)) => Some(ProviderMetadata {
                issuer: oidc.authority.clone(),
                authorization_endpoint,
                token_endpoint,
                userinfo_endpoint: get("OAUTH_USERINFO_ENDPOINT"),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("OAUTH_TOKEN_ENDPOINT")),
            (None, Some(_)) => return Err(ConfigError::Missing("OAUTH_AUTHORIZATION_ENDPOINT")),
        };

        Ok(Self {
            oidc,
            static_metadata,
            public_url,
            port,
            db_path: get("BOT_DB_PATH").unwrap_or_else(|| IN_MEMORY_DB.to_string()),
            prompt_timeout: Duration::seconds(timeout_secs),
            connection_name: get("CONNECTION_NAME"),
            channel_auth_token: get("CHANNEL_AUTH_TOKEN"),
        })
    }

    pub fn uses_in_memory_db(&self) -> bool {
        self.db_path == IN_MEMORY_DB
    }
}
