//! OpenID Connect authorization-code client
//!
//! Discovery, authorization redirect (with PKCE and nonce), code exchange
//! and profile retrieval against a single configured authority.

use super::ProviderError;
use crate::activity::TokenGrant;
use crate::db::PendingSignIn;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

/// Client registration and authority settings
#[derive(Debug, Clone)]
pub struct OidcSettings {
    /// e.g. `https://login.microsoftonline.com/common`
    pub authority: String,
    /// Appended to the authority to find the discovery document
    pub metadata_path: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OidcSettings {
    pub fn discovery_url(&self) -> String {
        format!(
            "{}{}",
            self.authority.trim_end_matches('/'),
            self.metadata_path
        )
    }

    /// Space separated scopes, always including `openid`
    pub fn scope(&self) -> String {
        let mut scopes: Vec<&str> = self.scopes.iter().map(String::as_str).collect();
        if !scopes.contains(&"openid") {
            scopes.insert(0, "openid");
        }
        scopes.join(" ")
    }
}

/// Endpoints from the provider's discovery document
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// The two provider round trips the sign-in routes need
#[async_trait]
pub trait OidcBackend: Send + Sync {
    /// Where to send the browser to start `pending`
    async fn authorization_url(&self, pending: &PendingSignIn) -> Result<String, ProviderError>;

    /// Exchange an authorization code for the user's profile and token
    async fn redeem(&self, code: &str, pending: &PendingSignIn)
        -> Result<TokenGrant, ProviderError>;
}

pub struct OidcClient {
    http: Client,
    settings: OidcSettings,
    metadata: OnceCell<ProviderMetadata>,
}

impl OidcClient {
    pub fn new(settings: OidcSettings) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            settings,
            metadata: OnceCell::new(),
        })
    }

    /// Skip discovery, for providers without a discovery document
    pub fn with_metadata(settings: OidcSettings, metadata: ProviderMetadata) -> Result<Self, ProviderError> {
        let client = Self::new(settings)?;
        client
            .metadata
            .set(metadata)
            .map_err(|e| ProviderError::invalid_response(e.to_string()))?;
        Ok(client)
    }

    async fn metadata(&self) -> Result<&ProviderMetadata, ProviderError> {
        self.metadata
            .get_or_try_init(|| async {
                let url = self.settings.discovery_url();
                tracing::info!(url = %url, "Fetching OIDC discovery document");
                let response = self.http.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(ProviderError::network(format!(
                        "Discovery failed: HTTP {}",
                        response.status()
                    )));
                }
                Ok::<_, ProviderError>(response.json::<ProviderMetadata>().await?)
            })
            .await
    }

    async fn user_info(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::rejected(format!(
                "Userinfo request failed: HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl OidcBackend for OidcClient {
    async fn authorization_url(&self, pending: &PendingSignIn) -> Result<String, ProviderError> {
        let metadata = self.metadata().await?;
        let scope = self.settings.scope();
        let challenge = pending.code_challenge();
        let url = Url::parse_with_params(
            &metadata.authorization_endpoint,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("response_type", "code"),
                ("response_mode", "form_post"),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", pending.state.as_str()),
                ("nonce", pending.nonce.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("prompt", "login"),
            ],
        )
        .map_err(|e| ProviderError::invalid_response(format!("Bad authorization endpoint: {e}")))?;
        Ok(url.into())
    }

    async fn redeem(
        &self,
        code: &str,
        pending: &PendingSignIn,
    ) -> Result<TokenGrant, ProviderError> {
        let metadata = self.metadata().await?;
        let params = [
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];

        tracing::debug!(issuer = %metadata.issuer, "Exchanging authorization code");
        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Token exchange failed");
            return Err(ProviderError::rejected(format!(
                "Token exchange failed: HTTP {status}"
            )));
        }
        let tokens: TokenEndpointResponse = response.json().await?;

        let mut profile = match &tokens.id_token {
            Some(id_token) => {
                let claims = decode_id_token_claims(id_token)?;
                verify_nonce(&claims, &pending.nonce)?;
                claims
            }
            None => Map::new(),
        };
        if let Some(endpoint) = &metadata.userinfo_endpoint {
            profile.extend(self.user_info(endpoint, &tokens.access_token).await?);
        }

        grant_from_profile(profile, tokens.access_token, tokens.expires_in)
    }
}

/// Payload of a JWT, without signature verification (the token came
/// straight from the token endpoint over TLS)
pub fn decode_id_token_claims(id_token: &str) -> Result<Map<String, Value>, ProviderError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| ProviderError::invalid_response("Malformed id_token"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ProviderError::invalid_response(format!("Malformed id_token: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::invalid_response(format!("Malformed id_token claims: {e}")))
}

fn verify_nonce(claims: &Map<String, Value>, expected: &str) -> Result<(), ProviderError> {
    match claims.get("nonce").and_then(Value::as_str) {
        Some(nonce) if nonce == expected => Ok(()),
        _ => Err(ProviderError::invalid_response("id_token nonce mismatch")),
    }
}

/// Subject id is the `oid` claim when present (stable across apps), else `sub`
pub fn grant_from_profile(
    profile: Map<String, Value>,
    access_token: String,
    expires_in: Option<i64>,
) -> Result<TokenGrant, ProviderError> {
    let subject_id = ["oid", "sub"]
        .iter()
        .find_map(|claim| profile.get(*claim).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::invalid_response("No OID found in user profile"))?
        .to_string();

    Ok(TokenGrant {
        subject_id,
        profile,
        token: access_token,
        expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
    })
}
