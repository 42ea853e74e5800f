//! Identity provider integration
//!
//! OIDC client, the provider the dialog prompts through, and browser sessions.

mod error;
mod oidc;
mod provider;
mod session;

pub use error::{ProviderError, ProviderErrorKind};
pub use oidc::{OidcBackend, OidcClient, OidcSettings, ProviderMetadata};
pub use provider::OidcIdentityProvider;
pub use session::{SessionStore, SESSION_COOKIE};
