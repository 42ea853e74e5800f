//! HTTP surface: the channel webhook and the browser sign-in routes

mod handlers;
mod types;

pub use handlers::create_router;

use crate::auth::{OidcBackend, SessionStore};
use crate::db::Database;
use crate::directory::UserDirectory;
use crate::runtime::{ChannelConnector, TurnProcessor};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<TurnProcessor>,
    pub connector: Arc<dyn ChannelConnector>,
    pub oidc: Arc<dyn OidcBackend>,
    pub db: Database,
    pub directory: Arc<UserDirectory>,
    pub sessions: Arc<SessionStore>,
}
