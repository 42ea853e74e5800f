//! API request and response types

use crate::activity::Activity;
use serde::{Deserialize, Serialize};

/// Body returned for `expectReplies` deliveries
#[derive(Debug, Serialize, Deserialize)]
pub struct ExpectedReplies {
    pub activities: Vec<Activity>,
}

/// Query for `GET /auth/signin`
#[derive(Debug, Deserialize)]
pub struct SignInQuery {
    /// Pending sign-in issued by a conversation prompt; absent for a
    /// browser-only login
    pub state: Option<String>,
}

/// Form the provider posts to `/auth/callback` (`response_mode=form_post`)
#[derive(Debug, Deserialize)]
pub struct CallbackForm {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Generic error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
