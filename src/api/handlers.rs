//! HTTP request handlers

use super::types::{CallbackForm, ErrorResponse, ExpectedReplies, SignInQuery};
use super::AppState;
use crate::activity::{Activity, ConversationRef, TokenGrant};
use crate::auth::{ProviderError, ProviderErrorKind, SESSION_COOKIE};
use crate::db::PendingSignIn;
use crate::directory::AccessToken;
use crate::runtime::{TurnError, TurnOutcome};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/version", get(get_version))
        // Channel webhook
        .route("/api/messages", post(receive_activity))
        // Browser sign-in
        .route("/auth/signin", get(begin_sign_in))
        .route("/auth/callback", post(sign_in_callback))
        .route("/auth/signout", get(sign_out))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Pages
// ============================================================

async fn home(State(state): State<AppState>, jar: CookieJar) -> Html<String> {
    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.get(cookie.value()));

    let body = match session {
        Some(session) => {
            let name = session.display_name.as_deref().unwrap_or(&session.subject_id);
            format!(
                "<p>Signed in as {}.</p><p><a href=\"/auth/signout\">Sign out</a></p>",
                escape_html(name)
            )
        }
        None => "<p>Not signed in.</p><p><a href=\"/auth/signin\">Sign in</a></p>".to_string(),
    };
    Html(format!(
        "<!doctype html><html><head><title>Sign-in bot</title></head><body>{body}</body></html>"
    ))
}

async fn get_version() -> &'static str {
    concat!("signin_bot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Channel Webhook
// ============================================================

async fn receive_activity(
    State(state): State<AppState>,
    Json(activity): Json<Activity>,
) -> Result<Response, AppError> {
    let expects_replies = activity.expects_replies();
    let outcome = state.processor.process(activity).await.map_err(|e| match e {
        TurnError::MissingConversation => AppError::BadRequest(e.to_string()),
        other => AppError::Internal(other.to_string()),
    })?;

    if expects_replies {
        return Ok(Json(ExpectedReplies {
            activities: outcome.outbound,
        })
        .into_response());
    }

    deliver(&state, &outcome).await;
    Ok(StatusCode::OK.into_response())
}

/// Push a turn's replies to the channel; failures are logged, the turn
/// itself has already been saved
async fn deliver(state: &AppState, outcome: &TurnOutcome) {
    if let Err(e) = state
        .connector
        .deliver(&outcome.conversation, &outcome.outbound)
        .await
    {
        tracing::error!(
            conv_id = %outcome.conversation.conversation_id,
            error = %e,
            "Failed to deliver replies"
        );
    }
}

// ============================================================
// Browser Sign-in
// ============================================================

async fn begin_sign_in(
    State(state): State<AppState>,
    Query(query): Query<SignInQuery>,
) -> Result<Redirect, AppError> {
    let pending = match query.state {
        Some(key) => {
            let pending = state
                .db
                .get_pending_sign_in(&key)
                .map_err(|e| AppError::Internal(e.to_string()))?
                .ok_or_else(|| AppError::NotFound("Unknown sign-in request".to_string()))?;
            if pending.is_expired(Utc::now(), state.processor.prompt_timeout()) {
                return Err(AppError::BadRequest("Sign-in request expired".to_string()));
            }
            pending
        }
        None => {
            let pending = PendingSignIn::new(None);
            state
                .db
                .purge_pending_sign_ins(Utc::now() - state.processor.prompt_timeout())
                .and_then(|_| state.db.insert_pending_sign_in(&pending))
                .map_err(|e| AppError::Internal(e.to_string()))?;
            pending
        }
    };

    let url = state
        .oidc
        .authorization_url(&pending)
        .await
        .map_err(AppError::from)?;
    tracing::info!(
        conversation_bound = pending.conversation.is_some(),
        "Redirecting to identity provider"
    );
    Ok(Redirect::to(&url))
}

async fn sign_in_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<CallbackForm>,
) -> Result<(CookieJar, Redirect), AppError> {
    let key = form
        .state
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing state".to_string()))?;
    let pending = state
        .db
        .take_pending_sign_in(key)
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::BadRequest("Unknown sign-in request".to_string()))?;

    let result = redeem(&state, &form, &pending).await;
    if let Err(e) = &result {
        tracing::warn!(kind = ?e.kind, error = %e, "Sign-in failed");
    }

    match &pending.conversation {
        Some(conversation) => resume_conversation(&state, conversation, result.as_ref().ok()).await?,
        None => {
            if let Ok(grant) = &result {
                record_user(&state, grant)?;
            }
        }
    }

    let grant = result?;
    let session_id = state
        .sessions
        .create(&grant.subject_id, grant.display_name());
    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true);
    tracing::info!(subject_id = %grant.subject_id, "Browser session started");

    Ok((jar.add(cookie), Redirect::to("/")))
}

async fn redeem(
    state: &AppState,
    form: &CallbackForm,
    pending: &PendingSignIn,
) -> Result<TokenGrant, ProviderError> {
    if let Some(error) = &form.error {
        let description = form.error_description.as_deref().unwrap_or_default();
        return Err(ProviderError::rejected(format!("{error}: {description}")));
    }
    if pending.is_expired(Utc::now(), state.processor.prompt_timeout()) {
        return Err(ProviderError::expired("Sign-in request expired"));
    }
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| ProviderError::rejected("Missing authorization code"))?;
    state.oidc.redeem(code, pending).await
}

/// Hand the outcome to the waiting conversation as a token delivery
async fn resume_conversation(
    state: &AppState,
    conversation: &ConversationRef,
    grant: Option<&TokenGrant>,
) -> Result<(), AppError> {
    let activity = Activity::token_response(conversation, grant);
    let outcome = state
        .processor
        .process(activity)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    deliver(state, &outcome).await;

    tracing::info!(
        conv_id = %conversation.conversation_id,
        success = grant.is_some(),
        still_waiting = outcome.state.dialog.waiting_for_token(),
        known_users = state.directory.len(),
        "Resumed conversation after sign-in"
    );
    Ok(())
}

fn record_user(state: &AppState, grant: &TokenGrant) -> Result<(), AppError> {
    state
        .directory
        .put(
            &grant.subject_id,
            grant.profile.clone(),
            AccessToken::new(grant.token.clone(), grant.expires_at),
        )
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn sign_out(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.destroy(cookie.value()) {
            tracing::info!(subject_id = %session.subject_id, "Browser session ended");
        }
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::to("/"))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e.kind {
            ProviderErrorKind::Rejected | ProviderErrorKind::Expired => {
                AppError::Unauthorized(e.message)
            }
            ProviderErrorKind::Network | ProviderErrorKind::InvalidResponse => {
                AppError::BadGateway(e.message)
            }
            ProviderErrorKind::Storage => AppError::Internal(e.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
