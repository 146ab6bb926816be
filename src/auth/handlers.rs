use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{IssuedToken, LoginRequest, PublicUser, RegisterRequest, Session, TokenRequest},
        error::AuthError,
        extractors::AuthUser,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/token", post(issue_token))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

/// Map a service error onto a status code and a client-safe message.
pub(crate) fn reject(e: AuthError) -> (StatusCode, String) {
    match e {
        AuthError::DuplicateIdentity => (StatusCode::CONFLICT, e.to_string()),
        AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials".into()),
        AuthError::TokenInvalid => (StatusCode::UNAUTHORIZED, "Invalid or expired token".into()),
        AuthError::UserNotFound => (StatusCode::UNAUTHORIZED, "User not found".into()),
        AuthError::NotFound => (StatusCode::NOT_FOUND, "Not found".into()),
        AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
        AuthError::Internal(inner) => {
            error!(error = ?inner, "internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into())
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    let user = state
        .auth
        .register(&payload.name, &payload.identity, &payload.password)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<Session>, (StatusCode, String)> {
    let session = state
        .auth
        .login(&payload.identity, &payload.password)
        .await
        .map_err(reject)?;
    Ok(Json(session))
}

#[instrument(skip(state, payload))]
pub async fn issue_token(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Option<Json<TokenRequest>>,
) -> Result<Json<IssuedToken>, (StatusCode, String)> {
    let ttl = payload
        .and_then(|Json(req)| req.ttl_seconds)
        .map(Duration::from_secs);
    let issued = state.auth.issue_token(user_id, ttl).await.map_err(reject)?;
    Ok(Json(issued))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, (StatusCode, String)> {
    let user = state.auth.find_user(user_id).await.map_err(|e| match e {
        AuthError::NotFound => reject(AuthError::UserNotFound),
        other => reject(other),
    })?;
    Ok(Json(user))
}
