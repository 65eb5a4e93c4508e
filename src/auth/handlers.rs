use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RegisterRequest},
        error::{AuthError, StoreError},
        extractors::AuthUser,
        repo::with_deadline,
        repo_types::User,
        services::{is_valid_email, is_valid_username, SessionIssuer, SessionRefresher},
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh-token", post(refresh))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/api/hello", get(hello))
}

// Body rejections (bad JSON, missing fields, wrong content type) all
// count as malformed input, not unprocessable entities.
fn malformed_body(rejection: JsonRejection) -> AuthError {
    warn!(error = %rejection, "malformed request body");
    AuthError::Validation("Invalid request payload".into())
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, &'static str), AuthError> {
    let Json(mut payload) = payload.map_err(malformed_body)?;
    payload.username = payload.username.trim().to_string();
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_username(&payload.username) {
        warn!(username = %payload.username, "invalid username");
        return Err(AuthError::Validation("Invalid username".into()));
    }

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }

    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }

    let hash = state.hasher.hash(&payload.password).map_err(|e| {
        error!(error = %e, "hash_password failed");
        AuthError::Store(StoreError::Internal(e))
    })?;

    let user = match with_deadline(
        state.store_deadline(),
        User::create(&state.db, &payload.username, &hash, &payload.email),
    )
    .await
    {
        Ok(u) => u,
        Err(StoreError::Conflict) => {
            warn!(username = %payload.username, "username already registered");
            return Err(AuthError::Store(StoreError::Conflict));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(AuthError::Store(e));
        }
    };

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, "User created successfully"))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let Json(payload) = payload.map_err(malformed_body)?;
    let issuer = SessionIssuer::from_ref(&state);
    let tokens = issuer.login(&payload.username, &payload.password).await?;
    Ok(Json(LoginResponse {
        token: tokens.access,
        refresh: tokens.refresh,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let Json(payload) = payload.map_err(malformed_body)?;
    let refresher = SessionRefresher::from_ref(&state);
    let token = refresher.refresh(&payload.refresh_token).await?;
    Ok(Json(RefreshResponse { token }))
}

#[instrument]
pub async fn hello(AuthUser(username): AuthUser) -> String {
    format!("Hello, {}!", username)
}
