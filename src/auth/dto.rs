use serde::{Deserialize, Serialize};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response returned after login: short-lived access token plus the
/// opaque refresh token backing the session.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub refresh: String,
}

/// Response returned after refresh: a new access token only.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token: String,
}
