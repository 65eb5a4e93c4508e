use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use time::Duration as TimeDuration;
use tracing::{info, warn};

use crate::auth::error::{AuthError, StoreError};
use crate::auth::jwt::JwtKeys;
use crate::auth::password::CredentialHasher;
use crate::auth::repo::with_deadline;
use crate::auth::repo_types::{RefreshToken, User};
use crate::state::AppState;

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Token pair handed out on login.
pub struct SessionTokens {
    pub access: String,
    pub refresh: String,
}

/// Login orchestration: verify credentials, mint the access token,
/// rotate the stored refresh token.
#[derive(Clone)]
pub struct SessionIssuer {
    db: PgPool,
    keys: JwtKeys,
    hasher: Arc<dyn CredentialHasher>,
    refresh_ttl: TimeDuration,
    deadline: Duration,
}

impl FromRef<AppState> for SessionIssuer {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            keys: JwtKeys::from_ref(state),
            hasher: state.hasher.clone(),
            refresh_ttl: TimeDuration::hours(state.config.refresh_ttl_hours),
            deadline: state.store_deadline(),
        }
    }
}

impl SessionIssuer {
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionTokens, AuthError> {
        let verified = match with_deadline(
            self.deadline,
            User::verify_credentials(&self.db, self.hasher.as_ref(), username, password),
        )
        .await
        {
            Ok(v) => v,
            Err(StoreError::NotFound) => {
                warn!(%username, "login for unknown username");
                return Err(AuthError::AuthenticationFailed);
            }
            Err(e) => return Err(AuthError::Store(e)),
        };

        if !verified {
            warn!(%username, "login with wrong password");
            return Err(AuthError::AuthenticationFailed);
        }

        // Credentials checked out; everything past this point is an
        // internal fault, never blamed on the caller.
        let access = self.keys.sign(username).map_err(AuthError::Issuance)?;
        let refresh = RefreshToken::generate();
        with_deadline(
            self.deadline,
            RefreshToken::rotate(&self.db, username, &refresh, self.refresh_ttl),
        )
        .await
        .map_err(|e| AuthError::Issuance(e.into()))?;

        info!(%username, "session issued");
        Ok(SessionTokens { access, refresh })
    }
}

/// Renewal orchestration: resolve the token's owner, re-validate it,
/// mint a new access token.
#[derive(Clone)]
pub struct SessionRefresher {
    db: PgPool,
    keys: JwtKeys,
    deadline: Duration,
}

impl FromRef<AppState> for SessionRefresher {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db: state.db.clone(),
            keys: JwtKeys::from_ref(state),
            deadline: state.store_deadline(),
        }
    }
}

impl SessionRefresher {
    pub async fn refresh(&self, token: &str) -> Result<String, AuthError> {
        let username =
            match with_deadline(self.deadline, RefreshToken::resolve_owner(&self.db, token)).await {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "refresh token did not resolve to a user");
                    return Err(AuthError::InvalidRefreshToken);
                }
            };

        // Redundant with resolution on purpose: both lookups must
        // independently see the token live before a new access token is
        // minted, so a rotation committing in between still wins.
        let valid = with_deadline(
            self.deadline,
            RefreshToken::validate(&self.db, &username, token),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, %username, "refresh token validation errored");
            AuthError::InvalidRefreshToken
        })?;

        if !valid {
            warn!(%username, "refresh token revoked, expired or unknown");
            return Err(AuthError::InvalidRefreshToken);
        }

        // The refresh token itself is not rotated here; it stays valid
        // until its own expiry or until the next login rotates it.
        let access = self.keys.sign(&username).map_err(AuthError::Issuance)?;
        info!(%username, "access token renewed");
        Ok(access)
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn accepts_reasonable_usernames() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("bob_42"));
        assert!(is_valid_username("first.last-x"));
    }

    #[test]
    fn rejects_bad_usernames() {
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("way@wrong"));
        assert!(!is_valid_username(&"x".repeat(65)));
    }

    #[test]
    fn validates_emails() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.domain.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("sp ace@x.com"));
    }
}
