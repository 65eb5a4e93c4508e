use std::future::Future;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sqlx::PgPool;
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::auth::error::StoreError;
use crate::auth::password::CredentialHasher;
use crate::auth::repo_types::{RefreshToken, User};

/// Bounds a store operation by the caller's deadline. On expiry the
/// operation fails cleanly; no partial effect may be assumed.
pub async fn with_deadline<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, op)
        .await
        .map_err(|_| StoreError::Timeout)?
}

impl User {
    /// Find a user by username.
    pub async fn find_by_username(db: &PgPool, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Create a new user with an already-hashed password.
    pub async fn create(
        db: &PgPool,
        username: &str,
        password_hash: &str,
        email: &str,
    ) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, email)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(email)
        .fetch_one(db)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a username/password pair against the stored hash.
    /// `NotFound` when no such user; the caller collapses that with a
    /// wrong password before anything reaches the client.
    pub async fn verify_credentials(
        db: &PgPool,
        hasher: &dyn CredentialHasher,
        username: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        let user = Self::find_by_username(db, username)
            .await?
            .ok_or(StoreError::NotFound)?;
        hasher
            .verify(password, &user.password_hash)
            .map_err(StoreError::Internal)
    }
}

impl RefreshToken {
    /// 32 bytes from a CSPRNG, base64url-encoded. Collisions are not
    /// checked; the probability is negligible at this size.
    pub fn generate() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Base64UrlUnpadded::encode_string(&bytes)
    }

    /// Replace the user's active refresh token: revoke every live row,
    /// insert the new one, in a single transaction. Either both steps
    /// commit or neither does, so at most one non-revoked, non-expired
    /// row per user exists at any committed instant.
    pub async fn rotate(
        db: &PgPool,
        username: &str,
        token: &str,
        ttl: TimeDuration,
    ) -> Result<(), StoreError> {
        let mut tx = db.begin().await?;

        sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked = TRUE
            WHERE revoked = FALSE
              AND user_id = (SELECT id FROM users WHERE username = $1)
            "#,
        )
        .bind(username)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token, expires_at)
            SELECT id, $2, $3 FROM users WHERE username = $1
            "#,
        )
        .bind(username)
        .bind(token)
        .bind(OffsetDateTime::now_utc() + ttl)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // unknown user; dropping tx rolls the revoke back
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    /// True only when a live row exists for this user and the stored
    /// token string equals the supplied one (guards against any
    /// lookup-by-prefix mishap in the query layer).
    pub async fn validate(db: &PgPool, username: &str, token: &str) -> Result<bool, StoreError> {
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            SELECT rt.token
            FROM refresh_tokens rt
            JOIN users u ON u.id = rt.user_id
            WHERE rt.token = $1
              AND u.username = $2
              AND rt.revoked = FALSE
              AND rt.expires_at > now()
            "#,
        )
        .bind(token)
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(matches!(stored, Some(s) if s == token))
    }

    /// Resolve which user a live refresh token belongs to.
    pub async fn resolve_owner(db: &PgPool, token: &str) -> Result<String, StoreError> {
        let username: Option<String> = sqlx::query_scalar(
            r#"
            SELECT u.username
            FROM users u
            JOIN refresh_tokens rt ON rt.user_id = u.id
            WHERE rt.token = $1
              AND rt.revoked = FALSE
              AND rt.expires_at > now()
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        username.ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_are_base64url() {
        let token = RefreshToken::generate();
        // 32 bytes -> 43 chars unpadded
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn generated_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..64).map(|_| RefreshToken::generate()).collect();
        assert_eq!(tokens.len(), 64);
    }

    #[tokio::test]
    async fn deadline_expiry_maps_to_timeout() {
        let result = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn deadline_passes_value_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok(7usize) }).await;
        assert!(matches!(result, Ok(7)));
    }
}

#[cfg(test)]
mod db_tests {
    use super::*;

    async fn seed_user(pool: &PgPool, username: &str) {
        User::create(
            pool,
            username,
            "argon2id-placeholder-hash",
            &format!("{username}@example.com"),
        )
        .await
        .expect("seed user");
    }

    #[sqlx::test]
    async fn rotation_revokes_the_previous_token(pool: PgPool) {
        seed_user(&pool, "alice").await;

        let t1 = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &t1, TimeDuration::hours(24))
            .await
            .unwrap();
        assert!(RefreshToken::validate(&pool, "alice", &t1).await.unwrap());

        let t2 = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &t2, TimeDuration::hours(24))
            .await
            .unwrap();
        assert!(!RefreshToken::validate(&pool, "alice", &t1).await.unwrap());
        assert!(RefreshToken::validate(&pool, "alice", &t2).await.unwrap());
    }

    #[sqlx::test]
    async fn expired_token_fails_validation_even_when_not_revoked(pool: PgPool) {
        seed_user(&pool, "alice").await;

        let token = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &token, TimeDuration::hours(-1))
            .await
            .unwrap();
        assert!(!RefreshToken::validate(&pool, "alice", &token).await.unwrap());
        assert!(matches!(
            RefreshToken::resolve_owner(&pool, &token).await,
            Err(StoreError::NotFound)
        ));
    }

    #[sqlx::test]
    async fn revoked_token_fails_validation_before_its_expiry(pool: PgPool) {
        seed_user(&pool, "alice").await;

        let t1 = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &t1, TimeDuration::hours(24))
            .await
            .unwrap();
        let t2 = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &t2, TimeDuration::hours(24))
            .await
            .unwrap();

        // t1 is nowhere near its expiry, only revoked
        assert!(!RefreshToken::validate(&pool, "alice", &t1).await.unwrap());
        assert!(matches!(
            RefreshToken::resolve_owner(&pool, &t1).await,
            Err(StoreError::NotFound)
        ));
    }

    #[sqlx::test]
    async fn resolve_owner_returns_the_owning_username(pool: PgPool) {
        seed_user(&pool, "alice").await;
        seed_user(&pool, "bob").await;

        let token = RefreshToken::generate();
        RefreshToken::rotate(&pool, "bob", &token, TimeDuration::hours(24))
            .await
            .unwrap();
        assert_eq!(
            RefreshToken::resolve_owner(&pool, &token).await.unwrap(),
            "bob"
        );
        assert!(matches!(
            RefreshToken::resolve_owner(&pool, &RefreshToken::generate()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[sqlx::test]
    async fn validate_is_scoped_to_the_owning_user(pool: PgPool) {
        seed_user(&pool, "alice").await;
        seed_user(&pool, "bob").await;

        let token = RefreshToken::generate();
        RefreshToken::rotate(&pool, "alice", &token, TimeDuration::hours(24))
            .await
            .unwrap();
        assert!(RefreshToken::validate(&pool, "alice", &token).await.unwrap());
        assert!(!RefreshToken::validate(&pool, "bob", &token).await.unwrap());
    }

    #[sqlx::test]
    async fn rotate_for_unknown_user_is_not_found(pool: PgPool) {
        let token = RefreshToken::generate();
        assert!(matches!(
            RefreshToken::rotate(&pool, "nobody", &token, TimeDuration::hours(24)).await,
            Err(StoreError::NotFound)
        ));
    }

    #[sqlx::test]
    async fn duplicate_username_is_a_conflict(pool: PgPool) {
        seed_user(&pool, "alice").await;
        let result = User::create(&pool, "alice", "other-hash", "a2@example.com").await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }
}
