//! PostgreSQL store implementation.
//!
//! Uses sqlx with runtime-checked queries over a shared pool. Counter updates
//! and the reset-completion transaction rely on the database's native
//! atomicity; no in-process locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{FederatedIdentity, LoginAttempt, PasswordResetToken, Session, User};
use crate::services::store::{AuthStore, StoreError};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuthStore for Database {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, username, email, email_verified, password_hash,
                failed_login_count, locked_until, session_token,
                session_expires_utc, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.password_hash)
        .bind(user.failed_login_count)
        .bind(user.locked_until)
        .bind(&user.session_token)
        .bind(user.session_expires_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET failed_login_count = failed_login_count + 1,
                locked_until = CASE
                    WHEN failed_login_count + 1 >= $2 THEN $3
                    ELSE locked_until
                END,
                updated_utc = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(threshold)
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = 0, locked_until = NULL, updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_session_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET session_token = $2, session_expires_utc = $3, updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(expires_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_email_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET email_verified = $2, updated_utc = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(verified)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        password_hash: &str,
        token_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                failed_login_count = 0,
                locked_until = NULL,
                session_token = NULL,
                session_expires_utc = NULL,
                updated_utc = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        // Token marking goes last so a partial failure leaves the token
        // retriable instead of consumed with nothing applied.
        sqlx::query("UPDATE password_reset_tokens SET used_utc = NOW() WHERE token_id = $1")
            .bind(token_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (attempt_id, identifier, succeeded, client_ip, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(attempt.attempt_id)
        .bind(&attempt.identifier)
        .bind(attempt.succeeded)
        .bind(&attempt.client_ip)
        .bind(attempt.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_attempts_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM login_attempts WHERE identifier = $1 AND created_utc >= $2",
        )
        .bind(identifier)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE created_utc < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens
                (token_id, token, user_id, created_utc, expires_utc, used_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.token_id)
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.created_utc)
        .bind(token.expires_utc)
        .bind(token.used_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        let row = sqlx::query_as::<_, PasswordResetToken>(
            "SELECT * FROM password_reset_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn invalidate_reset_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE password_reset_tokens SET used_utc = NOW() WHERE user_id = $1 AND used_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_dead_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM password_reset_tokens WHERE used_utc IS NOT NULL OR expires_utc < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError> {
        let row = sqlx::query_as::<_, FederatedIdentity>(
            "SELECT * FROM federated_identities WHERE provider = $1 AND provider_user_id = $2",
        )
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_identities_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FederatedIdentity>, StoreError> {
        let rows = sqlx::query_as::<_, FederatedIdentity>(
            "SELECT * FROM federated_identities WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_identity(&self, identity: &FederatedIdentity) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO federated_identities (
                identity_id, user_id, provider, provider_user_id,
                provider_email, access_token_enc, refresh_token_enc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(identity.identity_id)
        .bind(identity.user_id)
        .bind(&identity.provider)
        .bind(&identity.provider_user_id)
        .bind(&identity.provider_email)
        .bind(&identity.access_token_enc)
        .bind(&identity.refresh_token_enc)
        .bind(identity.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_user_with_identity(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, username, email, email_verified, password_hash,
                failed_login_count, locked_until, session_token,
                session_expires_utc, created_utc, updated_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.password_hash)
        .bind(user.failed_login_count)
        .bind(user.locked_until)
        .bind(&user.session_token)
        .bind(user.session_expires_utc)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO federated_identities (
                identity_id, user_id, provider, provider_user_id,
                provider_email, access_token_enc, refresh_token_enc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(identity.identity_id)
        .bind(identity.user_id)
        .bind(&identity.provider)
        .bind(&identity.provider_user_id)
        .bind(&identity.provider_email)
        .bind(&identity.access_token_enc)
        .bind(&identity.refresh_token_enc)
        .bind(identity.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_identity(&self, user_id: Uuid, provider: &str) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM federated_identities WHERE user_id = $1 AND provider = $2")
                .bind(user_id)
                .bind(provider)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, oauth_state, created_utc, expires_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                oauth_state = EXCLUDED.oauth_state,
                expires_utc = EXCLUDED.expires_utc
            "#,
        )
        .bind(&session.session_id)
        .bind(session.user_id)
        .bind(&session.oauth_state)
        .bind(session.created_utc)
        .bind(session.expires_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
