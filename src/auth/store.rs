use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use uuid::Uuid;

use crate::auth::{AuthError, AuthResult};

const USER_COLUMNS: &str = "id, username, email, role, password_hash, email_confirmed, \
     confirm_token_hash, reset_token_hash, reset_expires_at, totp_secret, totp_enabled, \
     password_changed_at, last_login_at";

/// Full identity row. Never serialized; outward-facing projections go
/// through `PublicUser`.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub email_confirmed: bool,
    pub confirm_token_hash: Option<String>,
    pub reset_token_hash: Option<String>,
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub password_changed_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
}

/// Persisted identity store. The single source of truth per identity:
/// single-use token consumption is done with conditional UPDATEs so two
/// racing requests cannot both succeed.
#[derive(Debug, Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user: NewUser) -> AuthResult<UserRecord> {
        let query = format!(
            "INSERT INTO users (username, email, role, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.role)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        Ok(sqlx::query_as::<_, UserRecord>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_by_id(&self, id: i32) -> AuthResult<Option<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, UserRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Mark the matching unconfirmed identity as confirmed and clear the
    /// stored hash in one statement. Returns `None` when no identity
    /// matches, which covers unknown, already-used, and already-confirmed
    /// tokens alike.
    pub async fn consume_confirmation_token(&self, token_hash: &str) -> AuthResult<Option<i32>> {
        Ok(sqlx::query_scalar(
            "UPDATE users SET email_confirmed = TRUE, confirm_token_hash = NULL, \
             updated_at = NOW() \
             WHERE confirm_token_hash = $1 AND email_confirmed = FALSE RETURNING id",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn set_confirmation_token(&self, id: i32, token_hash: &str) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET confirm_token_hash = $1, email_confirmed = FALSE, \
             updated_at = NOW() WHERE id = $2",
        )
        .bind(token_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_confirmation_token(&self, id: i32) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET confirm_token_hash = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_reset_token(
        &self,
        id: i32,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET reset_token_hash = $1, reset_expires_at = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_reset_token(&self, id: i32) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET reset_token_hash = NULL, reset_expires_at = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically set the new password for the identity holding an
    /// unexpired reset token, clearing the token fields in the same
    /// statement. Of two racing calls with the same token exactly one
    /// gets a row back; the loser sees `None`.
    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<UserRecord>> {
        let query = format!(
            "UPDATE users SET password_hash = $2, password_changed_at = $3, \
             reset_token_hash = NULL, reset_expires_at = NULL, updated_at = NOW() \
             WHERE reset_token_hash = $1 AND reset_expires_at > $3 \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, UserRecord>(&query)
            .bind(token_hash)
            .bind(new_password_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn update_password(
        &self,
        id: i32,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET password_hash = $1, password_changed_at = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(new_password_hash)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_details(
        &self,
        id: i32,
        username: &str,
        email: &str,
    ) -> AuthResult<UserRecord> {
        let query = format!(
            "UPDATE users SET username = $1, email = $2, updated_at = NOW() \
             WHERE id = $3 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRecord>(&query)
            .bind(username)
            .bind(email)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique_violation)
    }

    pub async fn touch_last_login(&self, id: i32, now: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $1, updated_at = NOW() WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a freshly generated secret with enrollment not yet
    /// confirmed. Overwrites any prior unconfirmed enrollment.
    pub async fn set_totp_secret(&self, id: i32, secret: &str) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET totp_secret = $1, totp_enabled = FALSE, updated_at = NOW() \
             WHERE id = $2",
        )
        .bind(secret)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip an in-progress enrollment to enabled. Conditional on a secret
    /// being present so a stray confirm cannot enable 2FA with nothing to
    /// check codes against.
    pub async fn enable_totp(&self, id: i32) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET totp_enabled = TRUE, updated_at = NOW() \
             WHERE id = $1 AND totp_secret IS NOT NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_totp(&self, id: i32) -> AuthResult<()> {
        sqlx::query(
            "UPDATE users SET totp_secret = NULL, totp_enabled = FALSE, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> AuthResult<Vec<UserRecord>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        Ok(sqlx::query_as::<_, UserRecord>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Delete the identity. Session records cascade at the database;
    /// owned course/assignment/video cleanup belongs to the resource
    /// controllers and is not handled here.
    pub async fn delete(&self, id: i32) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_unique_violation(err: sqlx::Error) -> AuthError {
    let mapped = match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            match db_err.constraint() {
                Some("users_email_key") => Some(AuthError::DuplicateEmail),
                Some("users_username_key") => Some(AuthError::DuplicateUsername),
                _ => None,
            }
        }
        _ => None,
    };
    mapped.unwrap_or(AuthError::Sqlx(err))
}

/// One logged-in device/session.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user_id: i32,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: i32,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> AuthResult<SessionRecord> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "INSERT INTO user_sessions (id, user_id, user_agent, ip) \
             VALUES ($1, $2, $3, $4) RETURNING id, user_id, user_agent, ip, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(user_agent)
        .bind(ip)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list_for_user(&self, user_id: i32) -> AuthResult<Vec<SessionRecord>> {
        Ok(sqlx::query_as::<_, SessionRecord>(
            "SELECT id, user_id, user_agent, ip, created_at FROM user_sessions \
             WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Remove one session by id. Scoped to the owning user so a caller
    /// cannot revoke someone else's session by guessing ids.
    pub async fn revoke(&self, user_id: i32, session_id: Uuid) -> AuthResult<bool> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE id = $1 AND user_id = $2")
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn revoke_all(&self, user_id: i32) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
