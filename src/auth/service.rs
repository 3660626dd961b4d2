//! Account lifecycle state machine: registration, email confirmation,
//! login with optional two-factor step-up, password reset/change, and
//! session bookkeeping.
//!
//! Every operation is a sequence of awaited store and hashing calls with
//! no in-process locking; where two racing requests could consume the
//! same single-use token, the store decides the winner with a conditional
//! update and the loser fails with `InvalidOrExpiredToken`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::auth::jwt::SignedToken;
use crate::auth::store::{NewUser, SessionRecord, UserRecord};
use crate::auth::totp::TotpEnrollment;
use crate::auth::{AuthError, AuthResult, AuthState, passwords};

const TOKEN_BYTES: usize = 20;

/// Device metadata recorded on the session created at login.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// A completed authentication: a signed token plus the identity and the
/// session record the token was minted for.
#[derive(Debug)]
pub struct IssuedAuth {
    pub token: SignedToken,
    pub user: UserRecord,
    pub session: SessionRecord,
}

/// Outcome of a credentials check: either fully authenticated, or held
/// at the two-factor gate with no token issued.
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(Box<IssuedAuth>),
    TwoFactorRequired { user_id: i32 },
}

impl AuthState {
    /// Create an identity and issue its first session token. A
    /// confirmation token is generated, its hash persisted, and the raw
    /// value dispatched through the notification sink; if dispatch fails
    /// the stored hash is cleared so the unsendable token can never be
    /// consumed, and the caller sees the failure.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Option<&str>,
        device: DeviceInfo,
    ) -> AuthResult<IssuedAuth> {
        let password_hash = self.hash_password_blocking(password.to_string()).await?;

        let user = self
            .users
            .insert(NewUser {
                username: username.trim().to_string(),
                email: email.trim().to_lowercase(),
                role: role.unwrap_or("student").to_string(),
                password_hash,
            })
            .await?;

        let raw_token = generate_token();
        self.users
            .set_confirmation_token(user.id, &passwords::hash_token(&raw_token))
            .await?;

        if let Err(err) = self
            .mailer
            .send(
                &user.email,
                "Confirm your email",
                &confirmation_body(&raw_token),
            )
            .await
        {
            // Best-effort cleanup: the registration stands, but a token
            // that never reached the user must not stay consumable.
            if let Err(cleanup) = self.users.clear_confirmation_token(user.id).await {
                log::error!(
                    "failed to clear unsent confirmation token for user {}: {}",
                    user.id,
                    cleanup
                );
            }
            log::warn!("confirmation dispatch failed for {}: {}", user.email, err);
            return Err(AuthError::DependencyFailure(err.to_string()));
        }

        log::info!("new user registered: {}", user.email);
        self.issue_session(user, device).await
    }

    /// Consume an emailed confirmation token. Single use: the matching
    /// identity is flipped to confirmed and the hash cleared atomically.
    pub async fn confirm_email(&self, raw_token: &str) -> AuthResult<i32> {
        let user_id = self
            .users
            .consume_confirmation_token(&passwords::hash_token(raw_token))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        log::info!("email confirmed for user {}", user_id);
        Ok(user_id)
    }

    /// Check credentials. Unknown email and wrong password produce the
    /// same `InvalidCredentials` so responses cannot be used to probe
    /// which addresses have accounts. Two-factor accounts stop at the
    /// gate with no token issued.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        device: DeviceInfo,
    ) -> AuthResult<LoginOutcome> {
        let user = self
            .users
            .find_by_email(email.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let verified = self
            .verify_password_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            log::debug!("failed login attempt for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        if user.totp_enabled {
            return Ok(LoginOutcome::TwoFactorRequired { user_id: user.id });
        }

        self.users.touch_last_login(user.id, Utc::now()).await?;
        log::info!("user logged in: {}", user.email);
        let issued = self.issue_session(user, device).await?;
        Ok(LoginOutcome::Authenticated(Box::new(issued)))
    }

    /// Complete a login held at the two-factor gate.
    pub async fn two_factor_login(
        &self,
        user_id: i32,
        code: &str,
        device: DeviceInfo,
    ) -> AuthResult<IssuedAuth> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let secret = match (&user.totp_secret, user.totp_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(AuthError::InvalidOrExpiredToken),
        };
        if !self.totp.check(&secret, code)? {
            log::debug!("rejected two-factor code for user {}", user.id);
            return Err(AuthError::InvalidOrExpiredToken);
        }

        self.users.touch_last_login(user.id, Utc::now()).await?;
        log::info!("user completed two-factor login: {}", user.email);
        self.issue_session(user, device).await
    }

    /// Begin two-factor enrollment: store a fresh secret (not yet
    /// enabled) and hand back the provisioning payload exactly once.
    pub async fn generate_totp_secret(&self, user_id: i32) -> AuthResult<TotpEnrollment> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let enrollment = self.totp.generate_enrollment(&user.email)?;
        self.users.set_totp_secret(user.id, &enrollment.secret).await?;
        Ok(enrollment)
    }

    /// Confirm an in-progress enrollment with a first code, enabling
    /// two-factor for the account.
    pub async fn confirm_totp_setup(&self, user_id: i32, code: &str) -> AuthResult<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let secret = user
            .totp_secret
            .as_deref()
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        if !self.totp.check(secret, code)? {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        if !user.totp_enabled && !self.users.enable_totp(user.id).await? {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        log::info!("two-factor enabled for user {}", user.id);
        Ok(())
    }

    /// Disable two-factor. Requires the account password so a hijacked
    /// session cannot quietly strip the second factor.
    pub async fn disable_totp(&self, user_id: i32, password: &str) -> AuthResult<()> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let verified = self
            .verify_password_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        self.users.clear_totp(user.id).await?;
        log::info!("two-factor disabled for user {}", user.id);
        Ok(())
    }

    /// Change the password of a logged-in user. Moving the
    /// password-changed timestamp forward invalidates every token issued
    /// before now; a fresh token is issued for the caller.
    pub async fn update_password(
        &self,
        user_id: i32,
        current_password: &str,
        new_password: &str,
        device: DeviceInfo,
    ) -> AuthResult<IssuedAuth> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let verified = self
            .verify_password_blocking(current_password.to_string(), user.password_hash.clone())
            .await?;
        if !verified {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = self.hash_password_blocking(new_password.to_string()).await?;
        self.users.update_password(user.id, &new_hash, Utc::now()).await?;

        log::info!("user updated password: {}", user.email);
        self.issue_session(user, device).await
    }

    /// Start a password reset. The response is identical whether or not
    /// the email belongs to an account, so this endpoint cannot be used
    /// to enumerate addresses; when an account exists, a reset token with
    /// a short expiry is stored (hash only) and dispatched.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let Some(user) = self.users.find_by_email(email.trim()).await? else {
            log::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let raw_token = generate_token();
        let expires_at = Utc::now() + Duration::seconds(self.config.reset_token_ttl_secs);
        self.users
            .set_reset_token(user.id, &passwords::hash_token(&raw_token), expires_at)
            .await?;

        if let Err(err) = self
            .mailer
            .send(&user.email, "Password Reset", &reset_body(&raw_token))
            .await
        {
            if let Err(cleanup) = self.users.clear_reset_token(user.id).await {
                log::error!(
                    "failed to clear unsent reset token for user {}: {}",
                    user.id,
                    cleanup
                );
            }
            log::warn!("reset dispatch failed for {}: {}", user.email, err);
            return Err(AuthError::DependencyFailure(err.to_string()));
        }

        log::info!("password reset token issued for user {}", user.id);
        Ok(())
    }

    /// Complete a password reset with an emailed token. The token is
    /// consumed and the password replaced in one conditional update, so
    /// reuse and expiry both surface as `InvalidOrExpiredToken`.
    pub async fn reset_password(
        &self,
        raw_token: &str,
        new_password: &str,
        device: DeviceInfo,
    ) -> AuthResult<IssuedAuth> {
        let new_hash = self.hash_password_blocking(new_password.to_string()).await?;

        let user = self
            .users
            .consume_reset_token(&passwords::hash_token(raw_token), &new_hash, Utc::now())
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        log::info!("user reset password: {}", user.email);
        self.issue_session(user, device).await
    }

    /// Drop the session record behind the presented token. The token
    /// itself stays cryptographically valid until expiry; only a password
    /// change retroactively invalidates outstanding tokens.
    pub async fn logout(&self, user_id: i32, session_id: Uuid) -> AuthResult<()> {
        self.sessions.revoke(user_id, session_id).await?;
        log::info!("user {} logged out", user_id);
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: i32) -> AuthResult<Vec<SessionRecord>> {
        self.sessions.list_for_user(user_id).await
    }

    pub async fn revoke_session(&self, user_id: i32, session_id: Uuid) -> AuthResult<()> {
        if self.sessions.revoke(user_id, session_id).await? {
            Ok(())
        } else {
            Err(AuthError::NotFound("No such session".into()))
        }
    }

    pub async fn revoke_all_sessions(&self, user_id: i32) -> AuthResult<u64> {
        self.sessions.revoke_all(user_id).await
    }

    /// Update username and/or email. An email change un-confirms the
    /// account and dispatches a fresh confirmation token under the same
    /// clear-on-failure rule as registration.
    pub async fn update_details(
        &self,
        user_id: i32,
        username: Option<&str>,
        email: Option<&str>,
    ) -> AuthResult<UserRecord> {
        let current = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let new_username = username
            .map(|u| u.trim().to_string())
            .unwrap_or_else(|| current.username.clone());
        let new_email = email
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_else(|| current.email.clone());
        let email_changed = new_email != current.email;

        let updated = self
            .users
            .update_details(user_id, &new_username, &new_email)
            .await?;

        if email_changed {
            let raw_token = generate_token();
            self.users
                .set_confirmation_token(updated.id, &passwords::hash_token(&raw_token))
                .await?;
            if let Err(err) = self
                .mailer
                .send(
                    &updated.email,
                    "Confirm your email",
                    &confirmation_body(&raw_token),
                )
                .await
            {
                if let Err(cleanup) = self.users.clear_confirmation_token(updated.id).await {
                    log::error!(
                        "failed to clear unsent confirmation token for user {}: {}",
                        updated.id,
                        cleanup
                    );
                }
                return Err(AuthError::DependencyFailure(err.to_string()));
            }
        }

        log::info!("user updated details: {}", updated.email);
        Ok(updated)
    }

    /// Delete the identity. Session records cascade at the store; owned
    /// resources are cleaned up by the resource controllers.
    pub async fn delete_account(&self, user_id: i32) -> AuthResult<()> {
        if self.users.delete(user_id).await? {
            log::info!("user account {} deleted", user_id);
            Ok(())
        } else {
            Err(AuthError::Unauthenticated)
        }
    }

    async fn issue_session(&self, user: UserRecord, device: DeviceInfo) -> AuthResult<IssuedAuth> {
        let session = self
            .sessions
            .create(user.id, device.user_agent.as_deref(), device.ip.as_deref())
            .await?;
        let token = self.jwt.issue(user.id, session.id)?;
        Ok(IssuedAuth {
            token,
            user,
            session,
        })
    }

    /// Argon2 is CPU-bound; run it off the async workers.
    async fn hash_password_blocking(&self, password: String) -> AuthResult<String> {
        let service = self.passwords.clone();
        tokio::task::spawn_blocking(move || service.hash_password(&password))
            .await
            .map_err(|err| AuthError::Other(format!("hashing task failed: {err}")))?
    }

    async fn verify_password_blocking(
        &self,
        password: String,
        encoded: String,
    ) -> AuthResult<bool> {
        let service = self.passwords.clone();
        tokio::task::spawn_blocking(move || service.verify_password(&password, &encoded))
            .await
            .map_err(|err| AuthError::Other(format!("hashing task failed: {err}")))?
    }
}

/// Random single-use token: high-entropy, shown to the user once, stored
/// only as a digest.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn confirmation_body(raw_token: &str) -> String {
    format!(
        "Welcome! Confirm your email address by submitting this token: {raw_token}"
    )
}

fn reset_body(raw_token: &str) -> String {
    format!(
        "You (or someone else) requested a password reset. \
         The token below is valid for a short time only: {raw_token}"
    )
}
