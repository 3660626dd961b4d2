//! Authentication and authorization core: configuration, credential
//! hashing, token minting, the account lifecycle state machine, Rocket
//! request guards, and HTTP route handlers.

use std::sync::Arc;

use rocket_db_pools::sqlx::PgPool;

pub mod config;
pub mod error;
pub mod guards;
pub mod jwt;
pub mod notify;
pub mod passwords;
pub mod responses;
pub mod routes;
pub mod service;
pub mod store;
pub mod totp;
pub mod validate;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{AuthUser, RequireAdmin, require_owner_or_role, require_role};
pub use jwt::JwtService;
pub use notify::Mailer;
pub use passwords::PasswordService;
pub use responses::{PublicUser, Role};
pub use store::{SessionStore, UserStore};
pub use totp::TotpService;

#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub passwords: PasswordService,
    pub jwt: Arc<JwtService>,
    pub totp: TotpService,
    pub users: UserStore,
    pub sessions: SessionStore,
    pub mailer: Arc<dyn Mailer>,
}

impl AuthState {
    pub fn new(config: AuthConfig, pool: PgPool, mailer: Arc<dyn Mailer>) -> AuthResult<Self> {
        let passwords = PasswordService::new(config.argon2_memory_kib)?;
        let jwt = Arc::new(JwtService::from_config(&config)?);
        let totp = TotpService::new(config.totp_issuer.clone());
        Ok(Self {
            config,
            passwords,
            jwt,
            totp,
            users: UserStore::new(pool.clone()),
            sessions: SessionStore::new(pool),
            mailer,
        })
    }

    /// Production construction path: configuration from `CAMPUS_*`
    /// environment variables, notification sink chosen by configuration.
    pub fn from_env(pool: PgPool) -> AuthResult<Self> {
        let config = AuthConfig::from_env()?;
        let mailer = Arc::from(notify::mailer_from_config(&config));
        Self::new(config, pool, mailer)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        issuer: "https://campus.test".into(),
        token_ttl_secs: 900,
        reset_token_ttl_secs: 600,
        token_cookie_name: "token".into(),
        cookie_domain: None,
        cookie_secure: false,
        jwt_secret: "super-secret-test-key".into(),
        argon2_memory_kib: 8 * 1024,
        totp_issuer: "Campus".into(),
        mail_webhook_url: None,
        mail_from: "no-reply@campus.test".into(),
    }
}
