use crate::auth::{AuthError, AuthResult};

/// Authentication configuration loaded from environment variables.
///
/// The signing secret and hashing work factor are read once at startup and
/// are read-only afterwards. Rotating `CAMPUS_JWT_SECRET` invalidates every
/// previously issued token; that is accepted, documented behavior.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    /// Validity window of issued session tokens.
    pub token_ttl_secs: i64,
    /// Validity window of password reset tokens.
    pub reset_token_ttl_secs: i64,
    pub token_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub jwt_secret: String,
    /// Argon2 memory cost in KiB.
    pub argon2_memory_kib: u32,
    /// Issuer label shown in authenticator apps for TOTP enrollment.
    pub totp_issuer: String,
    /// Optional webhook URL for outbound notification email delivery.
    pub mail_webhook_url: Option<String>,
    pub mail_from: String,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer =
            std::env::var("CAMPUS_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let token_ttl_secs = std::env::var("CAMPUS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(24 * 60 * 60);
        let reset_token_ttl_secs = std::env::var("CAMPUS_RESET_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10 * 60);
        let token_cookie_name =
            std::env::var("CAMPUS_TOKEN_COOKIE_NAME").unwrap_or_else(|_| "token".into());
        let cookie_domain = std::env::var("CAMPUS_COOKIE_DOMAIN").ok();
        let cookie_secure = std::env::var("CAMPUS_COOKIE_SECURE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(true);
        let jwt_secret = std::env::var("CAMPUS_JWT_SECRET")
            .map_err(|_| AuthError::Config("CAMPUS_JWT_SECRET is required".into()))?;
        let argon2_memory_kib = std::env::var("CAMPUS_ARGON2_MEMORY_KIB")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(19 * 1024);
        let totp_issuer = std::env::var("CAMPUS_TOTP_ISSUER").unwrap_or_else(|_| "Campus".into());
        let mail_webhook_url = std::env::var("CAMPUS_MAIL_WEBHOOK_URL").ok();
        let mail_from =
            std::env::var("CAMPUS_MAIL_FROM").unwrap_or_else(|_| "no-reply@campus.local".into());

        Ok(Self {
            issuer,
            token_ttl_secs,
            reset_token_ttl_secs,
            token_cookie_name,
            cookie_domain,
            cookie_secure,
            jwt_secret,
            argon2_memory_kib,
            totp_issuer,
            mail_webhook_url,
            mail_from,
        })
    }
}
