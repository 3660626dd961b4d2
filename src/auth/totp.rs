use totp_rs::{Algorithm, Secret, TOTP};

use crate::auth::{AuthError, AuthResult};

/// Standard authenticator-app parameters: SHA-1, 6 digits, 30-second
/// steps, one step of clock-skew tolerance either side.
const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    /// Base32 secret to persist and show the user exactly once.
    pub secret: String,
    /// otpauth:// provisioning URI for QR rendering by the client.
    pub otpauth_url: String,
}

/// Time-based one-time code generation and checking for two-factor
/// step-up. Secrets are stored base32-encoded on the identity record.
#[derive(Debug, Clone)]
pub struct TotpService {
    issuer: String,
}

impl TotpService {
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    /// Create a fresh secret for an enrollment that has not yet been
    /// confirmed with a first code.
    pub fn generate_enrollment(&self, account_label: &str) -> AuthResult<TotpEnrollment> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|err| AuthError::Totp(format!("{err:?}")))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(AuthError::from)?;
        Ok(TotpEnrollment {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }

    /// Check a submitted code against the stored secret, tolerating one
    /// step of clock skew in either direction.
    pub fn check(&self, secret_base32: &str, code: &str) -> AuthResult<bool> {
        let totp = self.build(secret_base32, "account")?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// Current code for a secret. Test helper for driving the step-up
    /// flow without an authenticator app.
    pub fn current_code(&self, secret_base32: &str) -> AuthResult<String> {
        let totp = self.build(secret_base32, "account")?;
        totp.generate_current()
            .map_err(|err| AuthError::Totp(err.to_string()))
    }

    fn build(&self, secret_base32: &str, account_label: &str) -> AuthResult<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|err| AuthError::Totp(format!("{err:?}")))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(AuthError::from)
    }
}
