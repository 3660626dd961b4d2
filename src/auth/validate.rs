use regex::Regex;
use std::sync::OnceLock;

use crate::auth::error::{AuthError, AuthResult, FieldError};
use crate::auth::responses::{
    ForgotPasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest, Role,
    TotpCodeRequest, TwoFactorLoginRequest, UpdateDetailsRequest, UpdatePasswordRequest,
};

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
            .expect("email regex compiles")
    })
}

struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn push(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    fn username(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.push("username", "Username is required");
        } else if trimmed.chars().count() < 3 || trimmed.chars().count() > 30 {
            self.push("username", "Username must be between 3 and 30 characters");
        }
    }

    fn email(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.push("email", "Email is required");
        } else if !email_regex().is_match(trimmed) {
            self.push("email", "Please include a valid email");
        }
    }

    fn password(&mut self, field: &str, value: &str) {
        if value.is_empty() {
            self.push(field, "Password is required");
        } else if value.chars().count() < 6 {
            self.push(field, "Password must be at least 6 characters long");
        } else if !value.chars().any(|c| c.is_ascii_digit()) {
            self.push(field, "Password must contain a number");
        }
    }

    fn finish(self) -> AuthResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(self.errors))
        }
    }
}

pub fn register(payload: &RegisterRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    check.username(&payload.username);
    check.email(&payload.email);
    check.password("password", &payload.password);
    if let Some(role) = &payload.role {
        if !Role::is_valid(role) {
            check.push("role", "Role must be one of student, lecturer, admin");
        }
    }
    check.finish()
}

pub fn login(payload: &LoginRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    check.email(&payload.email);
    if payload.password.is_empty() {
        check.push("password", "Password is required");
    }
    check.finish()
}

pub fn update_details(payload: &UpdateDetailsRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    if payload.username.is_none() && payload.email.is_none() {
        check.push("username", "Provide a username or email to update");
    }
    if let Some(username) = &payload.username {
        check.username(username);
    }
    if let Some(email) = &payload.email {
        check.email(email);
    }
    check.finish()
}

pub fn update_password(payload: &UpdatePasswordRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    if payload.current_password.is_empty() {
        check.push("currentPassword", "Current password is required");
    }
    check.password("newPassword", &payload.new_password);
    check.finish()
}

pub fn forgot_password(payload: &ForgotPasswordRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    check.email(&payload.email);
    check.finish()
}

pub fn reset_password(payload: &ResetPasswordRequest) -> AuthResult<()> {
    let mut check = Checker::new();
    check.password("password", &payload.password);
    check.finish()
}

pub fn totp_code(payload: &TotpCodeRequest) -> AuthResult<()> {
    code_field(&payload.code)
}

pub fn two_factor_login(payload: &TwoFactorLoginRequest) -> AuthResult<()> {
    code_field(&payload.code)
}

fn code_field(code: &str) -> AuthResult<()> {
    let mut check = Checker::new();
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        check.push("code", "Code must be 6 digits");
    }
    check.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_payload() -> RegisterRequest {
        RegisterRequest {
            username: "alice".into(),
            email: "alice@example.com".into(),
            password: "secret1".into(),
            role: None,
        }
    }

    #[test]
    fn accepts_well_formed_registration() {
        assert!(register(&register_payload()).is_ok());
    }

    #[test]
    fn collects_field_errors() {
        let payload = RegisterRequest {
            username: "al".into(),
            email: "not-an-email".into(),
            password: "short".into(),
            role: Some("superuser".into()),
        };
        match register(&payload) {
            Err(AuthError::Validation(fields)) => {
                let named: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
                assert_eq!(named, vec!["username", "email", "password", "role"]);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn password_requires_a_digit() {
        let mut payload = register_payload();
        payload.password = "letters".into();
        assert!(matches!(
            register(&payload),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn totp_code_must_be_six_digits() {
        assert!(totp_code(&TotpCodeRequest { code: "123456".into() }).is_ok());
        assert!(totp_code(&TotpCodeRequest { code: "12345".into() }).is_err());
        assert!(totp_code(&TotpCodeRequest { code: "12345a".into() }).is_err());
    }
}
