use rocket::Request;
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder, Response};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// One field-level validation failure.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("An account with that email already exists")]
    DuplicateEmail,
    #[error("An account with that username already exists")]
    DuplicateUsername,
    /// Covers both "no such account" and "wrong password" so responses do
    /// not reveal whether an email is registered.
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Not authorized to access this route")]
    Unauthenticated,
    #[error("Session is no longer valid. Please log in again")]
    StaleToken,
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("Notification delivery failed: {0}")]
    DependencyFailure(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] rocket_db_pools::sqlx::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("totp error: {0}")]
    Totp(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::DuplicateEmail
            | AuthError::DuplicateUsername
            | AuthError::InvalidOrExpiredToken => Status::BadRequest,
            AuthError::InvalidCredentials
            | AuthError::Unauthenticated
            | AuthError::StaleToken => Status::Unauthorized,
            AuthError::Forbidden => Status::Forbidden,
            AuthError::NotFound(_) => Status::NotFound,
            AuthError::Validation(_) => Status::UnprocessableEntity,
            AuthError::DependencyFailure(_) => Status::BadGateway,
            AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::PasswordHash(_)
            | AuthError::Totp(_)
            | AuthError::Other(_) => Status::InternalServerError,
        }
    }

    /// Client-facing message. Internal variants collapse to a generic
    /// message so store or crypto details never reach a response body.
    fn public_message(&self) -> String {
        match self {
            AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::PasswordHash(_)
            | AuthError::Totp(_)
            | AuthError::Other(_) => "Server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error body shape shared by every auth endpoint: `{"message": ...}`,
/// with per-field details attached for validation failures.
#[derive(Debug, Serialize, JsonSchema)]
pub struct AuthErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl<'r> Responder<'r, 'static> for AuthError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status == Status::InternalServerError {
            log::error!("auth internal error: {}", self);
        } else {
            log::debug!("auth request rejected: {}", self);
        }

        let errors = match &self {
            AuthError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };
        let body = AuthErrorBody {
            message: self.public_message(),
            errors,
        };

        let json = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"message":"Server error"}"#.to_string());

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl rocket_okapi::response::OpenApiResponderInner for AuthError {
    fn responses(
        generator: &mut rocket_okapi::r#gen::OpenApiGenerator,
    ) -> rocket_okapi::Result<okapi::openapi3::Responses> {
        let mut responses = okapi::openapi3::Responses::default();
        let schema = generator.json_schema::<AuthErrorBody>();
        for status in [400u16, 401, 403, 404, 422, 500, 502] {
            rocket_okapi::util::add_schema_response(
                &mut responses,
                status,
                "application/json",
                schema.clone(),
            )?;
        }
        Ok(responses)
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<totp_rs::TotpUrlError> for AuthError {
    fn from(err: totp_rs::TotpUrlError) -> Self {
        AuthError::Totp(err.to_string())
    }
}
