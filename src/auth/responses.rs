use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::store::{SessionRecord, UserRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Lecturer,
    Admin,
}

impl Role {
    pub fn from_str(role: &str) -> Self {
        match role {
            "admin" => Role::Admin,
            "lecturer" => Role::Lecturer,
            _ => Role::Student,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Lecturer => "lecturer",
            Role::Admin => "admin",
        }
    }

    pub fn is_valid(role: &str) -> bool {
        matches!(role, "student" | "lecturer" | "admin")
    }
}

/// Outward-facing identity projection. Password hash, token hashes, and
/// the TOTP secret never appear here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PublicUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&UserRecord> for PublicUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            email: record.email.clone(),
            role: Role::from_str(&record.role),
        }
    }
}

// ===== Request bodies =====

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Defaults to `student` when omitted.
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorLoginRequest {
    pub user_id: i32,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateDetailsRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TotpCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TotpDisableRequest {
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionRequest {
    pub session_id: Uuid,
}

// ===== Response bodies =====

/// Successful authentication: `{success, token, user}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
}

/// Password change/reset acknowledgement carrying only a fresh token.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserResponse {
    pub success: bool,
    pub user: PublicUser,
}

/// Login against a two-factor account stops here: the id identifies the
/// pending identity for the step-up call, and no token is issued yet.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorChallenge {
    pub success: bool,
    pub two_factor_required: bool,
    pub user_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum LoginResponse {
    TwoFactor(TwoFactorChallenge),
    Authenticated(AuthResponse),
}

/// Enrollment payload shown to the user exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpSetupResponse {
    pub success: bool,
    pub secret: String,
    pub otpauth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    /// True for the session backing the token used for this request.
    pub current: bool,
}

impl SessionInfo {
    pub fn from_record(record: &SessionRecord, current_session: Uuid) -> Self {
        Self {
            id: record.id,
            user_agent: record.user_agent.clone(),
            ip: record.ip.clone(),
            created_at: record.created_at,
            current: record.id == current_session,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    pub success: bool,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserListResponse {
    pub success: bool,
    pub users: Vec<PublicUser>,
}
