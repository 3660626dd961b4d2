use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::request::OpenApiFromRequest;
use uuid::Uuid;

use crate::auth::responses::Role;
use crate::auth::service::DeviceInfo;
use crate::auth::{AuthError, AuthResult, AuthState};

/// The caller's identity, derived fresh from the bearer token on every
/// request. Resource controllers receive this plus the predicates below;
/// they never see credential fields.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Session record the presented token was minted for.
    pub session_id: Uuid,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => Outcome::Error((err.status(), err)),
        }
    }
}

/// Admin-only guard for management endpoints.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireAdmin(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) => match require_role(&user, &[Role::Admin]) {
                Ok(()) => Outcome::Success(RequireAdmin(user)),
                Err(err) => Outcome::Error((err.status(), err)),
            },
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => {
                Outcome::Error((Status::Unauthorized, AuthError::Unauthenticated))
            }
        }
    }
}

/// Role membership predicate. Resource controllers use this directly for
/// staff-only operations (e.g. lecturers grading submissions).
pub fn require_role(user: &AuthUser, allowed: &[Role]) -> AuthResult<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        log::warn!(
            "user {} with role {} attempted a restricted action",
            user.id,
            user.role.as_str()
        );
        Err(AuthError::Forbidden)
    }
}

/// Ownership-or-role predicate: the single check every resource
/// controller applies to mutations. Passes when the caller owns the
/// resource or holds one of the bypass roles (typically admin).
pub fn require_owner_or_role(
    user: &AuthUser,
    resource_owner_id: i32,
    bypass_roles: &[Role],
) -> AuthResult<()> {
    if user.id == resource_owner_id || bypass_roles.contains(&user.role) {
        Ok(())
    } else {
        log::warn!(
            "user {} attempted to modify a resource owned by {}",
            user.id,
            resource_owner_id
        );
        Err(AuthError::Forbidden)
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let token = token_from_request(request, &state.config.token_cookie_name)?;
    let claims = state.jwt.verify(token)?;
    let user_id = claims.user_id()?;
    let session_id: Uuid = claims.sid.parse().map_err(|_| AuthError::Unauthenticated)?;

    // The identity may have been deleted since the token was issued.
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::Unauthenticated)?;

    // A token minted before the latest password change is stolen-token
    // territory even when its signature and expiry still check out.
    if claims.iat < user.password_changed_at.timestamp() {
        log::warn!("stale token presented for user {}", user.id);
        return Err(AuthError::StaleToken);
    }

    Ok(AuthUser {
        id: user.id,
        username: user.username,
        email: user.email,
        role: Role::from_str(&user.role),
        session_id,
    })
}

/// Bearer token from the Authorization header, falling back to the
/// session cookie for browser clients.
fn token_from_request<'r>(request: &'r Request<'_>, cookie_name: &str) -> AuthResult<&'r str> {
    if let Some(header) = request.headers().get_one("Authorization") {
        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next().unwrap_or_default();
        let token = parts.next().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
            return Ok(token);
        }
        return Err(AuthError::Unauthenticated);
    }

    if let Some(cookie) = request.cookies().get(cookie_name) {
        let value = cookie.value();
        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err(AuthError::Unauthenticated)
}

/// Best-effort device metadata for session bookkeeping; never fails.
#[derive(Debug, Clone, Default, OpenApiFromRequest)]
pub struct ClientDevice(pub DeviceInfo);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientDevice {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let user_agent = request
            .headers()
            .get_one("User-Agent")
            .map(|ua| ua.to_string());
        let ip = request.client_ip().map(|addr| addr.to_string());
        Outcome::Success(ClientDevice(DeviceInfo { user_agent, ip }))
    }
}
