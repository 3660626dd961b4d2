use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post, put};
use rocket_okapi::openapi;
use time::Duration as TimeDuration;

use crate::auth::guards::{AuthUser, ClientDevice, RequireAdmin};
use crate::auth::jwt::SignedToken;
use crate::auth::responses::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
    PublicUser, RegisterRequest, ResetPasswordRequest, RevokeSessionRequest, SessionInfo,
    SessionListResponse, TokenResponse, TotpCodeRequest, TotpDisableRequest, TotpSetupResponse,
    TwoFactorChallenge, TwoFactorLoginRequest, UpdateDetailsRequest, UpdatePasswordRequest,
    UserListResponse, UserResponse,
};
use crate::auth::service::{IssuedAuth, LoginOutcome};
use crate::auth::{AuthError, AuthState, validate};

/// Create an account. Responds 201 with a session token and the public
/// identity projection; the confirmation email is dispatched before the
/// token is issued.
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    device: ClientDevice,
    payload: Json<RegisterRequest>,
) -> Result<status::Custom<Json<AuthResponse>>, AuthError> {
    validate::register(&payload)?;

    let issued = state
        .register(
            &payload.username,
            &payload.email,
            &payload.password,
            payload.role.as_deref(),
            device.0,
        )
        .await?;

    set_token_cookie(cookies, state, &issued.token);
    Ok(status::Custom(
        Status::Created,
        Json(auth_response(&issued)),
    ))
}

/// Exchange credentials for a session token, or a two-factor challenge
/// when the account has a second factor enrolled.
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    device: ClientDevice,
    payload: Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    validate::login(&payload)?;

    match state.login(&payload.email, &payload.password, device.0).await? {
        LoginOutcome::Authenticated(issued) => {
            set_token_cookie(cookies, state, &issued.token);
            Ok(Json(LoginResponse::Authenticated(auth_response(&issued))))
        }
        LoginOutcome::TwoFactorRequired { user_id } => {
            Ok(Json(LoginResponse::TwoFactor(TwoFactorChallenge {
                success: true,
                two_factor_required: true,
                user_id,
            })))
        }
    }
}

/// Complete a login that stopped at the two-factor gate.
#[openapi(tag = "Auth")]
#[post("/auth/2fa/login", data = "<payload>")]
pub async fn two_factor_login(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    device: ClientDevice,
    payload: Json<TwoFactorLoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    validate::two_factor_login(&payload)?;

    let issued = state
        .two_factor_login(payload.user_id, &payload.code, device.0)
        .await?;
    set_token_cookie(cookies, state, &issued.token);
    Ok(Json(auth_response(&issued)))
}

/// Consume an emailed confirmation token (single use).
#[openapi(tag = "Auth")]
#[get("/auth/confirmemail/<token>")]
pub async fn confirm_email(
    state: &State<AuthState>,
    token: &str,
) -> Result<Json<MessageResponse>, AuthError> {
    state.confirm_email(token).await?;
    Ok(Json(message("Email confirmed")))
}

/// The caller's own public identity.
#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(user: AuthUser) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        },
    })
}

/// Change username and/or email. An email change re-triggers
/// confirmation.
#[openapi(tag = "Auth")]
#[put("/auth/updatedetails", data = "<payload>")]
pub async fn update_details(
    state: &State<AuthState>,
    user: AuthUser,
    payload: Json<UpdateDetailsRequest>,
) -> Result<Json<UserResponse>, AuthError> {
    validate::update_details(&payload)?;

    let updated = state
        .update_details(user.id, payload.username.as_deref(), payload.email.as_deref())
        .await?;
    Ok(Json(UserResponse {
        success: true,
        user: PublicUser::from(&updated),
    }))
}

/// Change password. Every token issued before this call stops working;
/// the response carries a fresh one.
#[openapi(tag = "Auth")]
#[put("/auth/updatepassword", data = "<payload>")]
pub async fn update_password(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    user: AuthUser,
    device: ClientDevice,
    payload: Json<UpdatePasswordRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    validate::update_password(&payload)?;

    let issued = state
        .update_password(
            user.id,
            &payload.current_password,
            &payload.new_password,
            device.0,
        )
        .await?;
    set_token_cookie(cookies, state, &issued.token);
    Ok(Json(TokenResponse {
        success: true,
        token: issued.token.token,
    }))
}

/// Request a password reset email. The response does not reveal whether
/// the address has an account.
#[openapi(tag = "Auth")]
#[post("/auth/forgotpassword", data = "<payload>")]
pub async fn forgot_password(
    state: &State<AuthState>,
    payload: Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    validate::forgot_password(&payload)?;

    state.forgot_password(&payload.email).await?;
    Ok(Json(message(
        "If that account exists, a reset email has been sent",
    )))
}

/// Complete a password reset with an emailed token (single use, expires
/// ten minutes after issuance).
#[openapi(tag = "Auth")]
#[put("/auth/resetpassword/<token>", data = "<payload>")]
pub async fn reset_password(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    device: ClientDevice,
    token: &str,
    payload: Json<ResetPasswordRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    validate::reset_password(&payload)?;

    let issued = state.reset_password(token, &payload.password, device.0).await?;
    set_token_cookie(cookies, state, &issued.token);
    Ok(Json(TokenResponse {
        success: true,
        token: issued.token.token,
    }))
}

/// Begin two-factor enrollment: returns the secret and provisioning URI
/// exactly once.
#[openapi(tag = "Auth")]
#[post("/auth/2fa/generate")]
pub async fn totp_generate(
    state: &State<AuthState>,
    user: AuthUser,
) -> Result<Json<TotpSetupResponse>, AuthError> {
    let enrollment = state.generate_totp_secret(user.id).await?;
    Ok(Json(TotpSetupResponse {
        success: true,
        secret: enrollment.secret,
        otpauth_url: enrollment.otpauth_url,
    }))
}

/// Confirm enrollment with a first authenticator code.
#[openapi(tag = "Auth")]
#[post("/auth/2fa/verify", data = "<payload>")]
pub async fn totp_verify(
    state: &State<AuthState>,
    user: AuthUser,
    payload: Json<TotpCodeRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    validate::totp_code(&payload)?;

    state.confirm_totp_setup(user.id, &payload.code).await?;
    Ok(Json(message("Two-factor authentication enabled")))
}

/// Disable two-factor. Requires the account password.
#[openapi(tag = "Auth")]
#[post("/auth/2fa/disable", data = "<payload>")]
pub async fn totp_disable(
    state: &State<AuthState>,
    user: AuthUser,
    payload: Json<TotpDisableRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.disable_totp(user.id, &payload.password).await?;
    Ok(Json(message("Two-factor authentication disabled")))
}

/// End the current session. Removes the session record and clears the
/// cookie; the stateless token itself lapses at its expiry.
#[openapi(tag = "Auth")]
#[post("/auth/logout")]
pub async fn logout(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    state.logout(user.id, user.session_id).await?;
    clear_token_cookie(cookies, state);
    Ok(Json(message("Logged out")))
}

/// List the caller's active sessions.
#[openapi(tag = "Auth")]
#[get("/auth/sessions")]
pub async fn list_sessions(
    state: &State<AuthState>,
    user: AuthUser,
) -> Result<Json<SessionListResponse>, AuthError> {
    let records = state.list_sessions(user.id).await?;
    let sessions = records
        .iter()
        .map(|record| SessionInfo::from_record(record, user.session_id))
        .collect();
    Ok(Json(SessionListResponse {
        success: true,
        sessions,
    }))
}

/// Revoke one session by id.
#[openapi(tag = "Auth")]
#[post("/auth/sessions/revoke", data = "<payload>")]
pub async fn revoke_session(
    state: &State<AuthState>,
    user: AuthUser,
    payload: Json<RevokeSessionRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state.revoke_session(user.id, payload.session_id).await?;
    Ok(Json(message("Session revoked")))
}

/// Revoke every session, including the current one.
#[openapi(tag = "Auth")]
#[post("/auth/sessions/revokeall")]
pub async fn revoke_all_sessions(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    let revoked = state.revoke_all_sessions(user.id).await?;
    clear_token_cookie(cookies, state);
    Ok(Json(message(&format!("Revoked {revoked} sessions"))))
}

/// Delete the caller's account. Owned course/assignment/video cleanup is
/// the resource controllers' responsibility.
#[openapi(tag = "Auth")]
#[delete("/auth/deleteaccount")]
pub async fn delete_account(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    user: AuthUser,
) -> Result<Json<MessageResponse>, AuthError> {
    state.delete_account(user.id).await?;
    clear_token_cookie(cookies, state);
    Ok(Json(message("Account deleted")))
}

/// Admin-only listing of every account's public projection.
#[openapi(tag = "Auth")]
#[get("/auth/users")]
pub async fn list_users(
    state: &State<AuthState>,
    _admin: RequireAdmin,
) -> Result<Json<UserListResponse>, AuthError> {
    let users = state
        .users
        .list_all()
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UserListResponse {
        success: true,
        users,
    }))
}

fn auth_response(issued: &IssuedAuth) -> AuthResponse {
    AuthResponse {
        success: true,
        token: issued.token.token.clone(),
        user: PublicUser::from(&issued.user),
    }
}

fn message(text: &str) -> MessageResponse {
    MessageResponse {
        success: true,
        message: text.to_string(),
    }
}

fn set_token_cookie(cookies: &CookieJar<'_>, state: &State<AuthState>, token: &SignedToken) {
    let mut cookie = Cookie::build((
        state.config.token_cookie_name.clone(),
        token.token.clone(),
    ))
    .path("/")
    .http_only(true)
    .same_site(SameSite::Lax)
    .secure(state.config.cookie_secure)
    .max_age(TimeDuration::seconds(state.config.token_ttl_secs))
    .build();

    if let Some(domain) = &state.config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookies.add(cookie);
}

fn clear_token_cookie(cookies: &CookieJar<'_>, state: &State<AuthState>) {
    let mut cookie = Cookie::build((state.config.token_cookie_name.clone(), String::new()))
        .path("/")
        .removal()
        .build();

    if let Some(domain) = &state.config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookies.add(cookie);
}
