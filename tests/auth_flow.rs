//! End-to-end exercises of the account lifecycle over local Rocket
//! clients backed by an ephemeral Postgres container.

use std::sync::Arc;
use std::time::Duration;

use campus_api::auth::TotpService;
use campus_api::auth::routes as auth_routes;
use campus_api::test_support::{
    CapturingMailer, TestDatabase, TestRocketBuilder, test_auth_state,
};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::{Client, LocalResponse};
use rocket::routes;
use rocket::serde::json::json;
use serde_json::Value;

struct TestApp {
    db: TestDatabase,
    mailer: Arc<CapturingMailer>,
    client: Client,
}

async fn spawn_app() -> TestApp {
    let db = TestDatabase::new().await.expect("test database");
    let mailer = Arc::new(CapturingMailer::default());
    let state = test_auth_state(db.pool_clone(), mailer.clone());

    let rocket = TestRocketBuilder::new()
        .mount_api_routes(routes![
            auth_routes::register,
            auth_routes::login,
            auth_routes::two_factor_login,
            auth_routes::confirm_email,
            auth_routes::me,
            auth_routes::update_details,
            auth_routes::update_password,
            auth_routes::forgot_password,
            auth_routes::reset_password,
            auth_routes::totp_generate,
            auth_routes::totp_verify,
            auth_routes::totp_disable,
            auth_routes::logout,
            auth_routes::list_sessions,
            auth_routes::revoke_session,
            auth_routes::revoke_all_sessions,
            auth_routes::delete_account,
            auth_routes::list_users,
        ])
        .manage_pg_pool(db.pool_clone())
        .manage_auth_state(state)
        .build();

    let client = Client::untracked(rocket).await.expect("valid rocket");
    TestApp { db, mailer, client }
}

impl TestApp {
    async fn register(&self, username: &str, email: &str, password: &str) -> Value {
        let response = self
            .client
            .post("/api/v1/auth/register")
            .header(ContentType::JSON)
            .body(
                json!({"username": username, "email": email, "password": password}).to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        body_json(response).await
    }

    async fn login(&self, email: &str, password: &str) -> LocalResponse<'_> {
        self.client
            .post("/api/v1/auth/login")
            .header(ContentType::JSON)
            .body(json!({"email": email, "password": password}).to_string())
            .dispatch()
            .await
    }
}

async fn body_json(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().await.expect("JSON body")
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

fn token_of(body: &Value) -> String {
    body["token"].as_str().expect("token in body").to_string()
}

#[tokio::test]
async fn register_then_login_and_reject_wrong_password() {
    let app = spawn_app().await;

    let registered = app.register("alice", "a@x.com", "secret1").await;
    assert_eq!(registered["success"], true);
    assert_eq!(registered["user"]["username"], "alice");
    assert_eq!(registered["user"]["email"], "a@x.com");
    assert_eq!(registered["user"]["role"], "student");
    assert!(registered["user"].get("password_hash").is_none());
    assert!(!token_of(&registered).is_empty());

    // The confirmation email went through the sink.
    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "a@x.com");

    let response = app.login("a@x.com", "secret1").await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    assert_eq!(body["user"]["id"], registered["user"]["id"]);
    assert!(!token_of(&body).is_empty());

    let response = app.login("a@x.com", "wrong").await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid credentials");

    // Unknown email gets the identical error.
    let response = app.login("nobody@x.com", "secret1").await;
    assert_eq!(response.status(), Status::Unauthorized);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn duplicate_email_and_username_are_rejected() {
    let app = spawn_app().await;
    app.register("alice", "a@x.com", "secret1").await;

    let response = app
        .client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(json!({"username": "alice2", "email": "a@x.com", "password": "secret1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = body_json(response).await;
    assert_eq!(body["message"], "An account with that email already exists");

    let response = app
        .client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(json!({"username": "alice", "email": "b@x.com", "password": "secret1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "An account with that username already exists"
    );

    // No partial identity was persisted for the rejected attempts.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(app.db.pool())
        .await
        .expect("count users");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn register_rejects_malformed_payloads_with_field_errors() {
    let app = spawn_app().await;

    let response = app
        .client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(json!({"username": "al", "email": "nope", "password": "letters"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::UnprocessableEntity);

    let body = body_json(response).await;
    assert_eq!(body["message"], "Validation failed");
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .expect("errors array")
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["username", "email", "password"]);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(app.db.pool())
        .await
        .expect("count users");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn email_confirmation_tokens_are_single_use() {
    let app = spawn_app().await;
    app.register("alice", "a@x.com", "secret1").await;

    let token = app.mailer.last().expect("confirmation mail").token();
    assert!(!token.is_empty());

    let response = app
        .client
        .get(format!("/api/v1/auth/confirmemail/{token}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let confirmed: bool =
        sqlx::query_scalar("SELECT email_confirmed FROM users WHERE email = 'a@x.com'")
            .fetch_one(app.db.pool())
            .await
            .expect("confirmed flag");
    assert!(confirmed);

    // Second use of the same token fails: the hash was cleared on success.
    let response = app
        .client
        .get(format!("/api/v1/auth/confirmemail/{token}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid or expired token");
}

#[tokio::test]
async fn password_reset_round_trip_and_single_use() {
    let app = spawn_app().await;
    app.register("alice", "a@x.com", "secret1").await;

    let response = app
        .client
        .post("/api/v1/auth/forgotpassword")
        .header(ContentType::JSON)
        .body(json!({"email": "a@x.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let accepted = body_json(response).await;

    // Unknown addresses get the identical acknowledgement.
    let response = app
        .client
        .post("/api/v1/auth/forgotpassword")
        .header(ContentType::JSON)
        .body(json!({"email": "ghost@x.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(body_json(response).await, accepted);

    let reset_token = app.mailer.last().expect("reset mail").token();

    let response = app
        .client
        .put(format!("/api/v1/auth/resetpassword/{reset_token}"))
        .header(ContentType::JSON)
        .body(json!({"password": "newpass1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    assert!(!token_of(&body).is_empty());

    // The token was consumed atomically; replay fails.
    let response = app
        .client
        .put(format!("/api/v1/auth/resetpassword/{reset_token}"))
        .header(ContentType::JSON)
        .body(json!({"password": "again1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Invalid or expired token");

    assert_eq!(
        app.login("a@x.com", "secret1").await.status(),
        Status::Unauthorized
    );
    assert_eq!(app.login("a@x.com", "newpass1").await.status(), Status::Ok);
}

#[tokio::test]
async fn expired_reset_tokens_are_rejected() {
    let app = spawn_app().await;
    app.register("alice", "a@x.com", "secret1").await;

    app.client
        .post("/api/v1/auth/forgotpassword")
        .header(ContentType::JSON)
        .body(json!({"email": "a@x.com"}).to_string())
        .dispatch()
        .await;
    let reset_token = app.mailer.last().expect("reset mail").token();

    // Age the stored expiry past its window instead of waiting it out.
    sqlx::query(
        "UPDATE users SET reset_expires_at = NOW() - INTERVAL '1 second' WHERE email = 'a@x.com'",
    )
    .execute(app.db.pool())
    .await
    .expect("age reset token");

    let response = app
        .client
        .put(format!("/api/v1/auth/resetpassword/{reset_token}"))
        .header(ContentType::JSON)
        .body(json!({"password": "newpass1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    // The old password still works: the conditional update never fired.
    assert_eq!(app.login("a@x.com", "secret1").await.status(), Status::Ok);
}

#[tokio::test]
async fn tokens_issued_before_a_password_change_stop_working() {
    let app = spawn_app().await;
    let registered = app.register("alice", "a@x.com", "secret1").await;
    let old_token = token_of(&registered);

    // Issued-at is tracked at second granularity; put the change in the
    // next second so the old token is unambiguously older.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = app
        .client
        .put("/api/v1/auth/updatepassword")
        .header(ContentType::JSON)
        .header(bearer(&old_token))
        .body(json!({"currentPassword": "secret1", "newPassword": "rotated1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let fresh_token = token_of(&body_json(response).await);

    // The fresh token authenticates; the pre-change token does not, even
    // though its own expiry has not elapsed.
    let response = app
        .client
        .get("/api/v1/auth/me")
        .header(bearer(&fresh_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = app
        .client
        .get("/api/v1/auth/me")
        .header(bearer(&old_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = app
        .client
        .put("/api/v1/auth/updatepassword")
        .header(ContentType::JSON)
        .header(bearer(&fresh_token))
        .body(json!({"currentPassword": "wrong", "newPassword": "rotated2"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[tokio::test]
async fn two_factor_gates_login_until_code_is_presented() {
    let app = spawn_app().await;
    let registered = app.register("alice", "a@x.com", "secret1").await;
    let token = token_of(&registered);

    let response = app
        .client
        .post("/api/v1/auth/2fa/generate")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let setup = body_json(response).await;
    let secret = setup["secret"].as_str().expect("secret").to_string();
    assert!(
        setup["otpauthUrl"]
            .as_str()
            .expect("provisioning url")
            .starts_with("otpauth://totp/")
    );

    // Enrollment is pending until a first code confirms it; login is
    // still single-factor.
    let response = app.login("a@x.com", "secret1").await;
    assert_eq!(response.status(), Status::Ok);
    assert!(body_json(response).await.get("twoFactorRequired").is_none());

    let totp = TotpService::new("Campus".into());
    let code = totp.current_code(&secret).expect("current code");
    let response = app
        .client
        .post("/api/v1/auth/2fa/verify")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({"code": code}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // Credentials alone now stop at the gate: no token in the challenge.
    let response = app.login("a@x.com", "secret1").await;
    assert_eq!(response.status(), Status::Ok);
    let challenge = body_json(response).await;
    assert_eq!(challenge["twoFactorRequired"], true);
    assert!(challenge.get("token").is_none());
    let user_id = challenge["userId"].as_i64().expect("user id");

    let response = app
        .client
        .post("/api/v1/auth/2fa/login")
        .header(ContentType::JSON)
        .body(json!({"userId": user_id, "code": "000000"}).to_string())
        .dispatch()
        .await;
    // A guessed code is rejected (unless the window happens to be the
    // all-zeros code, which generate-then-check below would still cover).
    let code = totp.current_code(&secret).expect("current code");
    if code != "000000" {
        assert_eq!(response.status(), Status::BadRequest);
    }

    let response = app
        .client
        .post("/api/v1/auth/2fa/login")
        .header(ContentType::JSON)
        .body(json!({"userId": user_id, "code": code}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    assert!(!token_of(&body).is_empty());
    assert_eq!(body["user"]["email"], "a@x.com");

    // Disabling requires the account password, then login is
    // single-factor again.
    let response = app
        .client
        .post("/api/v1/auth/2fa/disable")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({"password": "wrong"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = app
        .client
        .post("/api/v1/auth/2fa/disable")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({"password": "secret1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = app.login("a@x.com", "secret1").await;
    assert_eq!(response.status(), Status::Ok);
    assert!(!token_of(&body_json(response).await).is_empty());
}

#[tokio::test]
async fn sessions_are_listed_and_revoked() {
    let app = spawn_app().await;
    app.register("alice", "a@x.com", "secret1").await;

    let response = app.login("a@x.com", "secret1").await;
    let second_token = token_of(&body_json(response).await);

    let response = app
        .client
        .get("/api/v1/auth/sessions")
        .header(bearer(&second_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    let sessions = body["sessions"].as_array().expect("sessions").clone();
    assert_eq!(sessions.len(), 2);

    let current = sessions
        .iter()
        .find(|s| s["current"] == true)
        .expect("current session");
    let other = sessions
        .iter()
        .find(|s| s["current"] == false)
        .expect("other session");

    let response = app
        .client
        .post("/api/v1/auth/sessions/revoke")
        .header(ContentType::JSON)
        .header(bearer(&second_token))
        .body(json!({"sessionId": other["id"]}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // Revoking the same session twice reports it gone.
    let response = app
        .client
        .post("/api/v1/auth/sessions/revoke")
        .header(ContentType::JSON)
        .header(bearer(&second_token))
        .body(json!({"sessionId": other["id"]}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    let response = app
        .client
        .get("/api/v1/auth/sessions")
        .header(bearer(&second_token))
        .dispatch()
        .await;
    let body = body_json(response).await;
    assert_eq!(body["sessions"].as_array().expect("sessions").len(), 1);
    assert_eq!(body["sessions"][0]["id"], current["id"]);

    // Logout drops the backing session record. The stateless token still
    // verifies until expiry; only its bookkeeping is gone.
    let response = app
        .client
        .post("/api/v1/auth/logout")
        .header(bearer(&second_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = app
        .client
        .get("/api/v1/auth/sessions")
        .header(bearer(&second_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    assert!(body["sessions"].as_array().expect("sessions").is_empty());

    let response = app.login("a@x.com", "secret1").await;
    let third_token = token_of(&body_json(response).await);
    let response = app
        .client
        .post("/api/v1/auth/sessions/revokeall")
        .header(bearer(&third_token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_sessions")
        .fetch_one(app.db.pool())
        .await
        .expect("count sessions");
    assert_eq!(count, 0);
}

#[tokio::test]
async fn failed_confirmation_dispatch_leaves_no_usable_token() {
    let app = spawn_app().await;
    app.mailer.set_fail(true);

    let response = app
        .client
        .post("/api/v1/auth/register")
        .header(ContentType::JSON)
        .body(json!({"username": "alice", "email": "a@x.com", "password": "secret1"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadGateway);

    // The identity stands, unconfirmed, with the unsendable token hash
    // cleared.
    let row: (bool, Option<String>) = sqlx::query_as(
        "SELECT email_confirmed, confirm_token_hash FROM users WHERE email = 'a@x.com'",
    )
    .fetch_one(app.db.pool())
    .await
    .expect("user row");
    assert!(!row.0);
    assert!(row.1.is_none());

    // Same rule for reset tokens.
    app.mailer.set_fail(false);
    assert_eq!(app.login("a@x.com", "secret1").await.status(), Status::Ok);

    app.mailer.set_fail(true);
    let response = app
        .client
        .post("/api/v1/auth/forgotpassword")
        .header(ContentType::JSON)
        .body(json!({"email": "a@x.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadGateway);

    let row: (Option<String>, Option<chrono::DateTime<chrono::Utc>>) =
        sqlx::query_as("SELECT reset_token_hash, reset_expires_at FROM users WHERE email = 'a@x.com'")
            .fetch_one(app.db.pool())
            .await
            .expect("user row");
    assert!(row.0.is_none());
    assert!(row.1.is_none());
}

#[tokio::test]
async fn updating_email_requires_reconfirmation() {
    let app = spawn_app().await;
    let registered = app.register("alice", "a@x.com", "secret1").await;
    let token = token_of(&registered);

    let confirm_token = app.mailer.last().expect("confirmation mail").token();
    app.client
        .get(format!("/api/v1/auth/confirmemail/{confirm_token}"))
        .dispatch()
        .await;

    let response = app
        .client
        .put("/api/v1/auth/updatedetails")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(json!({"email": "new@x.com"}).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], "new@x.com");

    let (confirmed, has_token): (bool, bool) = sqlx::query_as(
        "SELECT email_confirmed, confirm_token_hash IS NOT NULL FROM users WHERE email = 'new@x.com'",
    )
    .fetch_one(app.db.pool())
    .await
    .expect("user row");
    assert!(!confirmed);
    assert!(has_token);

    let new_confirm = app.mailer.last().expect("fresh confirmation mail");
    assert_eq!(new_confirm.to, "new@x.com");
}

#[tokio::test]
async fn admin_listing_is_forbidden_for_students() {
    let app = spawn_app().await;
    let registered = app.register("alice", "a@x.com", "secret1").await;
    let token = token_of(&registered);

    let response = app
        .client
        .get("/api/v1/auth/users")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Forbidden);

    // Promote to admin; the guard re-reads the role per request.
    sqlx::query("UPDATE users SET role = 'admin' WHERE email = 'a@x.com'")
        .execute(app.db.pool())
        .await
        .expect("promote user");

    let response = app
        .client
        .get("/api/v1/auth/users")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = body_json(response).await;
    let users = body["users"].as_array().expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["role"], "admin");
    assert!(users[0].get("password_hash").is_none());
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let app = spawn_app().await;

    let response = app.client.get("/api/v1/auth/me").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = app
        .client
        .get("/api/v1/auth/me")
        .header(bearer("garbage.token.value"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);
}

#[tokio::test]
async fn deleted_accounts_cannot_authenticate() {
    let app = spawn_app().await;
    let registered = app.register("alice", "a@x.com", "secret1").await;
    let token = token_of(&registered);

    let response = app
        .client
        .delete("/api/v1/auth/deleteaccount")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    let response = app
        .client
        .get("/api/v1/auth/me")
        .header(bearer(&token))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    assert_eq!(
        app.login("a@x.com", "secret1").await.status(),
        Status::Unauthorized
    );

    // Session records were cascaded away with the identity.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_sessions")
        .fetch_one(app.db.pool())
        .await
        .expect("count sessions");
    assert_eq!(count, 0);
}
