//! Tests for the login flow.
//!
//! Tests cover:
//! - Full flow: CSRF cookie, login, then an authenticated request
//! - Cookie attributes on the issued session
//! - Generic failures for bad credentials and inactive accounts
//! - Login throttling

mod common;

use axum::http::{Method, StatusCode, header};
use common::{Jar, PASSWORD, TestSetup, setup};
use gatehouse::rate_limit::RateLimits;
use gatehouse::settings::AuthSettings;
use serde_json::json;

#[tokio::test]
async fn test_login_then_me_resolves_same_user() {
    let app = setup().await;
    let id = app.create_user("alice").await;
    let mut jar = Jar::default();

    let csrf = app.fetch_csrf(&mut jar).await;
    assert_eq!(csrf.status, StatusCode::NO_CONTENT);

    let response = app.login(&mut jar, "alice", PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({ "detail": "Login successful." }));
    assert!(jar.get("access_token").is_some());
    assert!(jar.get("refresh_token").is_some());

    let me = app
        .request(&mut jar, Method::GET, "/users/me/", None, false)
        .await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["id"], id);
    assert_eq!(me.body["username"], "alice");
}

#[tokio::test]
async fn test_login_cookie_attributes() {
    let app = setup().await;
    app.create_user("alice").await;
    let mut jar = Jar::default();

    let response = app.login(&mut jar, "alice", PASSWORD).await;

    let access = response.set_cookie("access_token").unwrap();
    assert!(access.contains("Path=/api/v1/"));
    assert!(access.contains("Max-Age=900"));
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("SameSite=Lax"));
    assert!(!access.contains("Secure"));

    let refresh = response.set_cookie("refresh_token").unwrap();
    assert!(refresh.contains("Path=/api/v1/"));
    assert!(refresh.contains("Max-Age=604800"));
    assert!(refresh.contains("HttpOnly"));

    // Tokens travel in cookies only
    assert!(response.body.get("access").is_none());
    assert!(response.body.get("refresh").is_none());
}

#[tokio::test]
async fn test_secure_cookies_when_enabled() {
    let app = TestSetup::new()
        .with_settings(AuthSettings::default())
        .build()
        .await;
    app.create_user("alice").await;
    let mut jar = Jar::default();

    let response = app.login(&mut jar, "alice", PASSWORD).await;

    assert_eq!(response.status, StatusCode::OK);
    for name in ["access_token", "refresh_token", "csrftoken"] {
        assert!(
            response.set_cookie(name).unwrap().ends_with("; Secure"),
            "{} is not Secure",
            name
        );
    }
}

#[tokio::test]
async fn test_bad_credentials_are_generic() {
    let app = setup().await;
    app.create_user("alice").await;

    let mut jar = Jar::default();
    let wrong_password = app.login(&mut jar, "alice", "not-the-password").await;
    let mut jar2 = Jar::default();
    let unknown_user = app.login(&mut jar2, "mallory", PASSWORD).await;

    for response in [&wrong_password, &unknown_user] {
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.detail(),
            "No active account found with the given credentials."
        );
        assert!(response.set_cookie("access_token").is_none());
        assert!(response.set_cookie("refresh_token").is_none());
        assert!(response.headers.contains_key(header::WWW_AUTHENTICATE));
    }
    assert!(jar.get("access_token").is_none());
}

#[tokio::test]
async fn test_inactive_user_cannot_login() {
    let app = setup().await;
    let id = app.create_user("alice").await;
    app.db.users().set_active(id, false).await.unwrap();
    let mut jar = Jar::default();

    let response = app.login(&mut jar, "alice", PASSWORD).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.detail(),
        "No active account found with the given credentials."
    );
}

#[tokio::test]
async fn test_blank_fields_rejected() {
    let app = setup().await;
    let mut jar = Jar::default();
    app.fetch_csrf(&mut jar).await;

    let response = app
        .request(
            &mut jar,
            Method::POST,
            "/auth/token/",
            Some(json!({ "username": "", "password": "" })),
            true,
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["username"].is_array());
    assert!(response.body["password"].is_array());
}

#[tokio::test]
async fn test_login_records_last_login() {
    let app = setup().await;
    let id = app.create_user("alice").await;
    assert!(
        app.db
            .users()
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap()
            .last_login
            .is_none()
    );

    let mut jar = Jar::default();
    app.login(&mut jar, "alice", PASSWORD).await;

    let user = app.db.users().get_by_id(id).await.unwrap().unwrap();
    assert!(user.last_login.is_some());
}

#[tokio::test]
async fn test_login_is_throttled_per_ip() {
    let app = TestSetup::new()
        .with_rate_limits(RateLimits {
            login_per_minute: 2,
            ..RateLimits::default()
        })
        .build()
        .await;
    let mut jar = Jar::default();

    for _ in 0..2 {
        let response = app.login(&mut jar, "nobody", PASSWORD).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let response = app.login(&mut jar, "nobody", PASSWORD).await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.detail(), "Request was throttled.");
    assert!(response.headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_non_json_body_gets_json_error() {
    let app = setup().await;
    app.create_user("alice").await;
    let mut jar = Jar::default();
    app.fetch_csrf(&mut jar).await;

    for (content_type, body) in [
        ("text/plain", "username=alice&password=secret"),
        ("application/json", "{\"username\": \"alice\","),
        ("application/json", "[1, 2, 3]"),
    ] {
        let response = app
            .request_raw(&mut jar, Method::POST, "/auth/token/", content_type, body)
            .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(
            response.headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.body, json!({ "detail": "Malformed request body." }));
        assert!(response.set_cookie("access_token").is_none());
    }
}
