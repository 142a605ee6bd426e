#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use axum::{
    Router,
    body::Body,
    Extension,
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use gatehouse::{
    API_ROOT, ServerConfig,
    auth::{CredentialStore, hash_password},
    create_app_with_store,
    db::{Database, NewUser, User, UserStore},
    jwt::TokenCodec,
    rate_limit::RateLimits,
    settings::AuthSettings,
};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const TEST_SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";
pub const PASSWORD: &str = "S3curePassw0rd!";

/// Argon2 is slow in debug builds, so hash the shared test password once.
pub fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).unwrap())
}

/// Credential store that counts every lookup made through it.
#[derive(Clone)]
pub struct CountingStore {
    inner: UserStore,
    lookups: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(inner: UserStore) -> Self {
        Self {
            inner,
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl CredentialStore for CountingStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_by_username(username).await
    }

    async fn record_login(&self, id: i64) -> Result<(), sqlx::Error> {
        self.inner.record_login(id).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    /// Codec sharing the app's secret and lifetimes, for minting tokens directly
    pub codec: TokenCodec,
    pub settings: AuthSettings,
}

pub async fn setup() -> TestApp {
    TestSetup::new().build().await
}

/// Builder for test setup with various options
pub struct TestSetup {
    settings: AuthSettings,
    rate_limits: RateLimits,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            settings: AuthSettings {
                cookie_secure: false,
                ..AuthSettings::default()
            },
            rate_limits: RateLimits {
                login_per_minute: 1000,
                register_per_minute: 1000,
                user_write_per_minute: 1000,
            },
        }
    }

    pub fn with_settings(mut self, settings: AuthSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rate_limits(mut self, rate_limits: RateLimits) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    pub async fn build(self) -> TestApp {
        self.build_with_store(|db| db.users()).await.0
    }

    /// Build the app around a custom credential store. Returns the store handle too.
    pub async fn build_with_store<C, F>(self, make_store: F) -> (TestApp, C)
    where
        C: CredentialStore,
        F: FnOnce(&Database) -> C,
    {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let store = make_store(&db);

        let config = ServerConfig {
            db: db.clone(),
            jwt_secret: TEST_SECRET.to_vec(),
            settings: self.settings.clone(),
            rate_limits: self.rate_limits,
            ip_header: None,
        };

        let router = create_app_with_store(&config, store.clone())
            .expect("Invalid test configuration")
            .layer(Extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)))));

        let app = TestApp {
            router,
            db,
            codec: TokenCodec::from_settings(TEST_SECRET, &self.settings),
            settings: self.settings,
        };
        (app, store)
    }
}

/// Minimal cookie jar: applies Set-Cookie headers, drops cookies cleared with Max-Age=0.
#[derive(Debug, Default, Clone)]
pub struct Jar(BTreeMap<String, String>);

impl Jar {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    pub fn header(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn absorb(&mut self, set_cookies: &[String]) {
        for cookie in set_cookies {
            let first = cookie.split(';').next().unwrap_or_default();
            let Some((name, value)) = first.split_once('=') else {
                continue;
            };
            if value.is_empty() || cookie.contains("Max-Age=0") {
                self.remove(name);
            } else {
                self.set(name, value);
            }
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub set_cookies: Vec<String>,
    pub body: Value,
}

impl TestResponse {
    /// The raw Set-Cookie line for `name`, if the response set one.
    pub fn set_cookie(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}=", name);
        self.set_cookies
            .iter()
            .find(|c| c.starts_with(&prefix))
            .map(String::as_str)
    }

    /// The value part of the Set-Cookie line for `name`.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        self.set_cookie(name)
            .and_then(|c| c.split(';').next())
            .and_then(|c| c.split_once('='))
            .map(|(_, v)| v.to_string())
    }

    pub fn detail(&self) -> &str {
        self.body["detail"].as_str().unwrap_or_default()
    }
}

impl TestApp {
    /// Send a request under the API root, carrying the jar's cookies.
    /// With `csrf_header`, the jar's CSRF cookie is echoed in the CSRF header.
    pub async fn request(
        &self,
        jar: &mut Jar,
        method: Method,
        path: &str,
        body: Option<Value>,
        csrf_header: bool,
    ) -> TestResponse {
        let token = if csrf_header {
            jar.get(&self.settings.csrf_cookie_name).map(str::to_string)
        } else {
            None
        };
        self.request_with_csrf(jar, method, path, body, token.as_deref())
            .await
    }

    /// Like [`TestApp::request`], with an explicit CSRF header value.
    pub async fn request_with_csrf(
        &self,
        jar: &mut Jar,
        method: Method,
        path: &str,
        body: Option<Value>,
        csrf_token: Option<&str>,
    ) -> TestResponse {
        let body = body.map(|value| ("application/json", value.to_string()));
        self.send(jar, method, path, body, csrf_token).await
    }

    /// Send a raw body with the given content type, echoing the jar's CSRF cookie.
    pub async fn request_raw(
        &self,
        jar: &mut Jar,
        method: Method,
        path: &str,
        content_type: &'static str,
        body: &str,
    ) -> TestResponse {
        let token = jar.get(&self.settings.csrf_cookie_name).map(str::to_string);
        self.send(
            jar,
            method,
            path,
            Some((content_type, body.to_string())),
            token.as_deref(),
        )
        .await
    }

    async fn send(
        &self,
        jar: &mut Jar,
        method: Method,
        path: &str,
        body: Option<(&'static str, String)>,
        csrf_token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", API_ROOT, path));

        if let Some(cookie) = jar.header() {
            builder = builder.header(header::COOKIE, cookie);
        }
        if let Some(token) = csrf_token {
            builder = builder.header(self.settings.csrf_header_name.as_str(), token);
        }

        let body = match body {
            Some((content_type, raw)) => {
                builder = builder.header(header::CONTENT_TYPE, content_type);
                Body::from(raw)
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let set_cookies: Vec<String> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        jar.absorb(&set_cookies);

        TestResponse {
            status,
            headers,
            set_cookies,
            body,
        }
    }

    pub async fn fetch_csrf(&self, jar: &mut Jar) -> TestResponse {
        self.request(jar, Method::GET, "/auth/csrf/", None, false)
            .await
    }

    /// Fetch the CSRF cookie, then log in with it.
    pub async fn login(&self, jar: &mut Jar, username: &str, password: &str) -> TestResponse {
        self.fetch_csrf(jar).await;
        self.request(
            jar,
            Method::POST,
            "/auth/token/",
            Some(json!({ "username": username, "password": password })),
            true,
        )
        .await
    }

    /// Create an active user with [`PASSWORD`]. Returns the user ID.
    pub async fn create_user(&self, username: &str) -> i64 {
        self.db
            .users()
            .create(&NewUser {
                username,
                email: None,
                display_name: "",
                password_hash: password_hash(),
            })
            .await
            .unwrap()
    }

    /// Create a user and return a jar holding a logged-in session for them.
    pub async fn logged_in(&self, username: &str) -> (i64, Jar) {
        let id = self.create_user(username).await;
        let mut jar = Jar::default();
        let response = self.login(&mut jar, username, PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK, "login failed: {:?}", response.body);
        (id, jar)
    }
}
