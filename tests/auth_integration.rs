use async_trait::async_trait;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use identity_service::auth::{AuthService, ResetTicket, TokenIssuer};
use identity_service::configuration::{JwtSettings, RateLimitSettings};
use identity_service::email_client::ResetNotifier;
use identity_service::error::EmailError;
use identity_service::startup::run;
use identity_service::store::InMemoryStore;

/// Captures reset tickets instead of mailing them
#[derive(Default)]
struct RecordingNotifier {
    tickets: Mutex<Vec<ResetTicket>>,
}

impl RecordingNotifier {
    fn last_token(&self) -> String {
        self.tickets
            .lock()
            .unwrap()
            .last()
            .map(|t| t.token.clone())
            .expect("No reset ticket recorded")
    }

    fn count(&self) -> usize {
        self.tickets.lock().unwrap().len()
    }
}

#[async_trait]
impl ResetNotifier for RecordingNotifier {
    async fn send_password_reset(&self, ticket: &ResetTicket) -> Result<(), EmailError> {
        self.tickets.lock().unwrap().push(ticket.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub address: String,
    notifier: Arc<RecordingNotifier>,
    client: reqwest::Client,
}

struct TestOptions {
    access_token_expiry: i64,
    refresh_token_expiry: i64,
    max_requests: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            access_token_expiry: 900,
            refresh_token_expiry: 604_800,
            max_requests: 1_000,
        }
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(TestOptions::default()).await
}

async fn spawn_app_with(options: TestOptions) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let jwt = JwtSettings {
        secret: "integration-test-secret-with-enough-entropy".to_string(),
        previous_secrets: vec![],
        access_token_expiry: options.access_token_expiry,
        refresh_token_expiry: options.refresh_token_expiry,
        issuer: "identity-test".to_string(),
    };
    let tokens = Arc::new(TokenIssuer::new(&jwt).expect("Failed to build token issuer"));
    let store = Arc::new(InMemoryStore::new());
    let service = AuthService::new(store.clone(), store, tokens);

    let notifier = Arc::new(RecordingNotifier::default());
    let rate_limit = RateLimitSettings {
        window_seconds: 900,
        max_requests: options.max_requests,
    };

    let server = run(listener, service, notifier.clone(), rate_limit)
        .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        notifier,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, username: &str, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/auth/register",
            &json!({ "username": username, "email": email, "password": password }),
        )
        .await
    }

    async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.post(
            "/auth/login",
            &json!({ "username": username, "password": password }),
        )
        .await
    }

    async fn validate(&self, access_token: &str) -> reqwest::Response {
        self.client
            .post(&format!("{}/auth/validate", self.address))
            .bearer_auth(access_token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_with_token_pair() {
    let app = spawn_app().await;

    let response = app.register("alice", "alice@example.com", "password123").await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 900);
}

#[tokio::test]
async fn register_returns_409_for_duplicate_username_or_email() {
    let app = spawn_app().await;
    assert_eq!(
        201,
        app.register("alice", "alice@example.com", "password123")
            .await
            .status()
            .as_u16()
    );

    let same_username = app.register("alice", "other@example.com", "password123").await;
    assert_eq!(409, same_username.status().as_u16());
    let body: Value = same_username.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
    assert_eq!(body["status"], 409);

    let same_email = app.register("bob", "alice@example.com", "password123").await;
    assert_eq!(409, same_email.status().as_u16());
}

#[tokio::test]
async fn concurrent_duplicate_registrations_yield_one_conflict() {
    let app = spawn_app().await;

    let (first, second) = tokio::join!(
        app.register("carol", "carol@example.com", "password123"),
        app.register("carol", "carol@example.com", "password123"),
    );

    let mut statuses = vec![first.status().as_u16(), second.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![201, 409]);
}

#[tokio::test]
async fn register_returns_400_for_invalid_data() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({ "email": "a@example.com", "password": "password123" }), "missing username"),
        (json!({ "username": "alice", "password": "password123" }), "missing email"),
        (json!({ "username": "alice", "email": "a@example.com" }), "missing password"),
        (
            json!({ "username": "alice", "email": "not-an-email", "password": "password123" }),
            "invalid email",
        ),
        (
            json!({ "username": "alice", "email": "a@example.com", "password": "short" }),
            "short password",
        ),
        (
            json!({ "username": "alice", "email": "a@example.com", "password": "password123", "role": "root" }),
            "unknown role",
        ),
    ];

    for (body, description) in test_cases {
        let response = app.post("/auth/register", &body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload had {}.",
            description
        );
    }
}

#[tokio::test]
async fn malformed_json_body_returns_400() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(&format!("{}/auth/register", app.address))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_201_for_valid_credentials() {
    let app = spawn_app().await;
    app.register("alice", "alice@example.com", "password123").await;

    let response = app.login("alice", "password123").await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["accessToken"].is_string());
    assert!(body["refreshToken"].is_string());
}

#[tokio::test]
async fn login_returns_401_for_wrong_password_and_unknown_user() {
    let app = spawn_app().await;
    app.register("alice", "alice@example.com", "password123").await;

    let wrong_password = app.login("alice", "password124").await;
    assert_eq!(401, wrong_password.status().as_u16());
    let wrong_password: Value = wrong_password.json().await.unwrap();

    let unknown_user = app.login("mallory", "password123").await;
    assert_eq!(401, unknown_user.status().as_u16());
    let unknown_user: Value = unknown_user.json().await.unwrap();

    assert_eq!(wrong_password["message"], unknown_user["message"]);
}

// --- Token Lifecycle Tests ---

#[tokio::test]
async fn register_login_validate_revoke_refresh_scenario() {
    let app = spawn_app().await;

    let registered: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();
    assert!(registered["refreshToken"].is_string());

    let login = app.login("alice", "password123").await;
    assert_eq!(201, login.status().as_u16());
    let tokens: Value = login.json().await.unwrap();
    let access_token = tokens["accessToken"].as_str().unwrap();
    let refresh_token = tokens["refreshToken"].as_str().unwrap();
    assert_ne!(registered["refreshToken"], tokens["refreshToken"]);

    let validated = app.validate(access_token).await;
    assert_eq!(200, validated.status().as_u16());
    let claims: Value = validated.json().await.unwrap();
    assert_eq!(claims["role"], "customer");
    assert!(claims["subjectId"].is_string());
    assert!(claims["expiresAt"].as_i64().unwrap() > claims["issuedAt"].as_i64().unwrap());

    let revoked = app
        .post("/auth/revoke", &json!({ "refreshToken": refresh_token }))
        .await;
    assert_eq!(200, revoked.status().as_u16());

    let refreshed = app
        .post("/auth/refresh", &json!({ "refreshToken": refresh_token }))
        .await;
    assert_eq!(404, refreshed.status().as_u16());
}

#[tokio::test]
async fn refresh_returns_new_access_token() {
    let app = spawn_app().await;
    let tokens: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .post("/auth/refresh", &json!({ "refreshToken": tokens["refreshToken"] }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    let access_token = body["accessToken"].as_str().unwrap();
    assert!(body.get("refreshToken").is_none());
    assert_eq!(200, app.validate(access_token).await.status().as_u16());
}

#[tokio::test]
async fn refresh_rejects_access_tokens_and_garbage() {
    let app = spawn_app().await;
    let tokens: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();

    let with_access = app
        .post("/auth/refresh", &json!({ "refreshToken": tokens["accessToken"] }))
        .await;
    assert_eq!(400, with_access.status().as_u16());

    let with_garbage = app
        .post("/auth/refresh", &json!({ "refreshToken": "not.a.jwt" }))
        .await;
    assert_eq!(400, with_garbage.status().as_u16());

    let missing = app.post("/auth/refresh", &json!({})).await;
    assert_eq!(400, missing.status().as_u16());
}

#[tokio::test]
async fn refresh_returns_401_for_expired_refresh_token() {
    let app = spawn_app_with(TestOptions {
        refresh_token_expiry: 1,
        ..TestOptions::default()
    })
    .await;
    let tokens: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;

    let response = app
        .post("/auth/refresh", &json!({ "refreshToken": tokens["refreshToken"] }))
        .await;
    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn revoke_returns_404_for_unknown_token() {
    let app = spawn_app().await;

    let response = app
        .post("/auth/revoke", &json!({ "refreshToken": "never-issued" }))
        .await;

    assert_eq!(404, response.status().as_u16());
}

#[tokio::test]
async fn validate_returns_401_without_token() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(&format!("{}/auth/validate", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "MISSING_TOKEN");
}

#[tokio::test]
async fn validate_returns_400_for_invalid_token() {
    let app = spawn_app().await;

    let response = app.validate("definitely-not-a-token").await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn validate_returns_400_for_refresh_token() {
    let app = spawn_app().await;
    let tokens: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();

    let response = app.validate(tokens["refreshToken"].as_str().unwrap()).await;

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn validate_returns_401_for_expired_token() {
    let app = spawn_app_with(TestOptions {
        access_token_expiry: 1,
        ..TestOptions::default()
    })
    .await;
    let tokens: Value = app
        .register("alice", "alice@example.com", "password123")
        .await
        .json()
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2_100)).await;

    let response = app.validate(tokens["accessToken"].as_str().unwrap()).await;
    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

// --- Password Reset Tests ---

#[tokio::test]
async fn forgot_and_reset_password_flow() {
    let app = spawn_app().await;
    app.register("alice", "alice@example.com", "password123").await;

    let forgot = app
        .post("/auth/forgot-password", &json!({ "email": "alice@example.com" }))
        .await;
    assert_eq!(200, forgot.status().as_u16());
    assert_eq!(1, app.notifier.count());
    let token = app.notifier.last_token();

    let reset = app
        .post(
            &format!("/auth/reset-password/{}", token),
            &json!({ "newPassword": "brand-new-password" }),
        )
        .await;
    assert_eq!(200, reset.status().as_u16());

    assert_eq!(401, app.login("alice", "password123").await.status().as_u16());
    assert_eq!(201, app.login("alice", "brand-new-password").await.status().as_u16());

    let replay = app
        .post(
            &format!("/auth/reset-password/{}", token),
            &json!({ "newPassword": "another-password" }),
        )
        .await;
    assert_eq!(400, replay.status().as_u16());
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["code"], "RESET_TOKEN_INVALID");
}

#[tokio::test]
async fn second_reset_request_supersedes_the_first() {
    let app = spawn_app().await;
    app.register("alice", "alice@example.com", "password123").await;

    app.post("/auth/forgot-password", &json!({ "email": "alice@example.com" }))
        .await;
    let first = app.notifier.last_token();
    app.post("/auth/forgot-password", &json!({ "email": "alice@example.com" }))
        .await;
    let second = app.notifier.last_token();
    assert_ne!(first, second);

    let stale = app
        .post(
            &format!("/auth/reset-password/{}", first),
            &json!({ "password": "brand-new-password" }),
        )
        .await;
    assert_eq!(400, stale.status().as_u16());

    let fresh = app
        .post(
            &format!("/auth/reset-password/{}", second),
            &json!({ "password": "brand-new-password" }),
        )
        .await;
    assert_eq!(200, fresh.status().as_u16());
}

#[tokio::test]
async fn forgot_password_returns_404_for_unknown_email() {
    let app = spawn_app().await;

    let response = app
        .post("/auth/forgot-password", &json!({ "email": "nobody@example.com" }))
        .await;

    assert_eq!(404, response.status().as_u16());
    assert_eq!(0, app.notifier.count());
}

#[tokio::test]
async fn reset_password_enforces_password_policy() {
    let app = spawn_app().await;
    app.register("alice", "alice@example.com", "password123").await;
    app.post("/auth/forgot-password", &json!({ "email": "alice@example.com" }))
        .await;
    let token = app.notifier.last_token();

    let response = app
        .post(
            &format!("/auth/reset-password/{}", token),
            &json!({ "newPassword": "short" }),
        )
        .await;
    assert_eq!(400, response.status().as_u16());

    // The token survives a rejected attempt.
    let response = app
        .post(
            &format!("/auth/reset-password/{}", token),
            &json!({ "newPassword": "long-enough-now" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
}

// --- Rate Limiting Tests ---

#[tokio::test]
async fn auth_routes_return_429_after_threshold() {
    let app = spawn_app_with(TestOptions {
        max_requests: 3,
        ..TestOptions::default()
    })
    .await;

    for _ in 0..3 {
        let response = app.login("nobody", "password123").await;
        assert_eq!(401, response.status().as_u16());
    }

    let limited = app.login("nobody", "password123").await;
    assert_eq!(429, limited.status().as_u16());
    let body: Value = limited.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");

    // Health checks are not rate limited.
    let health = app
        .client
        .get(&format!("{}/health_check", app.address))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, health.status().as_u16());
}
