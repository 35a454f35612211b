//! Integration tests for the `/api/auth` routes over a real socket.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    portcullis_auth::{MailTransport, OutgoingMail, mail},
    portcullis_config::PortcullisConfig,
    portcullis_gateway::{GatewayState, build_gateway_app},
    serde_json::{Value, json},
    tokio::net::TcpListener,
};

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingTransport {
    fn last_code(&self) -> String {
        let sent = self.sent.lock().unwrap();
        sent.last()
            .unwrap()
            .body
            .split_whitespace()
            .find(|w| w.len() == 6 && w.bytes().all(|b| b.is_ascii_digit()))
            .unwrap()
            .to_string()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> mail::Result<()> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    async fn test_connection(&self) -> mail::Result<()> {
        Ok(())
    }
}

async fn start_server(config: PortcullisConfig) -> (String, Arc<GatewayState>) {
    let state = GatewayState::from_config(&config);
    let app = build_gateway_app(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{base}{path}"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn get(base: &str, path: &str) -> Value {
    reqwest::get(format!("{base}{path}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn generate(base: &str) -> String {
    let (status, body) = post(base, "/api/auth/generate-access", json!({})).await;
    assert_eq!(status, 200);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn token_is_single_use() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let (status, body) = post(&base, "/api/auth/generate-access", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["expiresInSeconds"], 300);
    let token = body["token"].as_str().unwrap();

    let (status, body) = post(&base, "/api/auth/validate-access", json!({ "token": token })).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "valid": true }));

    let (status, body) = post(&base, "/api/auth/validate-access", json!({ "token": token })).await;
    assert_eq!(status, 403);
    assert_eq!(body["reason"], "Token already used");
    assert_eq!(body["code"], "token_already_used");
}

#[tokio::test]
async fn remote_looking_request_cannot_generate_or_revoke() {
    let (base, state) = start_server(PortcullisConfig::default()).await;
    let client = reqwest::Client::new();

    for path in ["/api/auth/generate-access", "/api/auth/revoke-access"] {
        let resp = client
            .post(format!("{base}{path}"))
            .header("x-forwarded-for", "203.0.113.50")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403, "{path}");
    }
    assert_eq!(state.issuer.active_count(), 0);
}

#[tokio::test]
async fn repeated_invalid_tokens_lock_out_the_peer() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let token = generate(&base).await;

    for _ in 0..10 {
        let (status, body) =
            post(&base, "/api/auth/validate-access", json!({ "token": "bogus" })).await;
        assert_eq!(status, 403);
        assert_eq!(body["code"], "invalid_token");
    }

    // The valid token is not even looked at while locked out.
    let (status, body) = post(&base, "/api/auth/validate-access", json!({ "token": token })).await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "locked_out");
    assert_eq!(
        body["reason"],
        "Too many failed attempts. Try again in 900 seconds."
    );

    let status = get(&base, "/api/auth/access-status").await;
    assert_eq!(status["activeTokens"], 1);
}

#[tokio::test]
async fn revoke_clears_live_tokens() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let token = generate(&base).await;
    generate(&base).await;

    let (status, body) = post(&base, "/api/auth/revoke-access", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["revoked"], 2);

    let (_, body) = post(&base, "/api/auth/validate-access", json!({ "token": token })).await;
    assert_eq!(body["code"], "invalid_token");
}

#[tokio::test]
async fn both_factors_complete_the_session() {
    let (base, state) = start_server(PortcullisConfig::default()).await;
    let transport = Arc::new(RecordingTransport::default());
    state.verifier.set_transport(transport.clone());

    let token = generate(&base).await;
    let (status, _) = post(
        &base,
        "/api/auth/validate-access",
        json!({ "token": token, "sessionId": "s1" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        get(&base, "/api/auth/factors/s1").await,
        json!({ "accessToken": true, "email": false, "complete": false })
    );

    let (_, body) = post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "s1", "email": "user@x.com" }),
    )
    .await;
    assert_eq!(body, json!({ "sent": true }));
    let code = transport.last_code();

    let (status, body) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "s1", "code": "abcdef" }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["reason"], "Invalid code.");

    let (status, _) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "s1", "code": code }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(get(&base, "/api/auth/factors/s1").await["complete"], true);
}

#[tokio::test]
async fn request_otp_without_transport_is_not_sent() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let (status, body) = post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "s1", "email": "user@x.com" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "sent": false }));
    assert_eq!(get(&base, "/api/auth/access-status").await["mailConfigured"], false);
}

#[tokio::test]
async fn allow_list_restricts_recipients() {
    let mut config = PortcullisConfig::default();
    config.otp.allowed_emails = vec!["owner@example.com".into()];
    let (base, state) = start_server(config).await;
    let transport = Arc::new(RecordingTransport::default());
    state.verifier.set_transport(transport.clone());

    let (_, body) = post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "s1", "email": "stranger@example.com" }),
    )
    .await;
    assert_eq!(body["sent"], false);

    let (_, body) = post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "s1", "email": "Owner@Example.com" }),
    )
    .await;
    assert_eq!(body["sent"], true);
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn mail_transport_can_be_configured_at_runtime() {
    let (base, _) = start_server(PortcullisConfig::default()).await;
    let client = reqwest::Client::new();

    let bad: Value = client
        .put(format!("{base}/api/auth/mail"))
        .json(&json!({ "host": "smtp.example.com", "from": "not an address" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bad["ok"], false);
    assert!(bad["error"].is_string());

    let good: Value = client
        .put(format!("{base}/api/auth/mail"))
        .json(&json!({
            "host": "smtp.example.com",
            "port": 587,
            "user": "bot",
            "pass": "hunter22",
            "from": "Portcullis <bot@example.com>",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(good, json!({ "ok": true }));
    assert_eq!(get(&base, "/api/auth/access-status").await["mailConfigured"], true);
}

fn wrong_code(correct: &str) -> &'static str {
    if correct == "000000" { "111111" } else { "000000" }
}

#[tokio::test]
async fn code_attempt_budget_is_enforced() {
    let (base, state) = start_server(PortcullisConfig::default()).await;
    let transport = Arc::new(RecordingTransport::default());
    state.verifier.set_transport(transport.clone());

    post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "s1", "email": "user@x.com" }),
    )
    .await;
    let code = transport.last_code();

    for _ in 0..5 {
        let (status, body) = post(
            &base,
            "/api/auth/verify-otp",
            json!({ "sessionId": "s1", "code": wrong_code(&code) }),
        )
        .await;
        assert_eq!(status, 403);
        assert_eq!(body["code"], "otp_mismatch");
    }

    // The sixth call exceeds the budget even with the right code.
    let (status, body) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "s1", "code": code }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "otp_attempts_exceeded");
    assert_eq!(
        body["reason"],
        "Too many failed attempts. Please request a new code."
    );

    let (_, body) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "s1", "code": code }),
    )
    .await;
    assert_eq!(body["code"], "otp_not_pending");
    assert_eq!(get(&base, "/api/auth/factors/s1").await["email"], false);
}

#[tokio::test]
async fn cycling_sessions_locks_out_the_peer() {
    let mut config = PortcullisConfig::default();
    config.otp.max_failed_attempts = 3;
    let (base, state) = start_server(config).await;
    let transport = Arc::new(RecordingTransport::default());
    state.verifier.set_transport(transport.clone());

    for session in ["a", "b", "c"] {
        let (_, body) = post(
            &base,
            "/api/auth/request-otp",
            json!({ "sessionId": session, "email": "user@x.com" }),
        )
        .await;
        assert_eq!(body["sent"], true);
        let code = transport.last_code();
        let (_, body) = post(
            &base,
            "/api/auth/verify-otp",
            json!({ "sessionId": session, "code": wrong_code(&code) }),
        )
        .await;
        assert_eq!(body["code"], "otp_mismatch");
    }

    // Session "c" still holds a live code, but the peer is locked.
    let code = transport.last_code();
    let (status, body) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "c", "code": code }),
    )
    .await;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "locked_out");

    let (_, body) = post(
        &base,
        "/api/auth/request-otp",
        json!({ "sessionId": "d", "email": "user@x.com" }),
    )
    .await;
    assert_eq!(body["sent"], false);
    assert_eq!(transport.sent.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn code_requests_are_throttled_per_peer() {
    let mut config = PortcullisConfig::default();
    config.throttle.otp_requests = 2;
    let (base, state) = start_server(config).await;
    let transport = Arc::new(RecordingTransport::default());
    state.verifier.set_transport(transport.clone());
    let client = reqwest::Client::new();

    for session in ["s1", "s2"] {
        let (status, _) = post(
            &base,
            "/api/auth/request-otp",
            json!({ "sessionId": session, "email": "user@x.com" }),
        )
        .await;
        assert_eq!(status, 200);
    }

    let resp = client
        .post(format!("{base}/api/auth/request-otp"))
        .json(&json!({ "sessionId": "s3", "email": "user@x.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("retry-after"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "too many requests");
    assert!(body["retryAfterSeconds"].as_u64().unwrap() >= 1);
    assert_eq!(transport.sent.lock().unwrap().len(), 2);

    // Verification has its own budget.
    let (status, _) = post(
        &base,
        "/api/auth/verify-otp",
        json!({ "sessionId": "s2", "code": transport.last_code() }),
    )
    .await;
    assert_eq!(status, 200);
}
