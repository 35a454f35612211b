use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Json,
        extract::{ConnectInfo, Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post, put},
    },
    portcullis_auth::{Verdict, mask_address},
    portcullis_config::MailConfig,
    serde::Deserialize,
    tracing::{info, warn},
};

use crate::{
    peer::{is_local_connection, lockout_key},
    state::GatewayState,
};

/// Build the router with all `/api/auth/*` routes.
pub fn auth_router() -> axum::Router<Arc<GatewayState>> {
    axum::Router::new()
        .route("/generate-access", post(generate_access_handler))
        .route("/validate-access", post(validate_access_handler))
        .route("/revoke-access", post(revoke_access_handler))
        .route("/access-status", get(access_status_handler))
        .route("/request-otp", post(request_otp_handler))
        .route("/verify-otp", post(verify_otp_handler))
        .route("/mail", put(configure_mail_handler))
        .route("/mail/test", post(test_mail_handler))
        .route("/factors/{session_id}", get(factors_handler))
}

/// Reject the request unless privileged operations are open to this peer.
#[allow(clippy::result_large_err)]
fn require_local(
    state: &GatewayState,
    headers: &HeaderMap,
    addr: SocketAddr,
    action: &str,
) -> Result<(), Response> {
    if !state.local_issuance_only || is_local_connection(headers, addr) {
        return Ok(());
    }
    warn!(peer = %addr.ip(), action, "refused privileged request from non-local peer");
    Err((
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": format!("{action} is only available from localhost") })),
    )
        .into_response())
}

fn verdict_response(verdict: Verdict) -> Response {
    let status = if verdict.valid {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    (status, Json(verdict)).into_response()
}

// ── Access tokens ────────────────────────────────────────────────────────────

async fn generate_access_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_local(&state, &headers, addr, "token generation") {
        return denied;
    }
    let issued = state.issuer.generate();
    Json(serde_json::json!({
        "token": issued.token,
        "expiresInSeconds": issued.ttl.as_secs(),
    }))
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateAccessRequest {
    token: String,
    session_id: Option<String>,
}

async fn validate_access_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ValidateAccessRequest>,
) -> Response {
    let result = state.issuer.validate(&body.token, Some(lockout_key(addr)));
    if result.is_ok()
        && let Some(session_id) = body.session_id.as_deref()
    {
        state.factors.mark_access_token(session_id);
    }
    verdict_response(Verdict::from(result))
}

async fn revoke_access_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_local(&state, &headers, addr, "token revocation") {
        return denied;
    }
    let revoked = state.issuer.revoke_all();
    Json(serde_json::json!({ "revoked": revoked })).into_response()
}

async fn access_status_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "activeTokens": state.issuer.active_count(),
        "mailConfigured": state.verifier.is_configured(),
    }))
}

// ── Email codes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestOtpRequest {
    session_id: String,
    email: String,
}

async fn request_otp_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RequestOtpRequest>,
) -> impl IntoResponse {
    let email = body.email.trim();
    if body.session_id.is_empty() || !email.contains('@') {
        return Json(serde_json::json!({ "sent": false }));
    }
    if !state.otp.allows_recipient(email) {
        warn!(
            session_id = %body.session_id,
            to = %mask_address(email),
            "verification code refused for address outside the allow-list"
        );
        return Json(serde_json::json!({ "sent": false }));
    }
    let sent = state
        .verifier
        .send_otp(&body.session_id, email, Some(lockout_key(addr)))
        .await
        .is_ok();
    Json(serde_json::json!({ "sent": sent }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpRequest {
    session_id: String,
    code: String,
}

async fn verify_otp_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<VerifyOtpRequest>,
) -> Response {
    let result = state
        .verifier
        .verify(&body.session_id, body.code.trim(), Some(lockout_key(addr)));
    if result.is_ok() {
        state.factors.mark_email(&body.session_id);
    }
    verdict_response(Verdict::from(result))
}

async fn factors_handler(
    State(state): State<Arc<GatewayState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(state.factors.status(&session_id))
}

// ── Mail transport ───────────────────────────────────────────────────────────

async fn configure_mail_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(config): Json<MailConfig>,
) -> Response {
    if let Err(denied) = require_local(&state, &headers, addr, "mail configuration") {
        return denied;
    }
    match state.verifier.configure(&config) {
        Ok(()) => {
            info!(host = %config.host, "mail transport reconfigured");
            Json(serde_json::json!({ "ok": true })).into_response()
        },
        Err(e) => {
            warn!(host = %config.host, error = %e, "mail transport rejected");
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })).into_response()
        },
    }
}

async fn test_mail_handler(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = require_local(&state, &headers, addr, "mail test") {
        return denied;
    }
    match state.verifier.test_connection().await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            warn!(error = %e, "mail transport check failed");
            Json(serde_json::json!({ "ok": false, "error": e.to_string() })).into_response()
        },
    }
}
