use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    axum::{
        extract::{ConnectInfo, State},
        http::{Method, StatusCode},
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    portcullis_config::ThrottleConfig,
    tracing::warn,
};

use crate::{peer::lockout_key, state::GatewayState};

const CLEANUP_EVERY_REQUESTS: u64 = 512;

/// Fixed-window request counter per peer address and route class.
///
/// Sits in front of the lockout trackers: lockout bounds failed guesses,
/// this bounds how fast a single peer can ask for codes or submit them.
#[derive(Clone)]
pub struct RequestThrottle {
    limits: ThrottleLimits,
    buckets: Arc<DashMap<ThrottleKey, WindowState>>,
    requests_seen: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ThrottleScope {
    OtpRequest,
    OtpVerify,
    AuthApi,
}

impl ThrottleScope {
    fn from_request(method: &Method, path: &str) -> Option<Self> {
        if method == Method::POST {
            match path {
                "/api/auth/request-otp" => return Some(Self::OtpRequest),
                "/api/auth/verify-otp" => return Some(Self::OtpVerify),
                _ => {},
            }
        }
        if path.starts_with("/api/auth/") {
            return Some(Self::AuthApi);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ThrottleKey {
    ip: IpAddr,
    scope: ThrottleScope,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

#[derive(Debug, Clone, Copy)]
struct ThrottleLimits {
    window: Duration,
    otp_requests: usize,
    otp_verifications: usize,
    auth_requests: usize,
}

impl From<&ThrottleConfig> for ThrottleLimits {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            window: config.window(),
            otp_requests: config.otp_requests,
            otp_verifications: config.otp_verifications,
            auth_requests: config.auth_requests,
        }
    }
}

enum ThrottleDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl RequestThrottle {
    #[must_use]
    pub fn new(config: &ThrottleConfig) -> Self {
        Self::with_limits(ThrottleLimits::from(config))
    }

    fn with_limits(limits: ThrottleLimits) -> Self {
        Self {
            limits,
            buckets: Arc::new(DashMap::new()),
            requests_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    fn max_requests(&self, scope: ThrottleScope) -> usize {
        match scope {
            ThrottleScope::OtpRequest => self.limits.otp_requests,
            ThrottleScope::OtpVerify => self.limits.otp_verifications,
            ThrottleScope::AuthApi => self.limits.auth_requests,
        }
    }

    fn check(&self, ip: IpAddr, scope: ThrottleScope) -> ThrottleDecision {
        self.check_at(ip, scope, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, scope: ThrottleScope, now: Instant) -> ThrottleDecision {
        let window = self.limits.window;
        let max_requests = self.max_requests(scope);
        if max_requests == 0 {
            return ThrottleDecision::Denied {
                retry_after: window.max(Duration::from_secs(1)),
            };
        }

        let key = ThrottleKey { ip, scope };
        let decision = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                let elapsed = now.duration_since(state.started_at);
                if elapsed >= window {
                    state.started_at = now;
                    state.count = 1;
                    ThrottleDecision::Allowed
                } else if state.count < max_requests {
                    state.count += 1;
                    ThrottleDecision::Allowed
                } else {
                    ThrottleDecision::Denied {
                        retry_after: window.saturating_sub(elapsed),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                ThrottleDecision::Allowed
            },
        };

        self.cleanup_if_needed(now);
        decision
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.requests_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_REQUESTS) {
            return;
        }
        let stale_after = self.limits.window.saturating_mul(3);
        self.buckets
            .retain(|_, state| now.duration_since(state.started_at) <= stale_after);
    }
}

impl Default for RequestThrottle {
    fn default() -> Self {
        Self::new(&ThrottleConfig::default())
    }
}

/// Middleware refusing `/api/auth` requests over the per-peer limit.
///
/// Keys on the TCP peer, never on forwarded headers, so a client cannot
/// pick its own bucket.
pub async fn throttle_gate(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(scope) = ThrottleScope::from_request(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let ip = lockout_key(addr);
    match state.throttle.check(ip, scope) {
        ThrottleDecision::Allowed => next.run(request).await,
        ThrottleDecision::Denied { retry_after } => {
            warn!(peer = %ip, path = request.uri().path(), "request throttled");
            rate_limited_response(retry_after)
        },
    }
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let retry_after_secs = retry_after.as_secs().max(1);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "too many requests",
            "retryAfterSeconds": retry_after_secs
        })),
    )
        .into_response();

    if let Ok(value) = retry_after_secs.to_string().parse() {
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}
