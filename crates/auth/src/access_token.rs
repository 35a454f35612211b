//! Single-use bearer tokens for the dashboard's first verification step.
//!
//! Tokens are handed out over an out-of-band channel (CLI output, SSH tunnel)
//! and consumed by exactly one successful [`AccessTokenIssuer::validate`].
//! A consumed or expired token leaves the live pool immediately; only a
//! SHA-256 digest of it is kept around so replays keep getting the right
//! answer until the record ages out.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use {
    portcullis_config::AccessConfig,
    sha2::{Digest, Sha256},
    tracing::{debug, info, warn},
};

use crate::{
    clock::{Clock, SystemClock},
    error::Rejection,
    lockout::{LockoutPolicy, LockoutTracker, retry_after_secs},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessTokenPolicy {
    pub ttl: Duration,
    pub max_active_tokens: usize,
    pub lockout: LockoutPolicy,
}

impl Default for AccessTokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_active_tokens: 5,
            lockout: LockoutPolicy::default(),
        }
    }
}

impl From<&AccessConfig> for AccessTokenPolicy {
    fn from(config: &AccessConfig) -> Self {
        Self {
            ttl: config.token_ttl(),
            max_active_tokens: config.max_active_tokens,
            lockout: LockoutPolicy {
                max_failed_attempts: config.max_failed_attempts,
                lockout_duration: config.lockout_duration(),
            },
        }
    }
}

/// A freshly generated token, returned once to the caller.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Instant,
    pub ttl: Duration,
}

#[derive(Debug)]
struct AccessToken {
    created_at: Instant,
    expires_at: Instant,
    used: bool,
    ip_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetiredReason {
    Used,
    Expired,
}

#[derive(Debug, Clone, Copy)]
struct Retired {
    reason: RetiredReason,
    /// Reclaimed once this passes.
    keep_until: Instant,
}

struct IssuerInner {
    tokens: HashMap<String, AccessToken>,
    retired: HashMap<String, Retired>,
    lockout: LockoutTracker<IpAddr>,
}

pub struct AccessTokenIssuer {
    policy: AccessTokenPolicy,
    clock: Arc<dyn Clock>,
    inner: Mutex<IssuerInner>,
}

impl Default for AccessTokenIssuer {
    fn default() -> Self {
        Self::new(AccessTokenPolicy::default())
    }
}

impl AccessTokenIssuer {
    #[must_use]
    pub fn new(policy: AccessTokenPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(policy: AccessTokenPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            inner: Mutex::new(IssuerInner {
                tokens: HashMap::new(),
                retired: HashMap::new(),
                lockout: LockoutTracker::new(policy.lockout),
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> AccessTokenPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, IssuerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a new token, evicting the oldest live one if the pool is full.
    pub fn generate(&self) -> IssuedToken {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.purge(now, self.policy.ttl);

        while inner.tokens.len() >= self.policy.max_active_tokens.max(1) {
            let oldest = inner
                .tokens
                .iter()
                .min_by_key(|(_, t)| t.created_at)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else { break };
            inner.tokens.remove(&oldest);
            warn!(
                max_active_tokens = self.policy.max_active_tokens,
                "access token pool full, evicted oldest token"
            );
        }

        let token = generate_token();
        let expires_at = now + self.policy.ttl;
        inner.tokens.insert(token.clone(), AccessToken {
            created_at: now,
            expires_at,
            used: false,
            ip_address: None,
        });
        info!(
            active = inner.tokens.len(),
            ttl_secs = self.policy.ttl.as_secs(),
            "access token generated"
        );

        IssuedToken {
            token,
            expires_at,
            ttl: self.policy.ttl,
        }
    }

    /// Check and consume a token.
    ///
    /// `ip` must be the transport-level peer address. When it is locked out the
    /// token map is not consulted at all, so a locked-out caller learns nothing
    /// about the token it presented.
    pub fn validate(&self, token: &str, ip: Option<IpAddr>) -> Result<(), Rejection> {
        let now = self.clock.now();
        let ttl = self.policy.ttl;
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(ip) = ip
            && let Some(remaining) = inner.lockout.locked_for(&ip, now)
        {
            debug!(%ip, "access token validation refused, peer locked out");
            return Err(Rejection::LockedOut {
                retry_after_secs: retry_after_secs(remaining),
            });
        }

        let outcome = match inner.tokens.get_mut(token) {
            None => Err(match inner.retired.get(&digest(token)).map(|r| r.reason) {
                Some(RetiredReason::Used) => Rejection::TokenAlreadyUsed,
                Some(RetiredReason::Expired) => Rejection::TokenExpired,
                None => Rejection::InvalidToken,
            }),
            Some(entry) if entry.used => Err(Rejection::TokenAlreadyUsed),
            Some(entry) if now > entry.expires_at => Err(Rejection::TokenExpired),
            Some(entry) => {
                entry.used = true;
                entry.ip_address = ip;
                Ok(())
            },
        };

        match outcome {
            Ok(()) => {
                if let Some(entry) = inner.tokens.remove(token) {
                    inner.retire(token, RetiredReason::Used, entry.expires_at + ttl);
                    debug!(ip = ?entry.ip_address, "access token consumed");
                }
                if let Some(ip) = ip {
                    inner.lockout.clear(&ip);
                }
                Ok(())
            },
            Err(rejection) => {
                if let Some(entry) = inner.tokens.remove(token) {
                    let reason = if entry.used {
                        RetiredReason::Used
                    } else {
                        RetiredReason::Expired
                    };
                    inner.retire(token, reason, entry.expires_at + ttl);
                }
                if let Some(ip) = ip
                    && let Some(duration) = inner.lockout.record_failure(ip, now)
                {
                    warn!(
                        %ip,
                        lockout_secs = duration.as_secs(),
                        "peer locked out after repeated access token failures"
                    );
                }
                Err(rejection)
            },
        }
    }

    /// Number of live tokens, after dropping expired ones.
    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.purge(now, self.policy.ttl);
        inner.tokens.len()
    }

    /// Emergency revocation of every live token. Returns how many were dropped.
    pub fn revoke_all(&self) -> usize {
        let mut inner = self.lock();
        let revoked = inner.tokens.len();
        inner.tokens.clear();
        warn!(revoked, "all access tokens revoked");
        revoked
    }

    /// Reclaim expired tokens, aged-out retired records, and elapsed lockouts.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.purge(now, self.policy.ttl);
        inner.retired.retain(|_, r| r.keep_until > now);
        inner.lockout.sweep(now);
    }

    #[must_use]
    pub fn is_locked_out(&self, ip: IpAddr) -> bool {
        let now = self.clock.now();
        self.lock().lockout.locked_for(&ip, now).is_some()
    }
}

impl IssuerInner {
    fn purge(&mut self, now: Instant, ttl: Duration) {
        let stale: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, t)| t.used || now > t.expires_at)
            .map(|(k, _)| k.clone())
            .collect();
        for token in stale {
            if let Some(entry) = self.tokens.remove(&token) {
                let reason = if entry.used {
                    RetiredReason::Used
                } else {
                    RetiredReason::Expired
                };
                self.retire(&token, reason, entry.expires_at + ttl);
            }
        }
    }

    fn retire(&mut self, token: &str, reason: RetiredReason, keep_until: Instant) {
        self.retired.insert(digest(token), Retired { reason, keep_until });
    }
}

/// 256 bits from the thread CSPRNG, base64url without padding.
fn generate_token() -> String {
    use {base64::Engine, rand::RngCore};

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
