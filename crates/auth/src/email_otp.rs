//! Email one-time passcodes.
//!
//! A code is bound to a verification session, lives for [`OtpPolicy::expiry`],
//! and allows [`OtpPolicy::max_attempts`] verification calls. Every call
//! counts, right or wrong, so a session cannot retry forever. Failed
//! verifications also feed a per-peer [`LockoutTracker`], so cycling through
//! fresh sessions from one address is bounded too.

use std::{
    net::IpAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    portcullis_config::{MailConfig, OtpConfig},
    rand::Rng,
    tracing::{debug, info, warn},
};

use crate::{
    clock::{Clock, SystemClock},
    error::Rejection,
    lockout::{LockoutPolicy, LockoutTracker, retry_after_secs},
    mail::{self, MailTransport, OutgoingMail, SmtpMailTransport, mask_address},
};

pub const CODE_LENGTH: usize = 6;
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub expiry: Duration,
    /// Slack added to `expiry` before the scheduled cleanup fires.
    pub cleanup_grace: Duration,
    pub max_attempts: u32,
    pub lockout: LockoutPolicy,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(300),
            cleanup_grace: Duration::from_secs(60),
            max_attempts: MAX_ATTEMPTS,
            lockout: LockoutPolicy::default(),
        }
    }
}

impl From<&OtpConfig> for OtpPolicy {
    fn from(config: &OtpConfig) -> Self {
        Self {
            expiry: config.expiry(),
            cleanup_grace: config.cleanup_grace(),
            max_attempts: config.max_attempts,
            lockout: LockoutPolicy {
                max_failed_attempts: config.max_failed_attempts,
                lockout_duration: config.lockout_duration(),
            },
        }
    }
}

#[derive(Debug)]
struct PendingEmailOtp {
    code: String,
    email: String,
    created_at: Instant,
    attempts: u32,
    generation: u64,
}

pub struct EmailOtpVerifier {
    policy: OtpPolicy,
    clock: Arc<dyn Clock>,
    transport: RwLock<Option<Arc<dyn MailTransport>>>,
    pending: Arc<DashMap<String, PendingEmailOtp>>,
    lockout: Mutex<LockoutTracker<IpAddr>>,
    generations: AtomicU64,
}

impl Default for EmailOtpVerifier {
    fn default() -> Self {
        Self::new(OtpPolicy::default())
    }
}

impl EmailOtpVerifier {
    #[must_use]
    pub fn new(policy: OtpPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(policy: OtpPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            transport: RwLock::new(None),
            pending: Arc::new(DashMap::new()),
            lockout: Mutex::new(LockoutTracker::new(policy.lockout)),
            generations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn policy(&self) -> OtpPolicy {
        self.policy
    }

    /// Build an SMTP transport from `config`, replacing any previous one.
    ///
    /// On error the previous transport stays in place.
    pub fn configure(&self, config: &MailConfig) -> mail::Result<()> {
        let transport = SmtpMailTransport::from_config(config)?;
        self.set_transport(Arc::new(transport));
        info!(host = %config.host, "email verification transport configured");
        Ok(())
    }

    pub fn set_transport(&self, transport: Arc<dyn MailTransport>) {
        *self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn current_transport(&self) -> Option<Arc<dyn MailTransport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lockout(&self) -> MutexGuard<'_, LockoutTracker<IpAddr>> {
        self.lockout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a code for `session_id` and mail it to `email`.
    ///
    /// Replaces any code already pending for the session. If delivery fails
    /// the new code is withdrawn, so an undelivered code is never usable.
    /// A locked-out `ip` cannot request codes.
    pub async fn send_otp(
        &self,
        session_id: &str,
        email: &str,
        ip: Option<IpAddr>,
    ) -> Result<(), Rejection> {
        let now = self.clock.now();
        if let Some(ip) = ip
            && let Some(remaining) = self.lockout().locked_for(&ip, now)
        {
            return Err(Rejection::LockedOut {
                retry_after_secs: retry_after_secs(remaining),
            });
        }
        let Some(transport) = self.current_transport() else {
            return Err(Rejection::TransportNotConfigured);
        };

        let code = generate_code();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let mail = OutgoingMail::verification_code(
            email,
            &code,
            self.policy.expiry.as_secs().div_ceil(60),
        );
        self.pending.insert(session_id.to_string(), PendingEmailOtp {
            code,
            email: email.to_string(),
            created_at: now,
            attempts: 0,
            generation,
        });
        self.schedule_cleanup(session_id.to_string(), generation);

        if let Err(e) = transport.send(&mail).await {
            self.pending
                .remove_if(session_id, |_, p| p.generation == generation);
            warn!(
                session_id,
                to = %mask_address(email),
                error = %e,
                "failed to send verification email"
            );
            return Err(Rejection::TransportSendFailed(e.to_string()));
        }

        info!(session_id, to = %mask_address(email), "verification code sent");
        Ok(())
    }

    /// Remove the entry once it can no longer verify. Only reclaims memory;
    /// expiry is enforced by [`Self::verify`] regardless of whether this runs.
    fn schedule_cleanup(&self, session_id: String, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pending = Arc::clone(&self.pending);
        let delay = self.policy.expiry + self.policy.cleanup_grace;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if pending
                .remove_if(&session_id, |_, p| p.generation == generation)
                .is_some()
            {
                debug!(session_id, "expired verification code reclaimed");
            }
        });
    }

    /// Check `code` against the session's pending code.
    ///
    /// `ip` must be the transport-level peer address. Failures count against
    /// it; when it is locked out the pending code is not consulted.
    pub fn verify(
        &self,
        session_id: &str,
        code: &str,
        ip: Option<IpAddr>,
    ) -> Result<(), Rejection> {
        let now = self.clock.now();
        // The lockout guard is held across the pending-entry update so the
        // whole check is one atomic step.
        let mut lockout = self.lockout();
        if let Some(ip) = ip
            && let Some(remaining) = lockout.locked_for(&ip, now)
        {
            debug!(%ip, session_id, "verification refused, peer locked out");
            return Err(Rejection::LockedOut {
                retry_after_secs: retry_after_secs(remaining),
            });
        }

        let Entry::Occupied(mut entry) = self.pending.entry(session_id.to_string()) else {
            return Err(Rejection::OtpNotPending);
        };

        if now.saturating_duration_since(entry.get().created_at) > self.policy.expiry {
            entry.remove();
            return Err(Rejection::OtpExpired);
        }

        let pending = entry.get_mut();
        pending.attempts += 1;
        if pending.attempts > self.policy.max_attempts {
            entry.remove();
            record_failure(&mut lockout, ip, now);
            return Err(Rejection::OtpAttemptsExceeded);
        }

        if !constant_time_eq(code.as_bytes(), pending.code.as_bytes()) {
            let attempts = pending.attempts;
            drop(entry);
            record_failure(&mut lockout, ip, now);
            debug!(session_id, attempts, "verification code mismatch");
            return Err(Rejection::OtpMismatch);
        }

        let (_, verified) = entry.remove_entry();
        if let Some(ip) = ip {
            lockout.clear(&ip);
        }
        info!(
            session_id,
            to = %mask_address(&verified.email),
            "email verification succeeded"
        );
        Ok(())
    }

    /// Whether a usable code is pending. Expired entries are purged.
    pub fn has_pending(&self, session_id: &str) -> bool {
        let now = self.clock.now();
        let expiry = self.policy.expiry;
        self.pending.remove_if(session_id, |_, p| {
            now.saturating_duration_since(p.created_at) > expiry
        });
        self.pending.contains_key(session_id)
    }

    /// Check the configured transport without sending a code.
    pub async fn test_connection(&self) -> mail::Result<()> {
        let transport = self.current_transport().ok_or(mail::Error::NotConfigured)?;
        transport.test_connection().await
    }

    /// Drop expired codes and elapsed lockouts.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let expiry = self.policy.expiry;
        self.pending
            .retain(|_, p| now.saturating_duration_since(p.created_at) <= expiry);
        self.lockout().sweep(now);
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn record_failure(lockout: &mut LockoutTracker<IpAddr>, ip: Option<IpAddr>, now: Instant) {
    let Some(ip) = ip else { return };
    if let Some(duration) = lockout.record_failure(ip, now) {
        warn!(
            %ip,
            lockout_secs = duration.as_secs(),
            "peer locked out after repeated verification failures"
        );
    }
}

/// Uniform over 0..=999_999, zero-padded.
fn generate_code() -> String {
    format_code(rand::rng().random_range(0..1_000_000))
}

fn format_code(value: u32) -> String {
    format!("{value:0width$}", width = CODE_LENGTH)
}

/// Compares every byte pair regardless of where the inputs first differ.
/// Length is checked up front; it is not the secret being protected.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    accumulate_difference(a, b) == 0
}

fn accumulate_difference(a: &[u8], b: &[u8]) -> u8 {
    a.iter().zip(b).fold(0, |acc, (x, y)| acc | (x ^ y))
}
