//! Progress of a verification session through its factors.
//!
//! The access token and email code are checked independently; this gate only
//! remembers which of them a session has passed so the next step (admin PIN,
//! TOTP) knows when to proceed.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    portcullis_auth::{Clock, SystemClock},
    serde::Serialize,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorStatus {
    pub access_token: bool,
    pub email: bool,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy)]
struct FactorProgress {
    access_token: bool,
    email: bool,
    updated_at: Instant,
}

pub struct FactorGate {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    sessions: DashMap<String, FactorProgress>,
}

impl FactorGate {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            sessions: DashMap::new(),
        }
    }

    pub fn mark_access_token(&self, session_id: &str) {
        self.update(session_id, |p| p.access_token = true);
    }

    pub fn mark_email(&self, session_id: &str) {
        self.update(session_id, |p| p.email = true);
    }

    fn update(&self, session_id: &str, apply: impl FnOnce(&mut FactorProgress)) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert(FactorProgress {
                access_token: false,
                email: false,
                updated_at: now,
            });
        if now.saturating_duration_since(entry.updated_at) > ttl {
            entry.access_token = false;
            entry.email = false;
        }
        apply(&mut *entry);
        entry.updated_at = now;
    }

    #[must_use]
    pub fn status(&self, session_id: &str) -> FactorStatus {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.sessions
            .remove_if(session_id, |_, p| now.saturating_duration_since(p.updated_at) > ttl);
        self.sessions
            .get(session_id)
            .map(|p| FactorStatus {
                access_token: p.access_token,
                email: p.email,
                complete: p.access_token && p.email,
            })
            .unwrap_or_default()
    }

    /// Forget sessions idle longer than the TTL.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.sessions
            .retain(|_, p| now.saturating_duration_since(p.updated_at) <= ttl);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
