use std::{sync::Arc, time::Duration};

use {tokio::task::JoinHandle, tracing::debug};

use crate::{access_token::AccessTokenIssuer, email_otp::EmailOtpVerifier};

/// Periodically reclaim expired credentials and elapsed lockouts.
///
/// Correctness never depends on this running: every check re-evaluates
/// expiry and lockout at the moment it is made.
pub fn spawn_sweeper(
    issuer: Arc<AccessTokenIssuer>,
    verifier: Arc<EmailOtpVerifier>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            issuer.sweep();
            verifier.sweep();
            debug!(
                active_tokens = issuer.active_count(),
                pending_codes = verifier.pending_count(),
                "credential sweep complete"
            );
        }
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{access_token::AccessTokenPolicy, clock::ManualClock, email_otp::OtpPolicy},
    };

    #[tokio::test(start_paused = true)]
    async fn sweeper_reclaims_expired_tokens() {
        let clock = Arc::new(ManualClock::new());
        let issuer = Arc::new(AccessTokenIssuer::with_clock(
            AccessTokenPolicy::default(),
            clock.clone(),
        ));
        let verifier = Arc::new(EmailOtpVerifier::with_clock(
            OtpPolicy::default(),
            clock.clone(),
        ));
        issuer.generate();
        issuer.generate();

        let handle = spawn_sweeper(issuer.clone(), verifier, Duration::from_secs(60));
        clock.advance(Duration::from_secs(301));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(issuer.active_count(), 0);
        handle.abort();
    }
}
