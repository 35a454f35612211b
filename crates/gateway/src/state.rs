use std::{sync::Arc, time::Duration};

use {
    portcullis_auth::{
        AccessTokenIssuer, AccessTokenPolicy, Clock, EmailOtpVerifier, OtpPolicy, SystemClock,
    },
    portcullis_config::{OtpConfig, PortcullisConfig},
};

use crate::{factors::FactorGate, request_throttle::RequestThrottle};

/// Shared state behind every route.
pub struct GatewayState {
    pub issuer: Arc<AccessTokenIssuer>,
    pub verifier: Arc<EmailOtpVerifier>,
    pub factors: FactorGate,
    pub throttle: RequestThrottle,
    /// Refuse token issuance and mail management to non-loopback peers.
    pub local_issuance_only: bool,
    pub otp: OtpConfig,
    pub sweep_interval: Duration,
}

impl GatewayState {
    #[must_use]
    pub fn from_config(config: &PortcullisConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: &PortcullisConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            issuer: Arc::new(AccessTokenIssuer::with_clock(
                AccessTokenPolicy::from(&config.access),
                Arc::clone(&clock),
            )),
            verifier: Arc::new(EmailOtpVerifier::with_clock(
                OtpPolicy::from(&config.otp),
                Arc::clone(&clock),
            )),
            factors: FactorGate::with_clock(config.otp.session_ttl(), clock),
            throttle: RequestThrottle::new(&config.throttle),
            local_issuance_only: config.server.local_issuance_only,
            otp: config.otp.clone(),
            sweep_interval: Duration::from_secs(config.access.sweep_interval_secs),
        })
    }
}
