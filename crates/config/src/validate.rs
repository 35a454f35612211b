//! Semantic checks on a loaded configuration.
//!
//! Parsing already guarantees the shape; these checks catch values that parse
//! fine but would make the verification subsystem useless or unsafe.

use std::net::IpAddr;

use crate::schema::PortcullisConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "access.token_ttl_secs"
    pub path: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

/// Validate policy values and transport settings.
#[must_use]
pub fn validate(config: &PortcullisConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let access = &config.access;
    let otp = &config.otp;

    if access.token_ttl_secs == 0 {
        result.push(
            Severity::Error,
            "access.token_ttl_secs",
            "tokens would expire on issue",
        );
    }
    if access.max_active_tokens == 0 {
        result.push(
            Severity::Error,
            "access.max_active_tokens",
            "at least one active token is required",
        );
    }
    if access.max_failed_attempts == 0 {
        result.push(
            Severity::Error,
            "access.max_failed_attempts",
            "every caller would be locked out immediately",
        );
    }
    if access.lockout_duration_secs == 0 {
        result.push(
            Severity::Warning,
            "access.lockout_duration_secs",
            "lockout disabled; brute-force attempts are only rate limited by the token pool",
        );
    }
    if access.token_ttl_secs > 3600 {
        result.push(
            Severity::Warning,
            "access.token_ttl_secs",
            format!(
                "{}s is long for a one-time access token",
                access.token_ttl_secs
            ),
        );
    }

    if otp.expiry_secs == 0 {
        result.push(
            Severity::Error,
            "otp.expiry_secs",
            "codes would expire on send",
        );
    }
    if otp.max_attempts == 0 {
        result.push(
            Severity::Error,
            "otp.max_attempts",
            "codes could never be verified",
        );
    }
    if otp.max_failed_attempts == 0 {
        result.push(
            Severity::Error,
            "otp.max_failed_attempts",
            "every peer would be locked out immediately",
        );
    }

    if config.throttle.window_secs == 0 {
        result.push(
            Severity::Error,
            "throttle.window_secs",
            "request limits need a window of at least one second",
        );
    }
    if config.throttle.otp_requests == 0 {
        result.push(
            Severity::Warning,
            "throttle.otp_requests",
            "verification codes can never be requested",
        );
    }

    match &config.mail {
        None => result.push(
            Severity::Info,
            "mail",
            "no mail transport configured; email verification is unavailable until one is set",
        ),
        Some(mail) => {
            if mail.host.trim().is_empty() {
                result.push(Severity::Error, "mail.host", "empty SMTP host");
            }
            if !mail.from.contains('@') {
                result.push(
                    Severity::Error,
                    "mail.from",
                    format!("{:?} is not a mail address", mail.from),
                );
            }
            if mail.user.is_some() != mail.pass.is_some() {
                result.push(
                    Severity::Warning,
                    "mail.user",
                    "SMTP user and pass should be set together",
                );
            }
            if !mail.secure && mail.port == 25 && !is_loopback_host(&mail.host) {
                result.push(
                    Severity::Warning,
                    "mail.port",
                    "port 25 to a remote relay usually travels unencrypted",
                );
            }
        },
    }

    let bind_is_loopback = config
        .server
        .bind
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback());
    if !config.server.local_issuance_only && !bind_is_loopback {
        result.push(
            Severity::Warning,
            "server.local_issuance_only",
            "remote peers can mint access tokens",
        );
    }

    result
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
