use serde::Serialize;

/// Why a credential check did not pass.
///
/// These are expected outcomes of user error or adversarial input, never
/// faults. `Display` is the reason shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token already used")]
    TokenAlreadyUsed,

    /// The identifier is locked out. Deliberately says nothing about the
    /// credential that was presented.
    #[error("Too many failed attempts. Try again in {retry_after_secs} seconds.")]
    LockedOut { retry_after_secs: u64 },

    #[error("Email verification is not available.")]
    TransportNotConfigured,

    #[error("Failed to send verification email.")]
    TransportSendFailed(String),

    #[error("No pending email verification or code expired.")]
    OtpNotPending,

    #[error("Verification code expired. Please request a new one.")]
    OtpExpired,

    #[error("Too many failed attempts. Please request a new code.")]
    OtpAttemptsExceeded,

    #[error("Invalid code.")]
    OtpMismatch,
}

impl Rejection {
    /// Stable machine-readable identifier.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::TokenAlreadyUsed => "token_already_used",
            Self::LockedOut { .. } => "locked_out",
            Self::TransportNotConfigured => "transport_not_configured",
            Self::TransportSendFailed(_) => "transport_send_failed",
            Self::OtpNotPending => "otp_not_pending",
            Self::OtpExpired => "otp_expired",
            Self::OtpAttemptsExceeded => "otp_attempts_exceeded",
            Self::OtpMismatch => "otp_mismatch",
        }
    }
}

/// Boolean-plus-reason form of a check, as returned over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl From<Result<(), Rejection>> for Verdict {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self {
                valid: true,
                reason: None,
                code: None,
            },
            Err(rejection) => Self {
                valid: false,
                reason: Some(rejection.to_string()),
                code: Some(rejection.code()),
            },
        }
    }
}
