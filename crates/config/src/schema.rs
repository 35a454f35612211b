use std::time::Duration;

use {
    secrecy::Secret,
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PortcullisConfig {
    pub server: ServerConfig,
    pub access: AccessConfig,
    pub otp: OtpConfig,
    pub throttle: ThrottleConfig,
    /// SMTP transport for email verification codes. Email OTP is unavailable
    /// until this is set, either here or at runtime through the gateway.
    pub mail: Option<MailConfig>,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Only loopback peers may generate or revoke access tokens and manage the
    /// mail transport. Defaults to true.
    pub local_issuance_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18790,
            local_issuance_only: true,
        }
    }
}

/// Access token policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Lifetime of a freshly generated token.
    pub token_ttl_secs: u64,
    /// Maximum number of unconsumed tokens; the oldest is evicted beyond this.
    pub max_active_tokens: usize,
    /// Consecutive failed validations from one IP before it is locked out.
    pub max_failed_attempts: u32,
    /// How long a locked-out IP stays locked.
    pub lockout_duration_secs: u64,
    /// Interval of the background sweep that reclaims expired entries.
    /// `0` disables the sweeper; expiry is still enforced on every check.
    pub sweep_interval_secs: u64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            max_active_tokens: 5,
            max_failed_attempts: 10,
            lockout_duration_secs: 900,
            sweep_interval_secs: 60,
        }
    }
}

impl AccessConfig {
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }
}

/// Email one-time passcode policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    /// How long a sent code stays valid.
    pub expiry_secs: u64,
    /// Extra time before a scheduled cleanup removes an expired code.
    pub cleanup_grace_secs: u64,
    /// Verification attempts allowed per issued code.
    pub max_attempts: u32,
    /// Failed code verifications from one IP before it is locked out.
    pub max_failed_attempts: u32,
    pub lockout_duration_secs: u64,
    /// Recipients allowed to receive codes. Empty allows any address.
    pub allowed_emails: Vec<String>,
    /// How long factor progress for a verification session is remembered.
    pub session_ttl_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 300,
            cleanup_grace_secs: 60,
            max_attempts: 5,
            max_failed_attempts: 10,
            lockout_duration_secs: 900,
            allowed_emails: Vec::new(),
            session_ttl_secs: 900,
        }
    }
}

impl OtpConfig {
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    #[must_use]
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration_secs)
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Whether `email` may receive a verification code.
    #[must_use]
    pub fn allows_recipient(&self, email: &str) -> bool {
        self.allowed_emails.is_empty()
            || self
                .allowed_emails
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(email.trim()))
    }
}

/// Per-peer request limits for the `/api/auth` routes, counted in fixed
/// windows. `0` refuses every request in that scope.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub window_secs: u64,
    /// Verification code requests; each one may send a mail.
    pub otp_requests: usize,
    pub otp_verifications: usize,
    /// Every other auth route.
    pub auth_requests: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            otp_requests: 5,
            otp_verifications: 30,
            auth_requests: 120,
        }
    }
}

impl ThrottleConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// SMTP transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Implicit TLS from the first byte (usually port 465). When false the
    /// transport upgrades with STARTTLS if the server offers it.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<Secret<String>>,
    /// Sender address, e.g. `"Portcullis <noreply@example.com>"`.
    pub from: String,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    10
}

impl MailConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
