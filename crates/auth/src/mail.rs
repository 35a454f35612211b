//! Outbound mail for verification codes.

use {
    async_trait::async_trait,
    lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        message::{Mailbox, header::ContentType},
        transport::smtp::{
            authentication::Credentials,
            client::{Tls, TlsParameters},
        },
    },
    portcullis_config::MailConfig,
    secrecy::ExposeSecret,
    tracing::debug,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("mail transport is not configured")]
    NotConfigured,

    #[error("invalid mail address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("smtp server at {0} rejected the connection check")]
    Unreachable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// The message carrying a one-time verification code.
    #[must_use]
    pub fn verification_code(to: &str, code: &str, valid_for_minutes: u64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your verification code".into(),
            body: format!(
                "Your dashboard verification code is {code}\n\n\
                 It expires in {valid_for_minutes} minutes and can be used once.\n\
                 If you did not request it, you can ignore this message.\n"
            ),
        }
    }
}

/// Delivery backend used by the email OTP verifier.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;

    /// Check the server is reachable and accepts our credentials without
    /// sending anything.
    async fn test_connection(&self) -> Result<()>;
}

pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl SmtpMailTransport {
    pub fn from_config(config: &MailConfig) -> Result<Self> {
        let from = parse_mailbox(&config.from)?;

        let mut builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            let tls = TlsParameters::new(config.host.clone())?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .tls(Tls::Opportunistic(tls))
        };
        builder = builder
            .port(config.port)
            .timeout(Some(config.timeout()));
        if let Some(user) = &config.user {
            let pass = config
                .pass
                .as_ref()
                .map(|p| p.expose_secret().clone())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(user.clone(), pass));
        }

        debug!(
            host = %config.host,
            port = config.port,
            secure = config.secure,
            "smtp transport configured"
        );
        Ok(Self {
            mailer: builder.build(),
            from,
            host: config.host.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&mail.to)?)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body.clone())?;
        self.mailer.send(message).await?;
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        if self.mailer.test_connection().await? {
            Ok(())
        } else {
            Err(Error::Unreachable(self.host.clone()))
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address.parse().map_err(|source| Error::Address {
        address: address.to_string(),
        source,
    })
}

/// Mask the local part of an address for logs: `alice@example.com` → `a***@example.com`.
#[must_use]
pub fn mask_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        },
        None => "***".into(),
    }
}
