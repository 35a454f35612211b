use {
    anyhow::{Context, Result},
    clap::Subcommand,
    portcullis_auth::{MailTransport, OutgoingMail, SmtpMailTransport},
    portcullis_config::PortcullisConfig,
};

#[derive(Subcommand)]
pub enum MailAction {
    /// Check the configured SMTP server is reachable and accepts the credentials.
    Test {
        /// Also send a test message to this address.
        #[arg(long)]
        to: Option<String>,
    },
}

pub async fn handle_mail(action: MailAction, config: &PortcullisConfig) -> Result<()> {
    match action {
        MailAction::Test { to } => test(config, to.as_deref()).await,
    }
}

async fn test(config: &PortcullisConfig, to: Option<&str>) -> Result<()> {
    let mail = config
        .mail
        .as_ref()
        .context("no mail section configured (set [mail] or PORTCULLIS_SMTP_HOST/FROM)")?;
    let transport = SmtpMailTransport::from_config(mail)?;

    eprintln!("Connecting to {}:{} ...", mail.host, mail.port);
    transport.test_connection().await?;
    eprintln!("Connection OK.");

    if let Some(to) = to {
        transport
            .send(&OutgoingMail {
                to: to.to_string(),
                subject: "Portcullis test message".into(),
                body: "Mail delivery for verification codes is working.\n".into(),
            })
            .await?;
        eprintln!("Test message sent to {to}.");
    }
    Ok(())
}
