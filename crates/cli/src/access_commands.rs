use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    serde::Deserialize,
};

#[derive(Subcommand)]
pub enum AccessAction {
    /// Generate a single-use access token and print it.
    Generate {
        /// Gateway base URL (defaults to the configured loopback address).
        #[arg(long)]
        url: Option<String>,
    },
    /// Revoke every live access token.
    Revoke {
        #[arg(long)]
        url: Option<String>,
    },
    /// Show how many tokens are live and whether email verification is available.
    Status {
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedToken {
    token: String,
    expires_in_seconds: u64,
}

#[derive(Deserialize)]
struct Revoked {
    revoked: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessStatus {
    active_tokens: usize,
    mail_configured: bool,
}

pub async fn handle_access(action: AccessAction, default_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    match action {
        AccessAction::Generate { url } => {
            let base = url.as_deref().unwrap_or(default_url);
            let issued: GeneratedToken = send(client.post(endpoint(base, "generate-access"))).await?;
            // The token goes to stdout alone so it can be piped.
            println!("{}", issued.token);
            eprintln!(
                "Valid for {} seconds, single use.",
                issued.expires_in_seconds
            );
        },
        AccessAction::Revoke { url } => {
            let base = url.as_deref().unwrap_or(default_url);
            let result: Revoked = send(client.post(endpoint(base, "revoke-access"))).await?;
            println!("Revoked {} token(s).", result.revoked);
        },
        AccessAction::Status { url } => {
            let base = url.as_deref().unwrap_or(default_url);
            let status: AccessStatus = send(client.get(endpoint(base, "access-status"))).await?;
            println!("Active tokens:      {}", status.active_tokens);
            println!(
                "Email verification: {}",
                if status.mail_configured {
                    "available"
                } else {
                    "not configured"
                }
            );
        },
    }
    Ok(())
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/api/auth/{path}", base.trim_end_matches('/'))
}

async fn send<T: serde::de::DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let resp = request
        .send()
        .await
        .context("could not reach the gateway; is it running?")?;
    let status = resp.status();
    if !status.is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("request failed");
        bail!("gateway returned {status}: {message}");
    }
    Ok(resp.json().await?)
}
