mod access_commands;
mod config_commands;
mod mail_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    portcullis_config::PortcullisConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "portcullis", about = "Portcullis — ephemeral access credentials")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "PORTCULLIS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Access token management against a running gateway.
    Access {
        #[command(subcommand)]
        action: access_commands::AccessAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Mail transport diagnostics.
    Mail {
        #[command(subcommand)]
        action: mail_commands::MailAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the explicit config file if one was given, otherwise discover one.
/// Returns the config and the file it came from.
fn load_config(cli: &Cli) -> anyhow::Result<(PortcullisConfig, Option<PathBuf>)> {
    let (mut config, source) = match &cli.config {
        Some(path) => {
            let mut config = portcullis_config::load_config(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            portcullis_config::apply_env_overrides(&mut config)?;
            (config, Some(path.clone()))
        },
        None => (
            portcullis_config::discover_and_load(),
            portcullis_config::find_config_file(),
        ),
    };

    // CLI args override config values
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok((config, source))
}

/// Loopback URL of the locally configured gateway.
fn local_gateway_url(config: &PortcullisConfig) -> String {
    let host = match config.server.bind.as_str() {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "[::1]",
        other if other.contains(':') => return format!("http://[{other}]:{}", config.server.port),
        other => other,
    };
    format!("http://{host}:{}", config.server.port)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let (config, source) = load_config(&cli)?;

    match cli.command {
        // Default: start gateway when no subcommand is provided
        None | Some(Commands::Gateway) => {
            info!(version = env!("CARGO_PKG_VERSION"), "portcullis starting");
            portcullis_gateway::start_gateway(config).await
        },
        Some(Commands::Access { action }) => {
            access_commands::handle_access(action, &local_gateway_url(&config)).await
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, &config, source.as_deref())
        },
        Some(Commands::Mail { action }) => mail_commands::handle_mail(action, &config).await,
    }
}
