use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use {
    anyhow::Context,
    axum::{Router, middleware, routing::get},
    portcullis_auth::spawn_sweeper,
    portcullis_config::PortcullisConfig,
    tower_http::trace::TraceLayer,
    tracing::{info, warn},
};

use crate::{auth_routes::auth_router, request_throttle::throttle_gate, state::GatewayState};

/// Build the gateway `Router`. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()`; the handlers key
/// lockout and request limits on the TCP peer address.
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/auth", auth_router().with_state(Arc::clone(&state)))
        .layer(middleware::from_fn_with_state(state, throttle_gate))
        .layer(TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start_gateway(config: PortcullisConfig) -> anyhow::Result<()> {
    let state = GatewayState::from_config(&config);

    match &config.mail {
        Some(mail) => {
            if let Err(e) = state.verifier.configure(mail) {
                warn!(error = %e, "mail transport misconfigured; email verification unavailable");
            }
        },
        None => info!("no mail transport configured; email verification unavailable"),
    }

    let sweepers = if state.sweep_interval.is_zero() {
        None
    } else {
        let credentials = spawn_sweeper(
            Arc::clone(&state.issuer),
            Arc::clone(&state.verifier),
            state.sweep_interval,
        );
        let factors = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(state.sweep_interval);
                loop {
                    interval.tick().await;
                    state.factors.sweep();
                }
            })
        };
        Some((credentials, factors))
    };

    let ip: IpAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        local_issuance_only = state.local_issuance_only,
        "gateway listening"
    );

    let app = build_gateway_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some((credentials, factors)) = sweepers {
        credentials.abort();
        factors.abort();
    }
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn health_handler() -> &'static str {
    "ok"
}
