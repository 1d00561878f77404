use proctor_server::ServerConfig;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        port = config.port,
        media_root = %config.media_root.display(),
        "starting test relay"
    );

    let handle = match proctor_server::start(config).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "failed to start server");
            std::process::exit(1);
        }
    };

    tracing::info!(port = handle.port, "relay ready");

    // Wait for shutdown signal
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl+c");
    }

    tracing::info!(
        servers = handle.relay.server_count(),
        clients = handle.relay.client_count(),
        "shutting down"
    );
}
