use glsp_bridge::client::{GlspClient, MultiplexClient, SocketGlspClient};
use glsp_bridge::collab::SoloProvider;
use glsp_bridge::config::Config;
use glsp_bridge::connector::{Connector, ConnectorOptions, HeadlessHost};
use glsp_bridge::models::InitializeParameters;
use glsp_bridge::ws;

use std::panic;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration first so its log level can seed the filter
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()))
        .init();

    info!("Starting bridge...");

    if let Err(e) = loaded {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }
    if config.is_development() {
        info!("Running with {:?}", config);
    }

    // Connect to the GLSP server
    let backend = Arc::new(SocketGlspClient::new(config.glsp_server_address()));
    if let Err(e) = backend.start().await {
        error!("Could not reach GLSP server at {}: {}", config.glsp_server_address(), e);
        return;
    }
    let client = MultiplexClient::new(backend, Arc::new(SoloProvider), config.workspace_root.clone());
    match client
        .initialize_server(InitializeParameters::new(&config.application_id, &config.protocol_version))
        .await
    {
        Ok(result) => info!("GLSP server speaks protocol {}", result.protocol_version),
        Err(e) => {
            error!("Failed to initialize GLSP server: {}", e);
            return;
        }
    }

    let connector = Connector::new(
        client.clone(),
        Arc::new(HeadlessHost::new(config.export_dir.clone())),
        ConnectorOptions {
            message_logging: config.message_logging,
            interceptor: None,
        },
    );

    let app_routes = ws::router(connector.clone()).layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };
    info!("Webviews connect at ws://{}/webview", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
    {
        error!("Server error: {}", e);
    }

    connector.dispose();
    client.shutdown_server();
    // Let the writer flush the shutdown notification
    tokio::task::yield_now().await;
    if let Err(e) = client.stop().await {
        warn!("Failed to stop GLSP client: {}", e);
    }
    client.dispose();
}
