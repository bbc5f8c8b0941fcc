use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terra_session_server::api::{self, AppState};
use terra_session_server::auth::session::SessionRegistry;
use terra_session_server::auth::AuthService;
use terra_session_server::config::ServerConfig;
use terra_session_server::metrics::Metrics;
use terra_session_server::net::gate::ConnectionGate;
use terra_session_server::net::tls::TlsConfig;
use terra_session_server::net::transport::WebTransportServer;
use terra_session_server::terrain::HeightGrid;
use terra_session_server::world::World;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Terra Session Server v{}", env!("CARGO_PKG_VERSION"));

    // Missing admin secret is fatal
    let config = ServerConfig::load()?;
    info!(
        "Configuration loaded: {} (realtime :{}, http :{}), world seed {} size {}",
        config.bind_address,
        config.port,
        config.http_port,
        config.terrain.seed,
        config.terrain.world_size
    );

    let metrics = Arc::new(Metrics::new());

    let terrain = Arc::new(HeightGrid::generate(&config.terrain));
    info!(
        "Terrain generated: {} blocks, spawn at {:?}",
        terrain.total_blocks(),
        terrain.spawn_point()
    );

    let registry = Arc::new(RwLock::new(SessionRegistry::default()));
    let auth = Arc::new(AuthService::new(
        registry.clone(),
        &config.admin_password,
        config.auth_policy(),
        metrics.clone(),
    ));
    let gate = ConnectionGate::new(registry);
    let world = World::new(terrain, metrics.clone()).spawn();

    // HTTP API
    let http_addr = SocketAddr::new(config.bind_address, config.http_port);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let state = AppState {
        auth,
        world: world.clone(),
        metrics: metrics.clone(),
    };
    let http = tokio::spawn(async move {
        if let Err(e) = api::serve(listener, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Realtime channel
    let tls = TlsConfig::load(config.tls_cert_path.as_deref(), config.tls_key_path.as_deref()).await?;
    let server = WebTransportServer::new(config.clone(), tls, gate, world.clone(), metrics);

    info!(
        "Server ready on https://{}:{}",
        config.bind_address, config.port
    );
    info!("Certificate hash: {}", server.cert_hash());

    // Run server until Ctrl+C
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        }
    }

    // Cleanup
    match world.reset("Server shutting down").await {
        Ok(closed) => info!("Closed {} connections", closed),
        Err(e) => error!("Shutdown reset failed: {}", e),
    }
    http.abort();
    info!("Server stopped");

    Ok(())
}
