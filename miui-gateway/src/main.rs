use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use miui_gateway::{
    api::chat::ChatState,
    core::{
        chat::ChatService,
        config::Settings,
        store::{ConversationCache, Database, spawn_maintenance},
    },
    create_app,
};
use miui_search_sdk::{ClientConfig, SearchClient};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new()?;

    info!(
        "Starting MIUI gateway on {}:{}",
        settings.server.host, settings.server.port
    );

    let db = Arc::new(Database::open(
        &settings.database.path,
        settings.database.read_connections,
        settings.store.write_queue_capacity,
    )?);
    let store_config = settings.store.store_config();
    let cache = Arc::new(ConversationCache::new(db.clone(), store_config));

    let client = SearchClient::new(ClientConfig::with_endpoint(settings.upstream.endpoint.clone()))?;
    info!("Upstream endpoint: {}", client.endpoint());
    let service = Arc::new(ChatService::new(cache.clone(), Arc::new(client)));

    let (stop_tx, stop_rx) = watch::channel(false);
    let maintenance = spawn_maintenance(cache.clone(), store_config.cleanup_period, stop_rx);

    let app = create_app(ChatState::new(service));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    stop_tx.send(true).ok();
    maintenance.await.ok();
    cache.flush_all().await;
    db.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
