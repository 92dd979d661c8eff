//! # Subscription Registry HTTP Server
//!
//! Serves the mailing-list subscription registry over HTTP: subscribe,
//! unsubscribe and a reconciled subscriber listing. Subscriber membership
//! lives on a pub/sub topic reached through its JSON API; per-subscriber
//! metadata lives in a PostgreSQL table.
//!
//! With `--in-memory` both stores are replaced by in-process doubles, which
//! is handy for local front-end work and smoke tests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lib_common::connections::db_postgres::{Database, mask_url_password};
use lib_common::registry::{
    HttpTopicGateway, MemoryRecordStore, MemoryTopic, PgRecordStore, RecordStore,
    RegistryService, TopicGateway,
};
use tokio::signal;
use tracing::{info, warn};

mod subs_logic;
use subs_logic::{config::Config, logger, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal in production.
    let _ = dotenvy::dotenv();

    let config = Config::parse();
    let _log_guard = logger::setup_logging(config.log_dir.as_deref(), &config.log_level)?;

    let (topic, records) = build_backends(&config).await?;
    let service = RegistryService::new(topic, records, config.registry_config());
    let state = AppState::new(service, &config.cors_origin)?;
    let app = routes::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        topic = %config.topic_id,
        table = %config.table_name,
        max_subs = config.max_subs,
        cors_origin = %config.cors_origin,
        "Starting HTTP server on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete.");
    Ok(())
}

async fn build_backends(
    config: &Config,
) -> Result<(Arc<dyn TopicGateway>, Arc<dyn RecordStore>)> {
    if config.in_memory {
        warn!("running with in-memory stores; nothing survives a restart");
        return Ok((Arc::new(MemoryTopic::new()), Arc::new(MemoryRecordStore::new())));
    }

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required unless --in-memory is set")?;
    let api_url = config
        .topic_api_url
        .as_deref()
        .context("TOPIC_API_URL is required unless --in-memory is set")?;

    let db = Database::new(database_url, config.db_pool_size)?;
    db.ping()
        .await
        .with_context(|| format!("connecting to {}", mask_url_password(database_url)))?;
    info!(
        url = %mask_url_password(database_url),
        pool_size = config.db_pool_size,
        "Database connection pool ready."
    );

    let records = PgRecordStore::new(db, &config.table_name)?;
    records.ensure_schema().await?;

    let topic = HttpTopicGateway::new(
        api_url,
        config.topic_api_token.clone(),
        config.topic_api_timeout(),
        config.topic_id.clone(),
    )?;
    info!(api = %api_url, topic = %topic.topic_id(), "Topic gateway configured.");

    Ok((Arc::new(topic), Arc::new(records)))
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => info!("SIGTERM received, initiating shutdown."),
    }
}
