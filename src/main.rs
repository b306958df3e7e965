use anyhow::anyhow;
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism::app::images::ImageService;
use prism::config::AppConfig;
use prism::infra::{
    db::Db, descriptors::PgDescriptorStore, queue::QueueClient, storage::ObjectStorage,
};
use prism::jobs::derivation::DerivationEngine;
use prism::jobs::image_consumer::{self, ConsumerSettings};
use prism::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    if config.run_migrations {
        db.migrate().await?;
        tracing::info!("migrations applied");
    }
    let descriptors = Arc::new(PgDescriptorStore::new(db));
    let storage = Arc::new(ObjectStorage::new(&config).await?);
    let queue = Arc::new(QueueClient::new(&config).await?);

    match config.app_mode.as_str() {
        "api" => {
            let images = ImageService::new(
                storage,
                descriptors,
                queue,
                config.upload_max_bytes,
            );
            let state = AppState {
                images,
                variant_widths: config.variant_widths.clone().into(),
                upload_max_bytes: config.upload_max_bytes,
            };

            let app: Router = http::router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
            tracing::info!("listening on {}", config.http_addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        "worker" => {
            tracing::info!(queue = %queue.queue_name(), "starting worker mode");
            let engine = DerivationEngine::new(storage, descriptors, config.variant_widths.clone());
            let settings = ConsumerSettings::new(config.worker_lanes, config.max_deliveries);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            });

            image_consumer::run(queue, engine, settings, shutdown_rx).await?;
        }
        other => return Err(anyhow!("unknown APP_MODE: {}", other)),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
