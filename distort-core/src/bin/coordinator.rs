//! Coordinator service binary

use axum::{routing::get, Router};
use clap::Parser;
use distort_core::config::{ClusterConfig, CommonArgs};
use distort_core::coordinator::Coordinator;
use distort_core::runtime::ShutdownSignal;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "coordinator", version, about = "Routes distortion requests to registered workers")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cluster = match ClusterConfig::load(&cli.common.config) {
        Ok(cluster) => cluster,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    cli.common.init_tracing();

    info!("Starting distort coordinator");
    let coordinator = Coordinator::bind(cluster.coordinator_config()?).await?;

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal.shutdown();
        }
    });

    if let Some(port) = cluster.metrics_port {
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let app = Router::new()
                .route("/metrics", get(|| async { distort_core::metrics::gather_system_metrics() }))
                .layer(CorsLayer::permissive());

            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!("Metrics API could not bind {}: {}", addr, e);
                    return;
                }
            };
            info!("Metrics API listening on {}", addr);

            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.recv().await })
                .await;
            if let Err(e) = served {
                warn!("Metrics server error: {}", e);
            }
        });
    }

    if let Err(e) = coordinator.run(shutdown).await {
        error!("Coordinator failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
