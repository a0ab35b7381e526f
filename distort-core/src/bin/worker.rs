//! Worker service binary

use clap::Parser;
use distort_core::config::{ClusterConfig, CommonArgs, Role};
use distort_core::runtime::ShutdownSignal;
use distort_core::storage::{Md5sumDigest, StrideDistorter};
use distort_core::worker::WorkerServer;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "worker", version, about = "Runs distortion jobs for one worker class")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Worker role to run
    #[arg(short, long, value_enum, default_value = "text-worker")]
    role: Role,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match ClusterConfig::load(&cli.common.config).and_then(|c| c.worker_config(cli.role)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    cli.common.init_tracing();

    info!("Starting {} worker in {:?}", config.class, config.directory);
    let server = WorkerServer::bind(
        config,
        Arc::new(Md5sumDigest),
        Arc::new(StrideDistorter),
    )
    .await?;

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal.shutdown();
        }
    });

    if let Err(e) = server.run(shutdown).await {
        error!("Worker failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
