//! Client binary: distorts every eligible file of a directory

use clap::Parser;
use distort_core::client::run_batch;
use distort_core::config::{ClusterConfig, CommonArgs};
use distort_core::runtime::ShutdownSignal;
use distort_core::storage::{FindLister, Md5sumDigest};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "client", version, about = "Submits a directory of files for distortion")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Name the jobs are submitted under
    #[arg(short, long, default_value = "anonymous")]
    user: String,

    /// Distortion factor
    #[arg(short, long, default_value_t = 2)]
    factor: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match ClusterConfig::load(&cli.common.config)
        .and_then(|c| c.client_config(&cli.user, cli.factor))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    cli.common.init_tracing();

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, finishing current file");
            signal.shutdown();
        }
    });

    let report = match run_batch(
        &config,
        Arc::new(FindLister),
        Arc::new(Md5sumDigest),
        &shutdown,
    )
    .await
    {
        Ok(report) => report,
        Err(e) => {
            error!("Client failed: {}", e);
            return Err(e.into());
        }
    };

    if report.failed > 0 || report.invalid > 0 {
        std::process::exit(2);
    }
    Ok(())
}
