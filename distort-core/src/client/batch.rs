//! Directory batch submission
//!
//! Lists the input directory and sends every file with a known extension
//! through the coordinator to a worker of its class.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::job::JobClient;
use super::{CoordinatorClient, DistortReply};
use crate::error::Result;
use crate::protocol::{WireProfile, WorkerClass};
use crate::runtime::{run_blocking, ShutdownSignal};
use crate::storage::{all_extensions, Digest, DirectoryLister};

/// Subdirectory of the input directory receiving distorted files
pub const OUTPUT_DIR: &str = "distorted";

/// Configuration for a client run
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub coordinator_addr: String,
    /// Directory whose files are submitted
    pub directory: PathBuf,
    /// Wire profile of the coordinator connection
    pub profile: WireProfile,
    pub user_name: String,
    pub factor: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:9000".into(),
            directory: PathBuf::from("."),
            profile: WireProfile::default(),
            user_name: "anonymous".into(),
            factor: 2,
        }
    }
}

/// Per-run tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    /// Output arrived but failed validation
    pub invalid: usize,
    /// No worker of the file's class was available
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.completed + self.invalid + self.skipped + self.failed
    }
}

/// Submit every eligible file in `config.directory`
pub async fn run_batch(
    config: &ClientConfig,
    lister: Arc<dyn DirectoryLister>,
    digest: Arc<dyn Digest>,
    shutdown: &ShutdownSignal,
) -> Result<BatchReport> {
    let directory = config.directory.clone();
    let files = run_blocking(move || lister.list(&directory, &all_extensions())).await?;
    info!("{} file(s) to distort in {:?}", files.len(), config.directory);

    let output_dir = config.directory.join(OUTPUT_DIR);
    tokio::fs::create_dir_all(&output_dir).await?;

    let mut coordinator = CoordinatorClient::connect(&config.coordinator_addr, config.profile).await?;
    let mut report = BatchReport::default();

    for file_name in files {
        if shutdown.is_triggered() {
            warn!("Stopping batch early, {} file(s) done", report.attempted());
            break;
        }
        let Some(class) = WorkerClass::from_file_name(&file_name) else {
            continue;
        };

        let endpoint = match coordinator.distort(class, &file_name).await? {
            DistortReply::Worker(endpoint) => endpoint,
            DistortReply::NoWorkerAvailable | DistortReply::InvalidMediaType => {
                warn!("No {} worker for {}, skipping", class, file_name);
                report.skipped += 1;
                continue;
            }
        };

        let input = config.directory.join(&file_name);
        let output = output_dir.join(&file_name);
        let submitted = async {
            let mut job = JobClient::connect(&endpoint, digest.clone()).await?;
            let outcome = job.submit(&config.user_name, &input, config.factor, &output).await?;
            job.disconnect().await?;
            Ok::<_, crate::DistortError>(outcome)
        }
        .await;

        match submitted {
            Ok(outcome) if outcome.valid => report.completed += 1,
            Ok(_) => report.invalid += 1,
            Err(e) => {
                error!("Job for {} on {} failed: {}", file_name, endpoint.socket_addr(), e);
                report.failed += 1;
            }
        }
    }

    coordinator.disconnect().await?;
    info!(
        "Batch finished: {} completed, {} invalid, {} skipped, {} failed",
        report.completed, report.invalid, report.skipped, report.failed
    );
    Ok(report)
}
