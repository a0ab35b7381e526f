//! Startup configuration
//!
//! Command-line arguments shared by the binaries and the JSON cluster file
//! listing the address and directory of every role.

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::client::{ClientConfig, DATA_WINDOW};
use crate::coordinator::CoordinatorConfig;
use crate::error::{DistortError, Result};
use crate::protocol::{WireProfile, WorkerClass};
use crate::worker::WorkerConfig;
use crate::{DEFAULT_MAX_WORKERS, DEFAULT_QUEUE_CAPACITY, DEFAULT_STORE_CAPACITY};

/// Arguments every role binary accepts
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Cluster configuration file (JSON)
    #[arg(short, long, env = "DISTORT_CONFIG", value_name = "FILE")]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl CommonArgs {
    /// Default log filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "distort_core=debug,info"
        } else {
            "info"
        }
    }

    /// Install the fmt subscriber; `RUST_LOG` overrides the verbosity flag
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_filter()));
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

/// Process roles named in the cluster file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Coordinator client listener
    Coordinator,
    /// Coordinator listener for worker registration
    Registrar,
    TextWorker,
    MediaWorker,
    Client,
}

impl Role {
    /// Worker class for a worker role
    pub fn worker_class(self) -> Option<WorkerClass> {
        match self {
            Role::TextWorker => Some(WorkerClass::Text),
            Role::MediaWorker => Some(WorkerClass::Media),
            _ => None,
        }
    }
}

/// Address and working directory of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub role: Role,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl RoleEntry {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn require_directory(&self) -> Result<&Path> {
        self.directory.as_deref().ok_or_else(|| {
            DistortError::config(format!("role {:?} needs a directory", self.role))
        })
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_store_capacity() -> usize {
    DEFAULT_STORE_CAPACITY
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// Contents of the cluster configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub nodes: Vec<RoleEntry>,
    #[serde(default)]
    pub profile: WireProfile,
    /// Frame queue slots per job connection
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Job state table slots
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,
    /// Job state table file; defaults to one inside the worker directory
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Port for the coordinator's `/metrics` endpoint
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Bound on waiting for a worker's reply to a relayed request
    #[serde(default)]
    pub forward_timeout_secs: Option<u64>,
}

impl ClusterConfig {
    /// Read, parse and validate the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DistortError::config(format!("cannot read {:?}: {}", path, e)))?;
        let config = Self::from_json(&text)?;
        debug!("Loaded {} role entries from {:?}", config.nodes.len(), path);
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| DistortError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.nodes {
            if !seen.insert(entry.role) {
                return Err(DistortError::config(format!("role {:?} listed twice", entry.role)));
            }
            if entry.ip.is_empty() {
                return Err(DistortError::config(format!("role {:?} has no ip", entry.role)));
            }
        }
        for role in [Role::Coordinator, Role::Registrar] {
            if !seen.contains(&role) {
                return Err(DistortError::config(format!("role {:?} is missing", role)));
            }
        }

        if self.queue_capacity < DATA_WINDOW {
            return Err(DistortError::config(format!(
                "queue_capacity {} is below the upload window of {}",
                self.queue_capacity, DATA_WINDOW
            )));
        }
        if self.store_capacity == 0 {
            return Err(DistortError::config("store_capacity must be positive"));
        }
        if self.max_workers == 0 {
            return Err(DistortError::config("max_workers must be positive"));
        }
        Ok(())
    }

    pub fn entry(&self, role: Role) -> Result<&RoleEntry> {
        self.nodes
            .iter()
            .find(|e| e.role == role)
            .ok_or_else(|| DistortError::config(format!("no entry for role {:?}", role)))
    }

    pub fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            client_addr: self.entry(Role::Coordinator)?.addr(),
            registrar_addr: self.entry(Role::Registrar)?.addr(),
            profile: self.profile,
            max_workers: self.max_workers,
            forward_timeout: self.forward_timeout_secs.map(Duration::from_secs),
        })
    }

    pub fn worker_config(&self, role: Role) -> Result<WorkerConfig> {
        let class = role
            .worker_class()
            .ok_or_else(|| DistortError::config(format!("{:?} is not a worker role", role)))?;
        let entry = self.entry(role)?;
        let directory = entry.require_directory()?.to_path_buf();
        let store_path = self
            .store_path
            .clone()
            .unwrap_or_else(|| directory.join("distort-jobs.tbl"));

        Ok(WorkerConfig {
            class,
            listen_addr: entry.addr(),
            advertise_ip: entry.ip.clone(),
            registrar_addr: Some(self.entry(Role::Registrar)?.addr()),
            directory,
            profile: self.profile,
            queue_capacity: self.queue_capacity,
            store_path,
            store_capacity: self.store_capacity,
        })
    }

    pub fn client_config(&self, user_name: &str, factor: u32) -> Result<ClientConfig> {
        if factor == 0 {
            return Err(DistortError::config("factor must be at least 1"));
        }
        let entry = self.entry(Role::Client)?;
        Ok(ClientConfig {
            coordinator_addr: self.entry(Role::Coordinator)?.addr(),
            directory: entry.require_directory()?.to_path_buf(),
            profile: self.profile,
            user_name: user_name.to_string(),
            factor,
        })
    }
}
