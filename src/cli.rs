//! Command line and environment configuration for the `chunk-vault` binary

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::storage::ConflictPolicy;
use crate::telemetry::{LogConfig, LogFormat};
use crate::ChunkVaultConfig;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The subcommand to run; no subcommand means `serve`
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the upload/download front-end
    Serve(ServeArgs),

    /// Host a single storage node over HTTP
    Node(NodeArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictMode {
    /// Reject a second upload of a file that is still being written
    FailFast,
    /// Wait for the running upload, up to the queue timeout
    Queue,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Default log filter, RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (json|text)
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Append logs to this file instead of stdout
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl LogArgs {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            file: self.log_file.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Service name used in logs and metrics
    #[arg(long, env = "APP_SERVICE_NAME", default_value = "chunk-vault")]
    pub service_name: String,

    /// In-process nodes to start with when no node addresses are given
    #[arg(long, env = "APP_NUM_STORAGE_SERVERS", default_value_t = 6)]
    pub num_storage_servers: usize,

    /// Initial storage node addresses, comma separated
    #[arg(long, env = "APP_STORAGE_NODES", value_delimiter = ',')]
    pub storage_nodes: Vec<String>,

    /// API listen address
    #[arg(long, env = "APP_LISTEN_ADDR", default_value = ":8080")]
    pub listen_addr: String,

    /// Metrics listen address
    #[arg(long, env = "APP_PROM_SERVE_ADDR", default_value = ":8081")]
    pub metrics_addr: String,

    /// What a concurrent upload of the same file does
    #[arg(long, env = "APP_UPLOAD_CONFLICT", value_enum, default_value_t = ConflictMode::FailFast)]
    pub upload_conflict: ConflictMode,

    /// How long a queued upload waits for the running one
    #[arg(long, env = "APP_UPLOAD_QUEUE_TIMEOUT_MS", default_value_t = 5000)]
    pub upload_queue_timeout_ms: u64,

    /// Timeout of a single part operation against a node
    #[arg(long, env = "APP_NODE_TIMEOUT_MS", default_value_t = 10_000)]
    pub node_timeout_ms: u64,

    /// Part operations in flight at once
    #[arg(long, env = "APP_PART_IO_CONCURRENCY", default_value_t = 16)]
    pub part_io_concurrency: usize,

    /// Parts per node for each upload
    #[arg(long, env = "APP_STRIPES_PER_NODE", default_value_t = 1)]
    pub stripes_per_node: usize,

    /// Largest accepted upload in bytes
    #[arg(long, env = "APP_MAX_UPLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[command(flatten)]
    pub log: LogArgs,
}

impl ServeArgs {
    pub fn vault_config(&self) -> ChunkVaultConfig {
        let conflict_policy = match self.upload_conflict {
            ConflictMode::FailFast => ConflictPolicy::FailFast,
            ConflictMode::Queue => ConflictPolicy::Queue {
                timeout: Duration::from_millis(self.upload_queue_timeout_ms),
            },
        };

        ChunkVaultConfig {
            service_name: self.service_name.clone(),
            conflict_policy,
            node_timeout: Duration::from_millis(self.node_timeout_ms),
            io_concurrency: self.part_io_concurrency,
            stripes_per_node: self.stripes_per_node,
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    /// Nodes registered at startup, in index order
    pub fn node_addresses(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .storage_nodes
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if !configured.is_empty() {
            return configured;
        }

        (1..=self.num_storage_servers)
            .map(|i| format!("memory://storage{}", i))
            .collect()
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// Listen address of the node
    #[arg(long, env = "APP_NODE_LISTEN_ADDR", default_value = ":9000")]
    pub listen: String,

    /// Keep parts on disk here; parts stay in memory when unset
    #[arg(long, env = "APP_NODE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Disk budget for stored parts in bytes
    #[arg(long, env = "APP_NODE_MAX_BYTES")]
    pub max_bytes: Option<u64>,

    /// Largest accepted part request body in bytes
    #[arg(long, env = "APP_NODE_MAX_REQUEST_BYTES", default_value_t = 256 * 1024 * 1024)]
    pub max_request_bytes: usize,

    #[command(flatten)]
    pub log: LogArgs,
}

/// `:8080` listens on every interface, anything else is used as given
pub fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
