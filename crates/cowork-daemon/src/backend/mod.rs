//! Backend contract.
//!
//! Two backends can sit behind the protocol: the host-native supervisor in
//! [`host`], which runs children directly on this machine, and a VM-backed
//! variant that tunnels the same operations to an in-guest daemon. The
//! dispatcher is generic over this trait, so either slots in unchanged.

pub mod host;

use std::collections::HashMap;

use async_trait::async_trait;
use cowork_core::bus::{EventCallback, Subscription};
use cowork_core::process::ProcessError;

use crate::protocol::messages::DownloadStatus;

pub use host::{HostBackend, HostBackendConfig};

/// Errors surfaced by backend operations.
///
/// The display string is reported to the client unmodified.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A supervisor operation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A file could not be read.
    #[error("reading {path}: {source}")]
    FileRead {
        /// Path the read targeted.
        path: String,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// A file's content is not valid UTF-8.
    #[error("file {0} is not valid UTF-8")]
    NonUtf8File(String),
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// A `spawn` request as seen by a backend.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    /// Session name.
    pub name: String,
    /// Client-assigned process identifier; auto-generated when empty.
    pub id: String,
    /// Command to execute.
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Environment overlay.
    pub env: HashMap<String, String>,
    /// Working directory.
    pub cwd: String,
    /// Additional mounts: mount name to real target path.
    pub mounts: HashMap<String, String>,
}

/// The capability set the protocol requires of a backend.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Record the resource budget for future sessions.
    async fn configure(&self, memory: i64, cpus: i64) -> BackendResult<()>;

    /// Create the named session backend.
    async fn create_vm(&self, name: &str) -> BackendResult<()>;

    /// Start the named session backend.
    async fn start_vm(&self, name: &str) -> BackendResult<()>;

    /// Stop the named session backend.
    async fn stop_vm(&self, name: &str) -> BackendResult<()>;

    /// Whether the named session backend is running.
    async fn is_running(&self, name: &str) -> BackendResult<bool>;

    /// Whether the in-session agent is reachable.
    async fn is_guest_connected(&self, name: &str) -> BackendResult<bool>;

    /// Spawn a process; returns its identifier.
    async fn spawn(&self, request: SpawnRequest) -> BackendResult<String>;

    /// Signal a process and its descendants.
    async fn kill(&self, process_id: &str, signal: &str) -> BackendResult<()>;

    /// Write to a process's stdin.
    async fn write_stdin(&self, process_id: &str, data: &[u8]) -> BackendResult<()>;

    /// Whether a spawned process is still running.
    async fn is_process_running(&self, process_id: &str) -> BackendResult<bool>;

    /// Expose a host path inside the named session.
    async fn mount_path(&self, name: &str, host_path: &str, guest_path: &str) -> BackendResult<()>;

    /// Read a file from the named session; returns its UTF-8 contents.
    async fn read_file(&self, name: &str, path: &str) -> BackendResult<String>;

    /// Install the agent SDK into the named session.
    async fn install_sdk(&self, name: &str) -> BackendResult<()>;

    /// Provision an approved OAuth token for the named session.
    async fn add_approved_oauth_token(&self, name: &str, token: &str) -> BackendResult<()>;

    /// Toggle verbose logging.
    fn set_debug_logging(&self, enabled: bool);

    /// Register an event callback; the returned handle cancels it.
    fn subscribe_events(&self, name: &str, callback: EventCallback) -> BackendResult<Subscription>;

    /// Download state of the VM image bundle.
    fn download_status(&self) -> DownloadStatus;

    /// Signal every tracked process, used during service shutdown.
    async fn kill_all(&self);
}
