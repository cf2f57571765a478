//! Host-native backend.
//!
//! Executes processes directly on this machine instead of inside a VM. The
//! session "VM" lifecycle collapses to bookkeeping plus the corresponding
//! events; processes run under the supervisor with per-session path
//! remapping between the client's `/sessions/<name>` namespace and the real
//! session directory.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cowork_core::bus::{EventBus, EventCallback, Subscription};
use cowork_core::event::Event;
use cowork_core::process::SpawnSpec;
use cowork_core::process::tracker::{EventSink, ProcessTracker};
use cowork_core::remap::{PathRemap, RemapSet};
use tracing::{debug, info};

use super::{Backend, BackendError, BackendResult, SpawnRequest};
use crate::protocol::messages::DownloadStatus;

/// Hostname probed for API reachability.
const API_PROBE_HOST: &str = "api.anthropic.com";

/// Port probed for API reachability.
const API_PROBE_PORT: u16 = 443;

/// How long the reachability probe waits for a TCP connect.
const API_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the host backend.
#[derive(Debug, Clone)]
pub struct HostBackendConfig {
    /// Root of the client-managed data directory; session directories live
    /// under `<data_dir>/sessions/<name>`.
    pub data_dir: PathBuf,

    /// Where the desktop client stores downloaded VM bundles.
    pub bundles_dir: PathBuf,
}

impl Default for HostBackendConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            data_dir: home.join(".local/share/claude-cowork"),
            bundles_dir: home.join(".config/Claude/vm_bundles"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResourceBudget {
    memory: i64,
    cpus: i64,
}

/// Backend that runs processes directly on the host.
pub struct HostBackend {
    config: HostBackendConfig,
    tracker: ProcessTracker,
    bus: Arc<EventBus>,
    /// Sessions that have been "started"; the host has no VM to boot, so
    /// this is the entire lifecycle state.
    started: Mutex<HashSet<String>>,
    budget: Mutex<ResourceBudget>,
    /// Last value received via `setDebugLogging`. Verbosity itself is
    /// governed by the tracing filter.
    #[allow(dead_code)]
    debug: AtomicBool,
}

impl HostBackend {
    /// Create a host backend with the given configuration.
    #[must_use]
    pub fn new(config: HostBackendConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let sink: EventSink = {
            let bus = Arc::clone(&bus);
            Arc::new(move |event| bus.emit(&event))
        };

        Self {
            config,
            tracker: ProcessTracker::new(sink),
            bus,
            started: Mutex::new(HashSet::new()),
            budget: Mutex::new(ResourceBudget {
                memory: 4096,
                cpus: 2,
            }),
            debug: AtomicBool::new(false),
        }
    }

    /// The event bus this backend emits on.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The process supervisor backing this host.
    #[must_use]
    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    fn session_root(&self, name: &str) -> PathBuf {
        self.config.data_dir.join("sessions").join(name)
    }

    /// Resolve the remap state for a spawn request.
    fn remap_for(&self, request: &SpawnRequest) -> RemapSet {
        if request.name.is_empty() {
            return RemapSet::disabled();
        }

        let vm_prefix = format!("/sessions/{}", request.name);
        let real_prefix = self.session_root(&request.name).display().to_string();

        // Path-globbing tools do not follow the mnt/ directory symlinks,
        // so stdin references must reach the child as the real targets.
        let mounts = request
            .mounts
            .iter()
            .map(|(mount_name, target)| {
                PathRemap::new(format!("{real_prefix}/mnt/{mount_name}"), target.as_str())
            })
            .collect();

        RemapSet::new(&vm_prefix, &real_prefix, mounts)
    }
}

/// Probe the API endpoint once and report the outcome as an event.
async fn probe_api_reachability(bus: Arc<EventBus>) {
    let connect = tokio::net::TcpStream::connect((API_PROBE_HOST, API_PROBE_PORT));
    let reachable = match tokio::time::timeout(API_PROBE_TIMEOUT, connect).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            debug!("API probe failed: {e}");
            false
        },
        Err(_elapsed) => {
            debug!("API probe timed out");
            false
        },
    };
    bus.emit(&Event::api_reachability(reachable));
}

#[async_trait]
impl Backend for HostBackend {
    async fn configure(&self, memory: i64, cpus: i64) -> BackendResult<()> {
        let mut budget = self.budget.lock().unwrap();
        if memory > 0 {
            budget.memory = memory;
        }
        if cpus > 0 {
            budget.cpus = cpus;
        }
        debug!(memory = budget.memory, cpus = budget.cpus, "configured");
        Ok(())
    }

    async fn create_vm(&self, name: &str) -> BackendResult<()> {
        // Session directories are created and owned by the desktop client.
        info!(name, "session created (host backend)");
        Ok(())
    }

    async fn start_vm(&self, name: &str) -> BackendResult<()> {
        self.started.lock().unwrap().insert(name.to_owned());
        tokio::spawn(probe_api_reachability(Arc::clone(&self.bus)));
        self.bus.emit(&Event::vm_started(name));
        info!(name, "session started (host backend)");
        Ok(())
    }

    async fn stop_vm(&self, name: &str) -> BackendResult<()> {
        self.tracker.kill_all();
        self.started.lock().unwrap().remove(name);
        self.bus.emit(&Event::vm_stopped(name));
        info!(name, "session stopped (host backend)");
        Ok(())
    }

    async fn is_running(&self, name: &str) -> BackendResult<bool> {
        Ok(self.started.lock().unwrap().contains(name))
    }

    async fn is_guest_connected(&self, name: &str) -> BackendResult<bool> {
        // The host is its own guest.
        self.is_running(name).await
    }

    async fn spawn(&self, request: SpawnRequest) -> BackendResult<String> {
        let remap = self.remap_for(&request);
        let spec = SpawnSpec::builder()
            .id(request.id)
            .command(request.command)
            .args(request.args)
            .env_map(request.env)
            .cwd(request.cwd)
            .remap(remap)
            .build();

        Ok(self.tracker.spawn(spec).await?)
    }

    async fn kill(&self, process_id: &str, signal: &str) -> BackendResult<()> {
        Ok(self.tracker.kill(process_id, signal)?)
    }

    async fn write_stdin(&self, process_id: &str, data: &[u8]) -> BackendResult<()> {
        Ok(self.tracker.write_stdin(process_id, data).await?)
    }

    async fn is_process_running(&self, process_id: &str) -> BackendResult<bool> {
        Ok(self.tracker.is_running(process_id))
    }

    async fn mount_path(&self, name: &str, host_path: &str, guest_path: &str) -> BackendResult<()> {
        // Mounts are realized by the client as symlinks inside the session
        // directory; spawn-time mount remaps make them visible to children.
        debug!(name, host_path, guest_path, "mountPath acknowledged (host backend)");
        Ok(())
    }

    async fn read_file(&self, name: &str, path: &str) -> BackendResult<String> {
        let vm_prefix = format!("/sessions/{name}");
        let real_path = if !name.is_empty() && path.starts_with(&vm_prefix) {
            format!(
                "{}{}",
                self.session_root(name).display(),
                &path[vm_prefix.len()..]
            )
        } else {
            path.to_owned()
        };

        let bytes = tokio::fs::read(&real_path)
            .await
            .map_err(|source| BackendError::FileRead {
                path: real_path.clone(),
                source,
            })?;
        String::from_utf8(bytes).map_err(|_| BackendError::NonUtf8File(real_path))
    }

    async fn install_sdk(&self, name: &str) -> BackendResult<()> {
        // The host uses the operator's existing CLI installation.
        debug!(name, "installSdk acknowledged (host backend)");
        Ok(())
    }

    async fn add_approved_oauth_token(&self, name: &str, token: &str) -> BackendResult<()> {
        // Credentials on the host come from the operator's own login.
        let _ = token;
        debug!(name, "addApprovedOauthToken acknowledged (host backend)");
        Ok(())
    }

    fn set_debug_logging(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        info!(enabled, "debug logging toggled");
    }

    fn subscribe_events(&self, name: &str, callback: EventCallback) -> BackendResult<Subscription> {
        debug!(name, "event subscription registered");
        Ok(self.bus.subscribe(callback))
    }

    fn download_status(&self) -> DownloadStatus {
        if bundle_present(&self.config.bundles_dir) {
            DownloadStatus::Ready
        } else {
            DownloadStatus::NotDownloaded
        }
    }

    async fn kill_all(&self) {
        self.tracker.kill_all();
    }
}

/// Whether the desktop client's bundle directory holds a usable bundle,
/// either raw (`rootfs.vhdx`) or already converted (`rootfs.qcow2`).
fn bundle_present(bundles_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(bundles_dir) else {
        return false;
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if dir.join("rootfs.vhdx").exists() || dir.join("rootfs.qcow2").exists() {
            return true;
        }
    }
    false
}
