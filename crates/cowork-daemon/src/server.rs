//! Unix socket server.
//!
//! Accepts client connections on a local stream socket and runs one
//! dispatch loop per connection. The socket file is owner-only; stale
//! files from a previous run are removed before binding and the live one
//! is unlinked on stop.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::dispatch::Dispatcher;
use crate::protocol::{FrameCodec, ProtocolResult};

/// Socket filename used under the runtime directory.
const SOCKET_FILE_NAME: &str = "cowork-vm-service.sock";

/// Default socket path.
///
/// Prefers the user's per-session runtime directory (`XDG_RUNTIME_DIR`),
/// falling back to the shared temporary directory.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(SOCKET_FILE_NAME),
        _ => env::temp_dir().join(SOCKET_FILE_NAME),
    }
}

/// Write half of a connection, shared between the dispatch loop and any
/// event forwarders.
///
/// Every frame goes through this lock, and the codec emits header and
/// payload as one contiguous buffer, so concurrent reply and event writes
/// can never interleave on the wire.
pub struct ConnectionWriter {
    sink: tokio::sync::Mutex<SplitSink<Framed<UnixStream, FrameCodec>, Bytes>>,
}

impl ConnectionWriter {
    fn new(sink: SplitSink<Framed<UnixStream, FrameCodec>, Bytes>) -> Self {
        Self {
            sink: tokio::sync::Mutex::new(sink),
        }
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns the framing or transport error; the caller decides whether
    /// the connection is still usable.
    pub async fn send(&self, frame: Bytes) -> ProtocolResult<()> {
        self.sink.lock().await.send(frame).await
    }
}

/// Unix socket server for one backend.
pub struct SocketServer<B> {
    socket_path: PathBuf,
    backend: Arc<B>,
    shutdown: CancellationToken,
    workers: TaskTracker,
}

impl<B: Backend> SocketServer<B> {
    /// Create a server that will listen at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>, backend: Arc<B>) -> Self {
        Self {
            socket_path: socket_path.into(),
            backend,
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
        }
    }

    /// Bind the socket and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error when a stale socket file cannot be removed, the
    /// listener cannot be bound, or socket permissions cannot be set.
    /// Accept failures after startup are logged and do not stop the loop.
    pub fn start(&self) -> Result<()> {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("removed stale socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                return Err(e).context("failed to remove stale socket");
            },
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("failed to bind Unix socket")?;

        // Readable/writable by the owner only; the socket is the whole
        // authentication story.
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o700))
            .context("failed to set socket permissions")?;

        info!("listening on {:?}", self.socket_path);

        let backend = Arc::clone(&self.backend);
        let shutdown = self.shutdown.clone();
        let workers = self.workers.clone();
        self.workers.spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    result = listener.accept() => match result {
                        Ok((stream, _addr)) => {
                            workers.spawn(handle_connection(
                                stream,
                                Arc::clone(&backend),
                                shutdown.clone(),
                            ));
                        },
                        Err(e) => error!("accept error: {e}"),
                    },
                }
            }
            debug!("accept loop exited");
        });

        Ok(())
    }

    /// Stop accepting, drain workers, and unlink the socket file.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.workers.close();
        self.workers.wait().await;
        let _ = std::fs::remove_file(&self.socket_path);
        info!("server stopped");
    }

    /// Path the server listens on.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Dispatch loop for one accepted connection.
///
/// Frames are read until the peer disconnects, a framing error occurs, or
/// the server shuts down. Once the connection carries a subscription it is
/// drained purely to detect disconnection; any further frames are
/// discarded and the subscriptions are cancelled on exit.
async fn handle_connection<B: Backend>(
    stream: UnixStream,
    backend: Arc<B>,
    shutdown: CancellationToken,
) {
    debug!("client connected");

    let framed = Framed::new(stream, FrameCodec::new());
    let (sink, mut frames) = framed.split();
    let writer = Arc::new(ConnectionWriter::new(sink));
    let dispatcher = Dispatcher::new(backend);
    let mut subscriptions = Vec::new();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                None => {
                    debug!("client disconnected");
                    break;
                },
                Some(Err(e)) => {
                    // Framing errors cannot be answered; close the connection.
                    debug!("closing connection: {e}");
                    break;
                },
                Some(Ok(payload)) => {
                    if !subscriptions.is_empty() {
                        continue;
                    }
                    if let Some(subscription) = dispatcher.dispatch(&writer, &payload).await {
                        subscriptions.push(subscription);
                    }
                },
            },
        }
    }

    for subscription in &subscriptions {
        subscription.cancel();
    }
}
