//! RPC dispatch.
//!
//! One frame in, one reply frame out - except `subscribeEvents`, which
//! additionally turns the connection into an event push channel. Error
//! strings are part of the wire contract: `"Parse error"` for undecodable
//! requests, `"Method not found: <m>"` for unknown methods,
//! `"Invalid params: <detail>"` for undecodable parameters, and backend
//! error messages passed through unmodified.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use cowork_core::bus::{EventCallback, Subscription};
use cowork_core::event::Event;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendResult, SpawnRequest};
use crate::protocol::messages::{
    ConfigureParams, DebugLoggingParams, KillParams, MountPathParams, OauthTokenParams,
    ProcessIdParams, ReadFileParams, Request, Response, SpawnParams, VmNameParams,
    WriteStdinParams,
};
use crate::server::ConnectionWriter;

/// Dispatches requests from one connection to the backend.
pub struct Dispatcher<B> {
    backend: Arc<B>,
}

impl<B: Backend> Dispatcher<B> {
    /// Create a dispatcher over the given backend.
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Parse and dispatch one request frame.
    ///
    /// Returns the event subscription when the request was a successful
    /// `subscribeEvents`; the connection then switches to drain mode.
    pub async fn dispatch(
        &self,
        writer: &Arc<ConnectionWriter>,
        payload: &[u8],
    ) -> Option<Subscription> {
        let request: Request = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                debug!("invalid JSON request: {e}");
                write_response(writer, &Response::err("Parse error")).await;
                return None;
            },
        };

        debug!(method = %request.method, id = ?request.id, "rpc");

        match request.method.as_str() {
            "configure" => self.handle_configure(writer, request.params).await,
            "createVM" => self.handle_create_vm(writer, request.params).await,
            "startVM" => self.handle_start_vm(writer, request.params).await,
            "stopVM" => self.handle_stop_vm(writer, request.params).await,
            "isRunning" => self.handle_is_running(writer, request.params).await,
            "isGuestConnected" => self.handle_is_guest_connected(writer, request.params).await,
            "spawn" => self.handle_spawn(writer, request.params).await,
            "kill" => self.handle_kill(writer, request.params).await,
            "writeStdin" => self.handle_write_stdin(writer, request.params).await,
            "isProcessRunning" => self.handle_is_process_running(writer, request.params).await,
            "mountPath" => self.handle_mount_path(writer, request.params).await,
            "readFile" => self.handle_read_file(writer, request.params).await,
            "installSdk" => self.handle_install_sdk(writer, request.params).await,
            "addApprovedOauthToken" => self.handle_oauth_token(writer, request.params).await,
            "setDebugLogging" => self.handle_set_debug_logging(writer, request.params).await,
            "subscribeEvents" => {
                return self.handle_subscribe_events(writer, request.params).await;
            },
            "getDownloadStatus" => self.handle_get_download_status(writer).await,
            unknown => {
                write_response(writer, &Response::err(format!("Method not found: {unknown}")))
                    .await;
            },
        }

        None
    }

    async fn handle_configure(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<ConfigureParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.configure(p.memory, p.cpus).await).await;
    }

    async fn handle_create_vm(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<VmNameParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.create_vm(&p.name).await).await;
    }

    async fn handle_start_vm(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<VmNameParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.start_vm(&p.name).await).await;
    }

    async fn handle_stop_vm(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<VmNameParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.stop_vm(&p.name).await).await;
    }

    async fn handle_is_running(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let p = decode_params_lenient::<VmNameParams>(params);
        match self.backend.is_running(&p.name).await {
            Ok(running) => {
                write_response(writer, &Response::ok(Some(json!({"running": running})))).await;
            },
            Err(e) => write_response(writer, &Response::err(e.to_string())).await,
        }
    }

    async fn handle_is_guest_connected(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let p = decode_params_lenient::<VmNameParams>(params);
        match self.backend.is_guest_connected(&p.name).await {
            Ok(connected) => {
                write_response(writer, &Response::ok(Some(json!({"connected": connected}))))
                    .await;
            },
            Err(e) => write_response(writer, &Response::err(e.to_string())).await,
        }
    }

    async fn handle_spawn(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<SpawnParams>(writer, params).await else {
            return;
        };
        debug!(
            name = %p.name,
            command = %p.command,
            args = ?p.args,
            cwd = %p.cwd,
            "spawn request"
        );

        // Only the path of each additional mount matters to the backend.
        let mounts = p
            .additional_mounts
            .into_iter()
            .map(|(mount_name, mount)| (mount_name, mount.path))
            .collect();

        let request = SpawnRequest {
            name: p.name,
            id: p.id,
            command: p.command,
            args: p.args,
            env: p.env,
            cwd: p.cwd,
            mounts,
        };

        match self.backend.spawn(request).await {
            Ok(id) => write_response(writer, &Response::ok(Some(json!({"id": id})))).await,
            Err(e) => write_response(writer, &Response::err(e.to_string())).await,
        }
    }

    async fn handle_kill(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<KillParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.kill(&p.process_id, &p.signal).await).await;
    }

    async fn handle_write_stdin(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<WriteStdinParams>(writer, params).await else {
            return;
        };
        reply_unit(
            writer,
            self.backend.write_stdin(&p.process_id, p.data.as_bytes()).await,
        )
        .await;
    }

    async fn handle_is_process_running(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<ProcessIdParams>(writer, params).await else {
            return;
        };
        match self.backend.is_process_running(&p.process_id).await {
            Ok(running) => {
                write_response(writer, &Response::ok(Some(json!({"running": running})))).await;
            },
            Err(e) => write_response(writer, &Response::err(e.to_string())).await,
        }
    }

    async fn handle_mount_path(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<MountPathParams>(writer, params).await else {
            return;
        };
        reply_unit(
            writer,
            self.backend
                .mount_path(&p.name, &p.host_path, &p.guest_path)
                .await,
        )
        .await;
    }

    async fn handle_read_file(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<ReadFileParams>(writer, params).await else {
            return;
        };
        match self.backend.read_file(&p.name, &p.path).await {
            Ok(data) => write_response(writer, &Response::ok(Some(json!({"data": data})))).await,
            Err(e) => write_response(writer, &Response::err(e.to_string())).await,
        }
    }

    async fn handle_install_sdk(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<VmNameParams>(writer, params).await else {
            return;
        };
        reply_unit(writer, self.backend.install_sdk(&p.name).await).await;
    }

    async fn handle_oauth_token(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<OauthTokenParams>(writer, params).await else {
            return;
        };
        reply_unit(
            writer,
            self.backend.add_approved_oauth_token(&p.name, &p.token).await,
        )
        .await;
    }

    async fn handle_set_debug_logging(&self, writer: &Arc<ConnectionWriter>, params: ParamsIn) {
        let Some(p) = decode_params::<DebugLoggingParams>(writer, params).await else {
            return;
        };
        self.backend.set_debug_logging(p.enabled);
        write_response(writer, &Response::ok(None)).await;
    }

    /// Register an event subscription for this connection.
    ///
    /// The bus callback enqueues events into an unbounded channel; a
    /// forwarder task drains it in order and pushes frames through the
    /// connection's write lock. A failed push flips the cancelled flag so
    /// later events short-circuit without touching the connection.
    async fn handle_subscribe_events(
        &self,
        writer: &Arc<ConnectionWriter>,
        params: ParamsIn,
    ) -> Option<Subscription> {
        let p = decode_params_lenient::<VmNameParams>(params);

        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let callback: EventCallback = {
            let cancelled = Arc::clone(&cancelled);
            Arc::new(move |event: &Event| {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                let _ = tx.send(event.clone());
            })
        };

        let subscription = match self.backend.subscribe_events(&p.name, callback) {
            Ok(subscription) => subscription,
            Err(e) => {
                write_response(writer, &Response::err(e.to_string())).await;
                return None;
            },
        };

        // Initial ack before any event frame.
        write_response(writer, &Response::ok(Some(json!({"subscribed": true})))).await;

        let writer = Arc::clone(writer);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let frame = match serde_json::to_vec(&event) {
                    Ok(data) => Bytes::from(data),
                    Err(e) => {
                        debug!("failed to serialize event: {e}");
                        continue;
                    },
                };
                if let Err(e) = writer.send(frame).await {
                    debug!("event write failed, cancelling subscription: {e}");
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            }
        });

        Some(subscription)
    }

    async fn handle_get_download_status(&self, writer: &Arc<ConnectionWriter>) {
        let status = self.backend.download_status();
        write_response(writer, &Response::ok(Some(json!({"status": status.as_str()})))).await;
    }
}

type ParamsIn = Option<serde_json::Value>;

/// Decode params, replying `Invalid params` (and returning `None`) on
/// failure. Missing params fail like mistyped ones.
async fn decode_params<P>(writer: &Arc<ConnectionWriter>, params: ParamsIn) -> Option<P>
where
    P: DeserializeOwned,
{
    match serde_json::from_value(params.unwrap_or(serde_json::Value::Null)) {
        Ok(p) => Some(p),
        Err(e) => {
            write_response(writer, &Response::err(format!("Invalid params: {e}"))).await;
            None
        },
    }
}

/// Decode params, tolerating absence and decode failures with zero values.
///
/// A handful of polling requests arrive from the client without params;
/// they proceed with an empty name rather than failing.
fn decode_params_lenient<P>(params: ParamsIn) -> P
where
    P: DeserializeOwned + Default,
{
    let Some(value) = params else {
        return P::default();
    };
    match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            warn!("ignoring undecodable params: {e}");
            P::default()
        },
    }
}

async fn reply_unit(writer: &Arc<ConnectionWriter>, result: BackendResult<()>) {
    match result {
        Ok(()) => write_response(writer, &Response::ok(None)).await,
        Err(e) => write_response(writer, &Response::err(e.to_string())).await,
    }
}

async fn write_response(writer: &Arc<ConnectionWriter>, response: &Response) {
    let data = match serde_json::to_vec(response) {
        Ok(data) => data,
        Err(e) => {
            warn!("failed to serialize response: {e}");
            return;
        },
    };
    if let Err(e) = writer.send(Bytes::from(data)).await {
        debug!("failed to write response: {e}");
    }
}
