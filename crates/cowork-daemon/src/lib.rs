//! cowork-daemon - host-native backend service for the Cowork desktop
//! client.
//!
//! The daemon listens on a local Unix socket and speaks the client's
//! length-prefixed JSON protocol: requests are dispatched to a backend,
//! replies are written on the same connection, and subscribed connections
//! additionally receive pushed event frames describing the lifecycle and
//! output of spawned child processes.
//!
//! # Modules
//!
//! - [`protocol`]: Frame codec and message types
//! - [`backend`]: Backend contract and the host-native implementation
//! - [`dispatch`]: Per-request RPC dispatch
//! - [`server`]: Unix socket server and connection lifecycle

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod backend;
pub mod dispatch;
pub mod protocol;
pub mod server;

pub use server::{SocketServer, default_socket_path};
