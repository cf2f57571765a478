//! # cowork-core
//!
//! Core library for the cowork host service - a local backend that lets the
//! Cowork desktop client drive agentic command-line tools directly on a POSIX
//! host instead of inside a VM.
//!
//! This crate provides the host-side building blocks: spawning and tracking
//! child processes, streaming their output as protocol events, rewriting
//! paths between the virtual namespace the client sees and the real
//! filesystem, and fanning events out to subscribers.
//!
//! ## Features
//!
//! - **Process Supervision**: Spawn, monitor, signal, and reap child
//!   processes in their own process groups
//! - **Output Streaming**: Line-oriented stdout/stderr capture emitted as
//!   protocol events
//! - **Path Remapping**: Byte-level substitution between virtual session
//!   paths and their host locations
//! - **Event Fan-Out**: Callback registry with per-subscription cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod event;
pub mod process;
pub mod remap;

pub use bus::{EventBus, EventCallback, Subscription};
pub use event::{Event, Reachability};
pub use process::tracker::ProcessTracker;
pub use process::{ProcessError, SpawnSpec};
