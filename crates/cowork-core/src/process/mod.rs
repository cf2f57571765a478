//! Process management module.
//!
//! Provides types and functions for spawning, monitoring, and controlling
//! child processes on behalf of the desktop client.

pub mod spawner;
pub mod tracker;

use std::collections::HashMap;

use nix::sys::signal::Signal;

use crate::remap::RemapSet;

/// Process specification - defines what to run.
#[derive(Debug, Default)]
pub struct SpawnSpec {
    /// Client-assigned process identifier; auto-generated when empty.
    pub id: String,

    /// Command to execute. Resolved through the lookup chain when the path
    /// does not exist as given.
    pub command: String,

    /// Command arguments.
    pub args: Vec<String>,

    /// Environment overlay. Applied on top of the service's own
    /// environment; caller values win.
    pub env: HashMap<String, String>,

    /// Working directory; the service's own when empty.
    pub cwd: String,

    /// Path remap state for stdin and output rewriting.
    pub remap: RemapSet,
}

impl SpawnSpec {
    /// Create a new builder for `SpawnSpec`.
    #[must_use]
    pub fn builder() -> SpawnSpecBuilder {
        SpawnSpecBuilder::default()
    }
}

/// Builder for `SpawnSpec`.
#[derive(Debug, Default)]
pub struct SpawnSpecBuilder {
    id: String,
    command: Option<String>,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: String,
    remap: RemapSet,
}

impl SpawnSpecBuilder {
    /// Set the client-assigned process identifier.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the command to execute.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set command arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the environment overlay.
    #[must_use]
    pub fn env_map(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Set the path remap state.
    #[must_use]
    pub fn remap(mut self, remap: RemapSet) -> Self {
        self.remap = remap;
        self
    }

    /// Build the `SpawnSpec`.
    ///
    /// # Panics
    ///
    /// Panics if `command` is not set.
    #[must_use]
    pub fn build(self) -> SpawnSpec {
        SpawnSpec {
            id: self.id,
            command: self.command.expect("command is required"),
            args: self.args,
            env: self.env,
            cwd: self.cwd,
            remap: self.remap,
        }
    }
}

/// Error types for process operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Failed to spawn process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Process not found.
    #[error("process {0} not found")]
    NotFound(String),

    /// Process already reaped before a stdin write.
    #[error("process {0} has exited")]
    Exited(String),

    /// Process was reaped while a stdin write was in flight.
    #[error("process {0} exited during write")]
    ExitedDuringWrite(String),

    /// Stdin write did not complete in time.
    #[error("stdin write timeout for process {0}")]
    StdinWriteTimeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map a signal name to the corresponding nix signal.
///
/// Names are case-insensitive and an optional `SIG` prefix is stripped.
/// Empty or unrecognized names fall back to `SIGTERM`, the protocol's
/// default termination signal.
#[must_use]
pub fn lookup_signal(name: &str) -> Signal {
    let upper = name.to_uppercase();
    let stripped = upper.strip_prefix("SIG").unwrap_or(&upper);

    match stripped {
        "KILL" => Signal::SIGKILL,
        "INT" => Signal::SIGINT,
        "QUIT" => Signal::SIGQUIT,
        "HUP" => Signal::SIGHUP,
        "USR1" => Signal::SIGUSR1,
        "USR2" => Signal::SIGUSR2,
        _ => Signal::SIGTERM,
    }
}

/// Canonical name of a raw signal number (e.g. `SIGTERM`).
///
/// Signals outside the set the client understands are reported as `SIG<n>`.
#[must_use]
pub fn signal_name(signal: i32) -> String {
    match Signal::try_from(signal) {
        Ok(
            sig @ (Signal::SIGTERM
            | Signal::SIGKILL
            | Signal::SIGINT
            | Signal::SIGQUIT
            | Signal::SIGHUP
            | Signal::SIGUSR1
            | Signal::SIGUSR2
            | Signal::SIGPIPE
            | Signal::SIGABRT
            | Signal::SIGSEGV),
        ) => sig.as_str().to_owned(),
        _ => format!("SIG{signal}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_spec_builder() {
        let spec = SpawnSpec::builder()
            .id("proc-x")
            .command("echo")
            .args(["hello"])
            .cwd("/tmp")
            .build();

        assert_eq!(spec.id, "proc-x");
        assert_eq!(spec.command, "echo");
        assert_eq!(spec.args, vec!["hello"]);
        assert_eq!(spec.cwd, "/tmp");
    }

    #[test]
    fn test_lookup_signal_names() {
        assert_eq!(lookup_signal("KILL"), Signal::SIGKILL);
        assert_eq!(lookup_signal("SIGKILL"), Signal::SIGKILL);
        assert_eq!(lookup_signal("sigint"), Signal::SIGINT);
        assert_eq!(lookup_signal("usr1"), Signal::SIGUSR1);
        assert_eq!(lookup_signal("TERM"), Signal::SIGTERM);
    }

    #[test]
    fn test_lookup_signal_defaults_to_sigterm() {
        assert_eq!(lookup_signal(""), Signal::SIGTERM);
        assert_eq!(lookup_signal("NOPE"), Signal::SIGTERM);
    }

    #[test]
    fn test_signal_name_known_and_fallback() {
        assert_eq!(signal_name(libc_signal(Signal::SIGTERM)), "SIGTERM");
        assert_eq!(signal_name(libc_signal(Signal::SIGKILL)), "SIGKILL");
        assert_eq!(signal_name(libc_signal(Signal::SIGSEGV)), "SIGSEGV");
        // SIGALRM is outside the set the client understands.
        assert_eq!(
            signal_name(libc_signal(Signal::SIGALRM)),
            format!("SIG{}", libc_signal(Signal::SIGALRM))
        );
    }

    fn libc_signal(sig: Signal) -> i32 {
        sig as i32
    }
}
