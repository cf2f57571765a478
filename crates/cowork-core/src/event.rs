//! Protocol event types.
//!
//! Events are pushed to subscribed clients as standalone frames. The field
//! names are part of the wire contract with the desktop client; in
//! particular, process events carry the process identifier under `id`, not
//! `processId`.

use serde::{Deserialize, Serialize};

/// API reachability as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    /// Reachability has not been probed yet.
    Unknown,
    /// The API endpoint answered the probe.
    Reachable,
    /// The probe failed but the failure may be transient.
    ProbablyUnreachable,
    /// The API endpoint did not answer the probe.
    Unreachable,
}

/// A server-pushed protocol event.
///
/// Serializes as a JSON object with a `type` tag and type-specific fields,
/// e.g. `{"type":"exit","id":"proc-1","exitCode":0}`. Optional fields are
/// omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    /// A process wrote a line of output. Both stdout and stderr are emitted
    /// under this tag; the desktop client only consumes `stdout` events.
    #[serde(rename_all = "camelCase")]
    Stdout {
        /// Process identifier.
        id: String,
        /// One line of output, including the trailing newline.
        data: String,
    },

    /// A process terminated.
    #[serde(rename_all = "camelCase")]
    Exit {
        /// Process identifier.
        id: String,
        /// Exit code; `-1` when the process was terminated by a signal.
        exit_code: i32,
        /// Canonical signal name (e.g. `SIGTERM`) for signal-caused exits.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        signal: Option<String>,
        /// Number of OOM kills observed for the process, when known.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        oom_kill_count: Option<u32>,
    },

    /// A per-process error occurred in the supervisor.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Process identifier.
        id: String,
        /// Human-readable description.
        message: String,
        /// `true` when the process could not be started at all.
        fatal: bool,
    },

    /// Result of a host-level API connectivity probe.
    #[serde(rename_all = "camelCase")]
    ApiReachability {
        /// Probe outcome.
        reachability: Reachability,
        /// Whether the service will attempt recovery on its own.
        will_try_recover: bool,
    },

    /// The backend for a named session started.
    #[serde(rename_all = "camelCase")]
    VmStarted {
        /// Session name.
        name: String,
    },

    /// The backend for a named session stopped.
    #[serde(rename_all = "camelCase")]
    VmStopped {
        /// Session name.
        name: String,
    },
}

impl Event {
    /// Create an output event.
    pub fn stdout(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Stdout {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Create an exit event for a normal exit.
    pub fn exit(id: impl Into<String>, exit_code: i32) -> Self {
        Self::Exit {
            id: id.into(),
            exit_code,
            signal: None,
            oom_kill_count: None,
        }
    }

    /// Create an exit event for a signal-caused exit.
    pub fn exit_with_signal(
        id: impl Into<String>,
        exit_code: i32,
        signal: impl Into<String>,
    ) -> Self {
        Self::Exit {
            id: id.into(),
            exit_code,
            signal: Some(signal.into()),
            oom_kill_count: None,
        }
    }

    /// Create a per-process error event.
    pub fn process_error(id: impl Into<String>, message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            id: id.into(),
            message: message.into(),
            fatal,
        }
    }

    /// Create an API reachability event from a probe outcome.
    #[must_use]
    pub const fn api_reachability(reachable: bool) -> Self {
        Self::ApiReachability {
            reachability: if reachable {
                Reachability::Reachable
            } else {
                Reachability::Unreachable
            },
            will_try_recover: false,
        }
    }

    /// Create a backend-started event.
    pub fn vm_started(name: impl Into<String>) -> Self {
        Self::VmStarted { name: name.into() }
    }

    /// Create a backend-stopped event.
    pub fn vm_stopped(name: impl Into<String>) -> Self {
        Self::VmStopped { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_event_shape() {
        let event = Event::stdout("proc-1", "hi\n");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "stdout", "id": "proc-1", "data": "hi\n"})
        );
    }

    #[test]
    fn test_exit_event_omits_absent_fields() {
        let event = Event::exit("proc-2", 0);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"exit","id":"proc-2","exitCode":0}"#);
    }

    #[test]
    fn test_exit_event_with_signal() {
        let event = Event::exit_with_signal("proc-3", -1, "SIGTERM");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["exitCode"], -1);
        assert_eq!(json["signal"], "SIGTERM");
        assert!(json.get("oomKillCount").is_none());
    }

    #[test]
    fn test_error_event_shape() {
        let event = Event::process_error("proc-4", "boom", true);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "id": "proc-4", "message": "boom", "fatal": true})
        );
    }

    #[test]
    fn test_api_reachability_event_shape() {
        let json = serde_json::to_value(Event::api_reachability(false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "apiReachability",
                "reachability": "unreachable",
                "willTryRecover": false
            })
        );
    }

    #[test]
    fn test_vm_lifecycle_event_shapes() {
        let started = serde_json::to_value(Event::vm_started("alpha")).unwrap();
        assert_eq!(
            started,
            serde_json::json!({"type": "vmStarted", "name": "alpha"})
        );

        let stopped = serde_json::to_value(Event::vm_stopped("alpha")).unwrap();
        assert_eq!(
            stopped,
            serde_json::json!({"type": "vmStopped", "name": "alpha"})
        );
    }
}
