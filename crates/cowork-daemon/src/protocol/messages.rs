//! Request, response, and parameter shapes.
//!
//! The desktop client's VM transport expects exactly two reply shapes:
//!
//! ```text
//! Success: {"success": true, "result": {...}}
//! Error:   {"success": false, "error": "message"}
//! ```
//!
//! The request `id` is accepted but not consumed by the client, and a null
//! result is omitted from the wire entirely.
//!
//! Parameter structs default every field so that missing JSON keys decode
//! to zero values; only malformed JSON or wrong types fail decoding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An incoming RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Operation name. A request without one dispatches as an unknown
    /// method rather than failing to parse.
    #[serde(default)]
    pub method: String,

    /// Operation parameters; shape depends on the method.
    #[serde(default)]
    pub params: Option<serde_json::Value>,

    /// Opaque request identifier, echoed nowhere but accepted everywhere.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// An outgoing RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the operation succeeded.
    pub success: bool,

    /// Operation result on success; omitted when null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Human-readable message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Build a success response.
    #[must_use]
    pub const fn ok(result: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    /// Build a failure response.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Parameters for `configure`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigureParams {
    /// Memory budget in MiB.
    pub memory: i64,
    /// Number of CPUs.
    pub cpus: i64,
}

/// Parameters for operations addressed by session name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VmNameParams {
    /// Session name.
    pub name: String,
}

/// One additional mount in a `spawn` request. Only `path` is used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdditionalMount {
    /// Real filesystem path of the mount target.
    pub path: String,
    /// Declared access mode; currently ignored.
    pub mode: String,
}

/// Parameters for `spawn`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpawnParams {
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
    /// Additional mounts keyed by mount name.
    pub additional_mounts: HashMap<String, AdditionalMount>,
}

/// Parameters for `kill`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KillParams {
    /// Process identifier; the wire field is `id`.
    #[serde(rename = "id")]
    pub process_id: String,
    /// Signal name; `SIGTERM` when empty.
    pub signal: String,
}

/// Parameters for `isProcessRunning`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessIdParams {
    /// Process identifier; the wire field is `id`.
    #[serde(rename = "id")]
    pub process_id: String,
}

/// Parameters for `writeStdin`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WriteStdinParams {
    /// Process identifier; the wire field is `id`.
    #[serde(rename = "id")]
    pub process_id: String,
    /// Raw bytes to deliver to the child's stdin.
    pub data: String,
}

/// Parameters for `mountPath`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MountPathParams {
    /// Session name.
    pub name: String,
    /// Host-side path.
    pub host_path: String,
    /// Path as the session sees it.
    pub guest_path: String,
}

/// Parameters for `readFile`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReadFileParams {
    /// Session name.
    pub name: String,
    /// Virtual path of the file to read.
    pub path: String,
}

/// Parameters for `addApprovedOauthToken`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OauthTokenParams {
    /// Session name.
    pub name: String,
    /// Token value.
    pub token: String,
}

/// Parameters for `setDebugLogging`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebugLoggingParams {
    /// Whether debug logging should be on.
    pub enabled: bool,
}

/// Download state of the VM image bundle, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// A usable bundle is present.
    Ready,
    /// No bundle has been downloaded.
    NotDownloaded,
}

impl DownloadStatus {
    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::NotDownloaded => "NotDownloaded",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_omits_null_result() {
        let json = serde_json::to_string(&Response::ok(None)).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }

    #[test]
    fn test_success_response_with_result() {
        let json =
            serde_json::to_string(&Response::ok(Some(serde_json::json!({"id": "proc-1"})))).unwrap();
        assert_eq!(json, r#"{"success":true,"result":{"id":"proc-1"}}"#);
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_string(&Response::err("Parse error")).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"Parse error"}"#);
    }

    #[test]
    fn test_request_params_and_id_optional() {
        let request: Request = serde_json::from_str(r#"{"method":"getDownloadStatus"}"#).unwrap();
        assert_eq!(request.method, "getDownloadStatus");
        assert!(request.params.is_none());
        assert!(request.id.is_none());
    }

    #[test]
    fn test_spawn_params_tolerate_missing_fields() {
        let params: SpawnParams =
            serde_json::from_str(r#"{"command":"/bin/echo","args":["hi"]}"#).unwrap();
        assert_eq!(params.command, "/bin/echo");
        assert_eq!(params.args, vec!["hi"]);
        assert!(params.id.is_empty());
        assert!(params.env.is_empty());
        assert!(params.additional_mounts.is_empty());
    }

    #[test]
    fn test_spawn_params_decode_additional_mounts() {
        let params: SpawnParams = serde_json::from_str(
            r#"{
                "name": "alpha",
                "command": "claude",
                "additionalMounts": {"repo": {"path": "/home/user/repo", "mode": "rw"}}
            }"#,
        )
        .unwrap();
        assert_eq!(params.additional_mounts["repo"].path, "/home/user/repo");
        assert_eq!(params.additional_mounts["repo"].mode, "rw");
    }

    #[test]
    fn test_process_params_use_wire_field_id() {
        let params: WriteStdinParams =
            serde_json::from_str(r#"{"id":"proc-7","data":"x"}"#).unwrap();
        assert_eq!(params.process_id, "proc-7");
        assert_eq!(params.data, "x");
    }

    #[test]
    fn test_wrong_type_fails_decoding() {
        let result = serde_json::from_str::<ConfigureParams>(r#"{"memory":"lots"}"#);
        assert!(result.is_err());
    }
}
