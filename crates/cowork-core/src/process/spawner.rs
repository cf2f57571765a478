//! Process spawning utilities.
//!
//! Resolves the executable, prepares the environment, and builds the
//! [`tokio::process::Command`] for a spawn request.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::SpawnSpec;

/// Environment variables that must not reach spawned children. The primary
/// CLI refuses to start when it detects a nested invocation through them.
const SCRUBBED_ENV_VARS: &[&str] = &["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Resolve the executable for a spawn request.
///
/// If `command` does not exist as given, candidates are tried in order:
/// a PATH lookup of the basename, a login-shell `which` (service managers
/// run with a minimal PATH that misses `~/.local/bin`, npm globals, nvm,
/// and similar user-scoped installs), then a few fixed locations. The
/// original string is returned unchanged when nothing matches; the spawn
/// itself will then surface the failure.
pub async fn resolve_command(command: &str) -> String {
    if Path::new(command).exists() {
        return command.to_owned();
    }

    let base = Path::new(command)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_owned());

    if let Some(resolved) = search_path(&base) {
        debug!(command, resolved, "resolved executable via PATH");
        return resolved;
    }

    if let Some(resolved) = shell_which(&base).await {
        debug!(command, resolved, "resolved executable via login shell");
        return resolved;
    }

    let mut candidates = Vec::new();
    if let Ok(home) = env::var("HOME") {
        candidates.push(format!("{home}/.local/bin/{base}"));
    }
    candidates.push(format!("/usr/local/bin/{base}"));
    candidates.push(format!("/usr/bin/{base}"));

    for candidate in candidates {
        if Path::new(&candidate).exists() {
            debug!(command, resolved = %candidate, "resolved executable via fallback location");
            return candidate;
        }
    }

    command.to_owned()
}

/// Look up an executable basename in the service's own PATH.
fn search_path(base: &str) -> Option<String> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(base);
        if is_executable(&candidate) {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}

/// Resolve an executable basename through the user's login shell.
async fn shell_which(base: &str) -> Option<String> {
    let output = Command::new("bash")
        .arg("-lc")
        .arg(format!("which {base}"))
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let resolved = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if resolved.is_empty() {
        None
    } else {
        Some(resolved)
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Build the command for a spawn request.
///
/// The child inherits the service's environment with the caller's overlay
/// applied on top (caller values win), minus the scrubbed variables. Each
/// child is placed in its own process group so the whole descendant tree
/// can be signalled at once.
pub fn build_command(program: &str, spec: &SpawnSpec) -> Command {
    let mut cmd = Command::new(program);

    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false)
        .process_group(0);

    if !spec.cwd.is_empty() {
        cmd.current_dir(&spec.cwd);
    }

    cmd.envs(&spec.env);
    for var in SCRUBBED_ENV_VARS {
        cmd.env_remove(var);
    }

    cmd
}
