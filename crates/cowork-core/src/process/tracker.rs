//! Tracking and supervision of spawned host processes.
//!
//! The tracker owns every child the service has spawned: it streams their
//! output as protocol events, injects stdin with path remapping, signals
//! whole process groups, and reaps exits. Records stay queryable after the
//! child has been reaped; process identity is in memory only and does not
//! survive a service restart.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use nix::sys::signal::killpg;
use nix::unistd::{Pid, getpgid};
use regex::bytes::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ProcessError, SpawnSpec, signal_name, spawner};
use crate::event::Event;
use crate::remap::RemapSet;

/// Initial capacity of the per-stream line buffer.
const INITIAL_LINE_BUF: usize = 64 * 1024;

/// Maximum accepted output line length. Large JSON stream events are
/// common, so the cap is generous.
pub const MAX_LINE_LEN: usize = 10 * 1024 * 1024;

/// How long a stdin write may block before it is abandoned.
const STDIN_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sink invoked for every event the tracker produces.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// One tracked host process.
#[derive(Debug)]
struct TrackedProcess {
    id: String,
    /// OS process id, used to resolve the process group for signalling.
    pid: Option<u32>,
    /// Write side of the child's stdin pipe. The mutex serializes writers.
    stdin: Mutex<tokio::process::ChildStdin>,
    /// Completion latch, cancelled exactly once when the child is reaped.
    done: CancellationToken,
    /// Path remap state for stdin and output rewriting.
    remap: RemapSet,
}

/// Supervisor for all spawned host processes.
///
/// Spawning inserts a record that remains until service shutdown; the
/// completion latch distinguishes live processes from reaped ones.
pub struct ProcessTracker {
    processes: RwLock<HashMap<String, Arc<TrackedProcess>>>,
    next_id: AtomicU64,
    sink: EventSink,
}

impl ProcessTracker {
    /// Create a tracker that reports events through `sink`.
    #[must_use]
    pub fn new(sink: EventSink) -> Self {
        Self {
            processes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            sink,
        }
    }

    /// Spawn a process and stream its output as events.
    ///
    /// Returns the process identifier: `spec.id` when non-empty, otherwise
    /// an auto-assigned `proc-N`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::SpawnFailed`] when the OS refuses to start
    /// the process; a fatal `error` event is emitted as well.
    pub async fn spawn(&self, spec: SpawnSpec) -> Result<String, ProcessError> {
        let id = if spec.id.is_empty() {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            format!("proc-{n}")
        } else {
            spec.id.clone()
        };

        let program = spawner::resolve_command(&spec.command).await;
        let mut command = spawner::build_command(&program, &spec);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                (self.sink)(Event::process_error(
                    &id,
                    format!("failed to start process: {e}"),
                    true,
                ));
                return Err(ProcessError::SpawnFailed(e.to_string()));
            },
        };

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stdin pipe unavailable".to_owned()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stdout pipe unavailable".to_owned()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::SpawnFailed("stderr pipe unavailable".to_owned()))?;

        let record = Arc::new(TrackedProcess {
            id: id.clone(),
            pid,
            stdin: Mutex::new(stdin),
            done: CancellationToken::new(),
            remap: spec.remap,
        });

        self.processes
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&record));

        debug!(id = %id, program = %program, pid = ?pid, args = ?spec.args, cwd = %spec.cwd, "spawned process");

        let stdout_reader = tokio::spawn(stream_output(
            Arc::clone(&self.sink),
            Arc::clone(&record),
            stdout,
            "stdout",
        ));
        let stderr_reader = tokio::spawn(stream_output(
            Arc::clone(&self.sink),
            Arc::clone(&record),
            stderr,
            "stderr",
        ));

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            // Both output streams must drain before the exit is reported.
            let _ = tokio::join!(stdout_reader, stderr_reader);

            let (exit_code, signal) = match child.wait().await {
                Ok(status) => {
                    let signal = status.signal().map(signal_name);
                    (status.code().unwrap_or(-1), signal)
                },
                Err(e) => {
                    warn!(id = %record.id, "waiting for process failed: {e}");
                    (-1, None)
                },
            };

            match &signal {
                Some(name) => {
                    debug!(id = %record.id, exit_code, signal = %name, "process exited");
                    sink(Event::exit_with_signal(&record.id, exit_code, name.as_str()));
                },
                None => {
                    debug!(id = %record.id, exit_code, "process exited");
                    sink(Event::exit(&record.id, exit_code));
                },
            }

            record.done.cancel();
        });

        Ok(id)
    }

    /// Send a signal to a process and its whole process group.
    ///
    /// An empty or unrecognized signal name means `SIGTERM`. Delivery
    /// targets `-pgid`; when the group cannot be resolved the process is
    /// signalled directly. Signal delivery failures are not reported - the
    /// process may already be gone.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NotFound`] for an unknown identifier.
    pub fn kill(&self, process_id: &str, signal: &str) -> Result<(), ProcessError> {
        let record = self
            .get(process_id)
            .ok_or_else(|| ProcessError::NotFound(process_id.to_owned()))?;

        let Some(pid) = record.pid else {
            return Ok(());
        };
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(pid as i32);
        let sig = super::lookup_signal(signal);

        match getpgid(Some(pid)) {
            Ok(pgid) => {
                debug!(id = %process_id, pgid = %pgid, signal = ?sig, "signalling process group");
                let _ = killpg(pgid, sig);
            },
            Err(_) => {
                let _ = nix::sys::signal::kill(pid, sig);
            },
        }

        Ok(())
    }

    /// Write data to a process's stdin.
    ///
    /// The payload is rewritten first: virtual paths become real paths,
    /// mount remaps are applied, and the client's skill plugin prefix is
    /// stripped. The write is serialized against other writers to the same
    /// process and bounded by a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NotFound`] for an unknown identifier,
    /// [`ProcessError::Exited`] when the process was already reaped,
    /// [`ProcessError::ExitedDuringWrite`] when it is reaped mid-write, and
    /// [`ProcessError::StdinWriteTimeout`] when the write does not complete
    /// within 10 seconds.
    pub async fn write_stdin(&self, process_id: &str, data: &[u8]) -> Result<(), ProcessError> {
        let record = self
            .get(process_id)
            .ok_or_else(|| ProcessError::NotFound(process_id.to_owned()))?;

        let data = record.remap.apply_forward(data);
        let data = strip_skill_prefix(data);

        if record.done.is_cancelled() {
            return Err(ProcessError::Exited(process_id.to_owned()));
        }

        let write = async {
            let mut stdin = record.stdin.lock().await;
            stdin.write_all(&data).await?;
            stdin.flush().await?;
            Ok(())
        };

        tokio::select! {
            result = write => result,
            () = record.done.cancelled() => {
                Err(ProcessError::ExitedDuringWrite(process_id.to_owned()))
            },
            () = tokio::time::sleep(STDIN_WRITE_TIMEOUT) => {
                Err(ProcessError::StdinWriteTimeout(process_id.to_owned()))
            },
        }
    }

    /// Whether a tracked process is still running.
    ///
    /// Unknown identifiers and reaped processes both report `false`.
    #[must_use]
    pub fn is_running(&self, process_id: &str) -> bool {
        self.get(process_id)
            .is_some_and(|record| !record.done.is_cancelled())
    }

    /// OS process id of a tracked process, if it started.
    #[must_use]
    pub fn pid(&self, process_id: &str) -> Option<u32> {
        self.get(process_id).and_then(|record| record.pid)
    }

    /// Signal every tracked process with `SIGTERM`.
    pub fn kill_all(&self) {
        let ids: Vec<String> = self.processes.read().unwrap().keys().cloned().collect();
        for id in ids {
            let _ = self.kill(&id, "");
        }
    }

    fn get(&self, process_id: &str) -> Option<Arc<TrackedProcess>> {
        self.processes.read().unwrap().get(process_id).cloned()
    }
}

impl std::fmt::Debug for ProcessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTracker")
            .field("processes", &self.processes.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

/// Strip the plugin prefix from skill invocations in user messages.
///
/// The desktop UI sends `"content":"/<plugin>:<skill> ..."` but the CLI
/// resolves skills by bare name, so `/<plugin>:` collapses to `/`.
fn strip_skill_prefix(data: Vec<u8>) -> Vec<u8> {
    static SKILL_PREFIX: OnceLock<Regex> = OnceLock::new();

    if !contains(&data, br#""content":"/"#) {
        return data;
    }

    let re = SKILL_PREFIX.get_or_init(|| {
        Regex::new(r#""content":"/[a-zA-Z0-9_-]+:"#).expect("skill prefix pattern is valid")
    });
    if re.is_match(&data) {
        debug!("stripping skill plugin prefix from user message");
        re.replace_all(&data, &br#""content":"/"#[..]).into_owned()
    } else {
        data
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

enum LineRead {
    Line,
    Eof,
    TooLong,
}

/// Read one newline-terminated line into `buf`, without the newline.
///
/// Lines longer than [`MAX_LINE_LEN`] abort with `TooLong` before the rest
/// of the line is buffered. A final unterminated line is still returned.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(if buf.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Line
            });
        }

        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            buf.extend_from_slice(&chunk[..pos]);
            reader.consume(pos + 1);
            return Ok(if buf.len() > MAX_LINE_LEN {
                LineRead::TooLong
            } else {
                LineRead::Line
            });
        }

        buf.extend_from_slice(chunk);
        let consumed = chunk.len();
        reader.consume(consumed);
        if buf.len() > MAX_LINE_LEN {
            return Ok(LineRead::TooLong);
        }
    }
}

/// Stream one output pipe line by line as events.
///
/// Every line is emitted as a `stdout` event regardless of which stream it
/// came from - the desktop client only consumes that type, and the primary
/// CLI writes its stream-json output to stderr.
async fn stream_output<R>(sink: EventSink, record: Arc<TrackedProcess>, reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(INITIAL_LINE_BUF, reader);
    let mut buf = Vec::new();

    loop {
        match read_line_capped(&mut reader, &mut buf).await {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::Line) => {
                let mut line = record.remap.apply_reverse(&buf);
                line.push(b'\n');
                (sink)(Event::stdout(
                    &record.id,
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            },
            Ok(LineRead::TooLong) => {
                warn!(id = %record.id, stream, "output line exceeds {MAX_LINE_LEN} bytes");
                (sink)(Event::process_error(
                    &record.id,
                    format!("{stream} scanner error: line exceeds {MAX_LINE_LEN} bytes"),
                    false,
                ));
                break;
            },
            Err(e) => {
                warn!(id = %record.id, stream, "scanner error: {e}");
                (sink)(Event::process_error(
                    &record.id,
                    format!("{stream} scanner error: {e}"),
                    false,
                ));
                break;
            },
        }
    }
}
