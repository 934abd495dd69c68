//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{ToolError, ToolOutput};

/// Bytes kept from one output stream, plus how many were dropped past the limit.
#[derive(Debug, Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Capture {
    /// Lossy UTF-8 text, with a `[<label> <stream> truncated N bytes]` line
    /// appended when anything was dropped.
    fn text(&self, label: &str, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!(
                "\n[{label} {stream} truncated {} bytes]\n",
                self.dropped
            ));
        }
        text
    }
}

/// Raw result of a child process run under a timeout.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Capture,
    pub stderr: Capture,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn to_tool_output(&self, label: &str) -> ToolOutput {
        ToolOutput {
            stdout: self.stdout.text(label, "stdout"),
            stderr: self.stderr.text(label, "stderr"),
        }
    }
}

/// A child that ran to completion (successfully or not) within its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRun {
    pub command: String,
    pub code: Option<i32>,
    pub output: ToolOutput,
}

impl FinishedRun {
    /// Treat any status other than exit code 0 as a failure.
    pub fn into_success(self) -> std::result::Result<ToolOutput, ToolError> {
        if self.code == Some(0) {
            return Ok(self.output);
        }
        Err(self.into_exit_error())
    }

    pub fn into_exit_error(self) -> ToolError {
        ToolError::Exit {
            command: self.command,
            code: self.code,
            output: self.output,
        }
    }
}

/// Run `cmd` and classify the result for a collaborator trait.
///
/// Spawn failures map to [`ToolError::Launch`] and timeouts to
/// [`ToolError::Timeout`]; exit codes are left to the caller.
pub fn run_tool(
    cmd: Command,
    command: &str,
    timeout: Duration,
    output_limit_bytes: usize,
) -> std::result::Result<FinishedRun, ToolError> {
    let output = run_command_with_timeout(cmd, timeout, output_limit_bytes).map_err(
        |err| ToolError::Launch {
            command: command.to_string(),
            reason: format!("{err:#}"),
        },
    )?;
    let captured = output.to_tool_output(command);
    if output.timed_out {
        return Err(ToolError::Timeout {
            command: command.to_string(),
            timeout_secs: timeout.as_secs(),
            output: captured,
        });
    }
    Ok(FinishedRun {
        command: command.to_string(),
        code: output.status.code(),
        output: captured,
    })
}

/// How long readers may keep draining once the child has exited or been
/// killed and the deadline has passed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Spawn `cmd` with piped output and wait at most `timeout` for it.
///
/// Both pipes are drained on their own threads while the child runs, so a
/// chatty child never blocks on a full pipe. At most `output_limit_bytes` of
/// each stream is kept. A child still running at the deadline is killed and
/// reaped, and the result is marked `timed_out`. Descendants that inherited
/// the pipes can keep them open past that; their output is cut off after
/// [`DRAIN_GRACE`] instead of being waited for.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .inspect_err(|err| error!(%err, "spawn failed"))
        .context("spawn command")?;
    debug!(pid = child.id(), "child spawned");

    let stdout_pipe = child.stdout.take().context("child stdout not piped")?;
    let stderr_pipe = child.stderr.take().context("child stderr not piped")?;
    let stdout = Arc::new(Mutex::new(Capture::default()));
    let stderr = Arc::new(Mutex::new(Capture::default()));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(stdout_pipe, output_limit_bytes, &stdout, done_tx.clone());
    spawn_reader(stderr_pipe, output_limit_bytes, &stderr, done_tx);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "deadline reached, killing child");
            child.kill().context("kill child")?;
            (child.wait().context("reap killed child")?, true)
        }
    };

    let drain_until = (started + timeout).max(Instant::now() + DRAIN_GRACE);
    for _ in 0..2 {
        let wait = drain_until.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(wait) {
            Ok(read) => read?,
            Err(RecvTimeoutError::Timeout) => {
                warn!("output pipes still open after child exit, not waiting");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => return Err(anyhow!("output reader panicked")),
        }
    }

    let stdout = take_capture(&stdout);
    let stderr = take_capture(&stderr);
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output over limit"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Drain `stream` into `sink` on a detached thread, then signal `done`.
fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    limit: usize,
    sink: &Arc<Mutex<Capture>>,
    done: mpsc::Sender<Result<()>>,
) {
    let sink = Arc::clone(sink);
    thread::spawn(move || {
        let result = capture(stream, limit, &sink);
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(result);
    });
}

/// Read `stream` to EOF, keeping the first `limit` bytes.
fn capture<R: Read>(mut stream: R, limit: usize, sink: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let read = stream.read(&mut chunk).context("read child output")?;
        if read == 0 {
            return Ok(());
        }
        let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let keep = read.min(limit.saturating_sub(out.bytes.len()));
        out.bytes.extend_from_slice(&chunk[..keep]);
        out.dropped += read - keep;
    }
}

fn take_capture(sink: &Mutex<Capture>) -> Capture {
    std::mem::take(&mut *sink.lock().unwrap_or_else(PoisonError::into_inner))
}
