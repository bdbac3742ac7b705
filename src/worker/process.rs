//! One running worker process.
//!
//! Spawning wires three streams: stdout is read line by line, stderr chunk
//! by chunk, and stdin is kept for writing requests. Everything the process
//! produces, including its termination, is forwarded to the supervisor as a
//! [`WorkerEvent`] tagged with the launch generation so that events from a
//! previous incarnation can be told apart. A stdout line longer than
//! [`MAX_LINE_BYTES`] is dropped and reported as [`WorkerEvent::LineTooLong`].

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use super::error::{WorkerError, WorkerResult};

/// How long to keep forwarding buffered output after the process is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Size of a single stderr read.
const STDERR_CHUNK_SIZE: usize = 4096;

/// Longest stdout line accepted from a worker, terminator excluded.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Something observed on a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A complete stdout line, without its terminator.
    Line(String),
    /// Whatever a single read from stderr returned.
    ErrorChunk(String),
    /// A stdout line went past the given byte limit and was dropped.
    LineTooLong(usize),
    /// The process terminated. Carries a human-readable description.
    Exited(String),
}

/// A [`WorkerEvent`] labelled with the launch it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: WorkerEvent,
}

/// What to execute for a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    /// Render the command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Handle to a spawned worker.
///
/// Dropping the handle kills the process.
pub struct WorkerProcess {
    generation: u64,
    pid: Option<u32>,
    stdin: BufWriter<ChildStdin>,
    _kill: oneshot::Sender<()>,
}

impl WorkerProcess {
    /// Spawn the process described by `spec`.
    ///
    /// Output and termination are reported on `events` from background
    /// tasks; the exit event is sent only after buffered output has been
    /// forwarded.
    pub fn spawn(
        spec: &LaunchSpec,
        generation: u64,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> WorkerResult<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| WorkerError::SpawnFailed(format!("{}: {}", spec.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::SpawnFailed("stderr not captured".to_string()))?;

        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();

        let stdout_task = tokio::spawn(forward_lines(
            stdout,
            MAX_LINE_BYTES,
            generation,
            events.clone(),
        ));
        let stderr_task = tokio::spawn(forward_chunks(stderr, generation, events.clone()));
        tokio::spawn(async move {
            let description = supervise(child, kill_rx).await;
            let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            })
            .await;
            if drained.is_err() {
                tracing::debug!(generation, "worker output still open after exit");
            }
            let _ = events.send(TaggedEvent {
                generation,
                event: WorkerEvent::Exited(description),
            });
        });

        Ok(Self {
            generation,
            pid,
            stdin: BufWriter::new(stdin),
            _kill: kill_tx,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write an already newline-terminated line and flush it.
    pub async fn write_line(&mut self, line: &str) -> WorkerResult<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| WorkerError::WriteFailed(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| WorkerError::WriteFailed(e.to_string()))
    }
}

/// Wait for the child to exit, or kill it once the handle is dropped.
async fn supervise(mut child: Child, mut kill: oneshot::Receiver<()>) -> String {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut kill => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    match status {
        Ok(status) => describe_exit(status),
        Err(e) => format!("wait failed: {}", e),
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => status.to_string(),
    }
}

async fn forward_lines<R>(
    stdout: R,
    max_line: usize,
    generation: u64,
    events: mpsc::UnboundedSender<TaggedEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let limit = max_line as u64 + 1;
        let event = match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) if buf.len() > max_line && buf.last() != Some(&b'\n') => {
                tracing::warn!(generation, limit = max_line, "worker output line too long, dropping it");
                if let Err(e) = discard_line(&mut reader).await {
                    tracing::warn!(generation, error = %e, "worker stdout read failed");
                    break;
                }
                WorkerEvent::LineTooLong(max_line)
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(&['\n', '\r'][..])
                    .to_string();
                WorkerEvent::Line(line)
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "worker stdout read failed");
                break;
            }
        };

        if events.send(TaggedEvent { generation, event }).is_err() {
            break;
        }
    }
}

/// Skip the rest of the current line, terminator included.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}

async fn forward_chunks<R>(stderr: R, generation: u64, events: mpsc::UnboundedSender<TaggedEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut stderr = stderr;
    let mut buf = vec![0u8; STDERR_CHUNK_SIZE];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                let event = TaggedEvent {
                    generation,
                    event: WorkerEvent::ErrorChunk(chunk),
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "worker stderr read failed");
                break;
            }
        }
    }
}
