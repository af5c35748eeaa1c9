//! Process lifecycle management.
//!
//! A `ProcessHandle` owns one configured shell command: it spawns the child,
//! drains its output into a bounded buffer, waits for it to exit and reports
//! the result to the supervisor through the event channel. All mutable state
//! for a handle lives behind a single lock shared by the capture task, the
//! wait task and the control loop.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::Event;
use crate::output::OutputBuffer;

/// Exit code recorded when no real status is available (spawn failure,
/// signal termination, wait error).
pub const FAILURE_EXIT_CODE: i32 = 1;

// How long the wait task gives the capture task to drain the pipes after exit.
const CAPTURE_GRACE: Duration = Duration::from_millis(500);
// Upper bound on a single stdin write; a child that never reads must not
// hold the handle lock indefinitely.
const INPUT_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Specification for a process to be run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Unique display name.
    pub name: String,
    /// Shell command line, executed with `sh -c`.
    pub command: String,
    /// Working directory override.
    pub cwd: Option<String>,
    /// Whether a clean exit of this process ends the session.
    pub critical: bool,
}

/// The lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not started yet.
    Idle,
    /// Child is alive and its input sink is open.
    Running,
    /// Child has exited; the exit code is valid.
    Finished,
}

/// Errors raised while launching a child.
///
/// These never leave the handle; they are recorded in its output.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// Point-in-time copy of a handle's state and exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub exit_code: i32,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state == ProcessState::Finished
    }

    pub fn succeeded(&self) -> bool {
        self.is_finished() && self.exit_code == 0
    }

    pub fn failed(&self) -> bool {
        self.is_finished() && self.exit_code != 0
    }
}

#[derive(Debug)]
struct Inner {
    state: ProcessState,
    exit_code: i32,
    output: OutputBuffer,
    // Some iff state == Running.
    stdin: Option<ChildStdin>,
    scroll: usize,
}

/// Shared handle to one supervised process.
///
/// Cloning is cheap and every clone refers to the same process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    spec: Arc<ProcessSpec>,
    inner: Arc<Mutex<Inner>>,
    event_tx: mpsc::Sender<Event>,
}

impl ProcessHandle {
    /// Creates an idle handle that reports completions on `event_tx`.
    pub fn new(spec: ProcessSpec, event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            spec: Arc::new(spec),
            inner: Arc::new(Mutex::new(Inner {
                state: ProcessState::Idle,
                exit_code: 0,
                output: OutputBuffer::default(),
                stdin: None,
                scroll: 0,
            })),
            event_tx,
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns true if both handles refer to the same process.
    pub fn same_as(&self, other: &ProcessHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Spawns the child and starts its capture and wait tasks.
    ///
    /// A spawn failure is written into the output buffer and the handle is
    /// marked finished with [`FAILURE_EXIT_CODE`].
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        self.launch(&mut inner);
    }

    /// Clears the previous run and starts the command again.
    ///
    /// Only a finished handle can be rerun; returns `false` otherwise.
    pub async fn rerun(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != ProcessState::Finished {
            debug!(process = %self.spec.name, state = ?inner.state, "rerun rejected");
            return false;
        }
        inner.output.clear();
        inner.scroll = 0;
        inner.exit_code = 0;
        self.launch(&mut inner);
        true
    }

    /// Forwards raw bytes to the child's standard input.
    ///
    /// Dropped silently when the process is not running, the pipe is broken
    /// or the child stops reading for longer than the write timeout.
    pub async fn write_input(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.state != ProcessState::Running {
            return;
        }
        let Some(stdin) = inner.stdin.as_mut() else {
            return;
        };
        let write = async {
            match stdin.write_all(bytes).await {
                Ok(()) => stdin.flush().await,
                Err(err) => Err(err),
            }
        };
        match tokio::time::timeout(INPUT_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(process = %self.spec.name, error = %err, "dropped input"),
            Err(_) => debug!(process = %self.spec.name, "dropped input: write timed out"),
        }
    }

    /// Moves the scroll offset by `delta` lines (positive scrolls back),
    /// clamped so a viewport of `visible_height` rows never runs past the
    /// oldest line.
    pub async fn scroll(&self, delta: isize, visible_height: usize) {
        let mut inner = self.inner.lock().await;
        let max_scroll = inner.output.len().saturating_sub(visible_height);
        inner.scroll = inner.scroll.saturating_add_signed(delta).min(max_scroll);
    }

    pub async fn status(&self) -> ProcessStatus {
        let inner = self.inner.lock().await;
        ProcessStatus {
            state: inner.state,
            exit_code: inner.exit_code,
        }
    }

    pub async fn output_snapshot(&self) -> Vec<String> {
        self.inner.lock().await.output.snapshot()
    }

    #[cfg(test)]
    pub(crate) async fn scroll_offset(&self) -> usize {
        self.inner.lock().await.scroll
    }

    /// Copies the lines visible in a viewport of `height` rows.
    pub async fn visible_lines(&self, height: usize) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.output.window(height, inner.scroll)
    }

    #[cfg(test)]
    pub(crate) async fn set_status(&self, state: ProcessState, exit_code: i32) {
        let mut inner = self.inner.lock().await;
        inner.state = state;
        inner.exit_code = exit_code;
        if state != ProcessState::Running {
            inner.stdin = None;
        }
    }

    #[cfg(test)]
    pub(crate) async fn push_output(&self, line: &str) {
        self.inner.lock().await.output.push(line);
    }

    // Runs with the handle lock held so concurrent launches are impossible.
    fn launch(&self, inner: &mut Inner) {
        inner.exit_code = 0;
        match self.spawn_child() {
            Ok((child, stdin, stdout, stderr)) => {
                debug!(process = %self.spec.name, pid = ?child.id(), "started");
                inner.state = ProcessState::Running;
                inner.stdin = Some(stdin);
                let capture = tokio::spawn(capture_output(
                    self.spec.name.clone(),
                    self.inner.clone(),
                    stdout,
                    stderr,
                ));
                tokio::spawn(self.clone().wait_for_exit(child, capture));
            }
            Err(err) => {
                warn!(process = %self.spec.name, error = %err, "spawn failed");
                inner.output.push(format!("ERROR: {}", err));
                inner.state = ProcessState::Finished;
                inner.exit_code = FAILURE_EXIT_CODE;
                inner.stdin = None;
                let event = self.finished_event(FAILURE_EXIT_CODE, inner.output.snapshot());
                // The control loop may be the caller, so never block it on its own queue.
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
        }
    }

    fn spawn_child(&self) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr), ProcessError> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.spec.command);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: self.spec.command.clone(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        Ok((child, stdin, stdout, stderr))
    }

    async fn wait_for_exit(self, mut child: Child, mut capture: JoinHandle<()>) {
        let exit_code = match child.wait().await {
            // No code means the child was terminated by a signal.
            Ok(status) => status.code().unwrap_or(FAILURE_EXIT_CODE),
            Err(err) => {
                warn!(process = %self.spec.name, error = %err, "wait failed");
                FAILURE_EXIT_CODE
            }
        };

        // A background child may keep the pipes open; its output must not
        // leak into a later run.
        if tokio::time::timeout(CAPTURE_GRACE, &mut capture).await.is_err() {
            debug!(process = %self.spec.name, "output still open after exit");
            capture.abort();
            let _ = capture.await;
        }

        let output = {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Finished;
            inner.exit_code = exit_code;
            inner.stdin = None;
            inner.output.snapshot()
        };
        debug!(process = %self.spec.name, exit_code, "finished");

        let event = self.finished_event(exit_code, output);
        let _ = self.event_tx.send(event).await;
    }

    fn finished_event(&self, exit_code: i32, output: Vec<String>) -> Event {
        Event::ProcessFinished {
            name: self.spec.name.clone(),
            exit_code,
            output,
            handle: self.clone(),
        }
    }
}

// Drains stdout and stderr line by line into the shared buffer until both
// streams close. A read error ends that stream.
async fn capture_output(
    name: String,
    inner: Arc<Mutex<Inner>>,
    stdout: ChildStdout,
    stderr: ChildStderr,
) {
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        let (read, from_stdout) = tokio::select! {
            read = stdout.next_segment(), if stdout_open => (read, true),
            read = stderr.next_segment(), if stderr_open => (read, false),
        };
        match read {
            Ok(Some(segment)) => {
                let line = decode_line(&segment);
                inner.lock().await.output.push(line);
            }
            Ok(None) => {
                if from_stdout {
                    stdout_open = false;
                } else {
                    stderr_open = false;
                }
            }
            Err(err) => {
                warn!(process = %name, error = %err, "output read failed");
                if from_stdout {
                    stdout_open = false;
                } else {
                    stderr_open = false;
                }
            }
        }
    }
}

fn decode_line(segment: &[u8]) -> String {
    let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
    String::from_utf8_lossy(segment).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec(name: &str, command: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            command: command.to_string(),
            cwd: None,
            critical: false,
        }
    }

    async fn next_finished(rx: &mut mpsc::Receiver<Event>) -> (String, i32, Vec<String>, ProcessHandle) {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for process")
            .expect("channel closed");
        match event {
            Event::ProcessFinished {
                name,
                exit_code,
                output,
                handle,
            } => (name, exit_code, output, handle),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("echo", "echo one; echo two; exit 7"), tx);
        handle.start().await;

        let (name, exit_code, output, finished) = next_finished(&mut rx).await;
        assert_eq!(name, "echo");
        assert_eq!(exit_code, 7);
        assert_eq!(output, vec!["one", "two"]);
        assert!(finished.same_as(&handle));

        let status = handle.status().await;
        assert_eq!(status.state, ProcessState::Finished);
        assert_eq!(status.exit_code, 7);
    }

    #[tokio::test]
    async fn captures_stderr_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("err", "echo oops >&2"), tx);
        handle.start().await;
        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output, vec!["oops"]);
        assert_eq!(handle.status().await.exit_code, 0);
    }

    #[tokio::test]
    async fn capture_keeps_only_last_hundred_lines() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("seq", "i=0; while [ $i -lt 150 ]; do echo $i; i=$((i+1)); done"), tx);
        handle.start().await;
        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output.len(), 100);
        assert_eq!(output.first().map(String::as_str), Some("50"));
        assert_eq!(output.last().map(String::as_str), Some("149"));
    }

    #[tokio::test]
    async fn runs_in_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = make_spec("pwd", "pwd");
        spec.cwd = Some(dir.path().display().to_string());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(spec, tx);
        handle.start().await;
        let (_, _, output, _) = next_finished(&mut rx).await;
        let reported = std::fs::canonicalize(&output[0]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn spawn_failure_finishes_with_error_line() {
        let mut spec = make_spec("broken", "echo never");
        spec.cwd = Some("/definitely/not/a/real/dir".to_string());
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(spec, tx);
        handle.start().await;

        let status = handle.status().await;
        assert_eq!(status.state, ProcessState::Finished);
        assert_eq!(status.exit_code, FAILURE_EXIT_CODE);

        let (_, exit_code, output, _) = next_finished(&mut rx).await;
        assert_eq!(exit_code, FAILURE_EXIT_CODE);
        assert_eq!(output.len(), 1);
        assert!(output[0].starts_with("ERROR: failed to spawn"));
    }

    #[tokio::test]
    async fn killed_by_signal_reports_failure_code() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("killed", "echo bye; kill -9 $$"), tx);
        handle.start().await;

        let (_, exit_code, output, _) = next_finished(&mut rx).await;
        assert_eq!(exit_code, FAILURE_EXIT_CODE);
        assert_eq!(output, vec!["bye"]);
        let status = handle.status().await;
        assert_eq!(status.state, ProcessState::Finished);
        assert_eq!(status.exit_code, FAILURE_EXIT_CODE);
    }

    #[tokio::test]
    async fn input_to_closed_stdin_is_dropped_while_running() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("deaf", "exec 0<&-; sleep 0.3"), tx);
        handle.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.write_input(b"nobody listens\n").await;
        assert_eq!(handle.status().await.state, ProcessState::Running);
        assert!(handle.output_snapshot().await.is_empty());

        let (_, exit_code, output, _) = next_finished(&mut rx).await;
        assert_eq!(exit_code, 0);
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn input_write_gives_up_when_child_never_reads() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("sleeper", "sleep 2"), tx);
        handle.start().await;

        let started = std::time::Instant::now();
        handle.write_input(&vec![b'x'; 1 << 20]).await;
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(handle.status().await.state, ProcessState::Running);

        next_finished(&mut rx).await;
    }

    #[tokio::test]
    async fn background_output_does_not_leak_into_rerun() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("bg", "(sleep 1; echo late) & echo early"), tx);
        handle.start().await;
        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output, vec!["early"]);

        assert!(handle.rerun().await);
        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output, vec!["early"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.output_snapshot().await, vec!["early"]);
    }

    #[tokio::test]
    async fn forwards_input_while_running() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("reader", "read line; echo got $line"), tx);
        handle.start().await;
        handle.write_input(b"hello\n").await;
        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output, vec!["got hello"]);
    }

    #[tokio::test]
    async fn write_input_after_finish_is_ignored() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("done", "echo done"), tx);
        handle.start().await;
        next_finished(&mut rx).await;

        handle.write_input(b"ignored\n").await;
        assert_eq!(handle.output_snapshot().await, vec!["done"]);
        assert_eq!(handle.status().await.state, ProcessState::Finished);
    }

    #[tokio::test]
    async fn rerun_resets_finished_handle() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("flaky", "echo run; sleep 0.2; exit 3"), tx);
        handle.start().await;
        next_finished(&mut rx).await;
        handle.scroll(5, 0).await;
        assert_eq!(handle.status().await.exit_code, 3);

        assert!(handle.rerun().await);
        let status = handle.status().await;
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.exit_code, 0);
        assert_eq!(handle.scroll_offset().await, 0);
        assert!(handle.output_snapshot().await.len() <= 1);

        let (_, _, output, _) = next_finished(&mut rx).await;
        assert_eq!(output, vec!["run"]);
    }

    #[tokio::test]
    async fn rerun_while_running_is_rejected() {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("long", "echo started; read line"), tx);
        handle.start().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let before = handle.output_snapshot().await;

        assert!(!handle.rerun().await);
        assert_eq!(handle.status().await.state, ProcessState::Running);
        assert_eq!(handle.output_snapshot().await, before);

        handle.write_input(b"\n").await;
        next_finished(&mut rx).await;
    }

    #[tokio::test]
    async fn scroll_is_clamped_to_buffer() {
        let (tx, _rx) = mpsc::channel(16);
        let handle = ProcessHandle::new(make_spec("idle", "true"), tx);
        for i in 0..10 {
            handle.push_output(&i.to_string()).await;
        }
        handle.scroll(3, 4).await;
        assert_eq!(handle.scroll_offset().await, 3);
        assert_eq!(handle.visible_lines(4).await, vec!["3", "4", "5", "6"]);
        handle.scroll(100, 4).await;
        assert_eq!(handle.scroll_offset().await, 6);
        handle.scroll(-100, 4).await;
        assert_eq!(handle.scroll_offset().await, 0);
        handle.scroll(1, 20).await;
        assert_eq!(handle.scroll_offset().await, 0);
    }

    #[test]
    fn decode_line_drops_carriage_return() {
        assert_eq!(decode_line(b"abc\r"), "abc");
        assert_eq!(decode_line(&[0x66, 0xff]), "f\u{fffd}");
    }
}
