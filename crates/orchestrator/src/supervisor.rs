//! Process supervisor for encoder invocations
//!
//! Runs one argument vector as a child process (never through a shell),
//! merges its stdout and stderr into a single line stream, extracts progress
//! and advisory errors, and supports cancelling the whole process tree.

use crate::command::render_command_line;
use crate::process_tree::kill_tree;
use crate::status::{is_error_line, ProgressTracker, ProgressUpdate};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on waiting for a cancelled process tree to exit
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the output loop wakes to check for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error type for supervisor operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// IO error while waiting on the child
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A program and its full argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Rendered for the audit log only
    pub fn command_line(&self) -> String {
        render_command_line(&self.program, &self.args)
    }
}

/// Receives the child's output as it is produced
pub trait OutputObserver {
    /// Called for every line carrying a position marker
    fn on_progress(&mut self, update: &ProgressUpdate);

    /// Called for every line, in emission order
    fn on_line(&mut self, line: &str);
}

/// Outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessResult {
    /// None when the process was killed before reporting one
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    /// Lines containing an advisory error keyword
    pub error_lines: Vec<String>,
    pub duration_secs: Option<u64>,
}

impl ProcessResult {
    /// Exit code zero without cancellation is the only success
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.cancelled
    }
}

/// Shared stop flag plus the PID of the process currently running
///
/// Cloned into whichever thread handles the user's stop request.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    active_pid: Arc<Mutex<Option<u32>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stop flag and kill the running process tree, if any
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Held while killing; the worker reaps only under this lock
        let slot = self.active_slot();
        if let Some(pid) = *slot {
            info!("Stop requested, killing process tree of {}", pid);
            kill_tree(pid);
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn set_active(&self, pid: Option<u32>) {
        *self.active_slot() = pid;
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<u32>> {
        self.active_pid.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Runs invocations one at a time and honours the shared stop handle
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    handle: StopHandle,
}

impl ProcessSupervisor {
    pub fn new(handle: StopHandle) -> Self {
        Self { handle }
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.handle
    }

    /// Terminate the running child and all of its descendants
    pub fn cancel(&self) {
        self.handle.request_stop();
    }

    /// Run one invocation to completion, streaming its output to `observer`
    ///
    /// # Errors
    /// Returns an error only if the process cannot be started or waited on.
    /// A nonzero exit is reported through `ProcessResult`, not as an error.
    pub fn run(
        &self,
        invocation: &Invocation,
        observer: &mut dyn OutputObserver,
    ) -> Result<ProcessResult, SupervisorError> {
        if self.handle.is_stop_requested() {
            return Ok(ProcessResult {
                cancelled: true,
                ..ProcessResult::default()
            });
        }

        info!("Running: {}", invocation.command_line());

        // Step 1: spawn with both streams piped
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: invocation.program.display().to_string(),
                source,
            })?;

        self.handle.set_active(Some(child.id()));
        if self.handle.is_stop_requested() {
            // Stop arrived between the check above and the pid being recorded
            kill_tree(child.id());
        }

        // Step 2: one reader thread per stream, merged through a channel
        let (tx, rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone());
        }
        drop(tx);

        // Step 3: consume lines until both streams close
        let mut tracker = ProgressTracker::new();
        let mut error_lines = Vec::new();
        let mut stop_seen: Option<Instant> = None;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    observer.on_line(&line);
                    if is_error_line(&line) {
                        error_lines.push(line.clone());
                    }
                    if let Some(update) = tracker.observe(&line) {
                        observer.on_progress(&update);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if self.handle.is_stop_requested() {
                let since = *stop_seen.get_or_insert_with(Instant::now);
                if since.elapsed() >= KILL_TIMEOUT {
                    // Something still holds the pipes open
                    warn!("Output did not close within {:?} of stop", KILL_TIMEOUT);
                    break;
                }
            }
        }

        // Step 4: exit status, bounded only once a stop arrives
        let status = wait_bounded(&mut child, &self.handle, KILL_TIMEOUT)?;

        let result = ProcessResult {
            exit_code: status.code(),
            cancelled: self.handle.is_stop_requested(),
            error_lines,
            duration_secs: tracker.duration(),
        };
        debug!(
            "Process finished: exit_code={:?} cancelled={}",
            result.exit_code, result.cancelled
        );
        Ok(result)
    }
}

/// Reap the child, force-killing it once a stop has been pending for `timeout`
///
/// Reaping and clearing the active pid happen under the same lock as
/// `request_stop`, so a stop never signals a pid that was already reaped.
fn wait_bounded(child: &mut Child, handle: &StopHandle, timeout: Duration) -> io::Result<ExitStatus> {
    let mut deadline: Option<Instant> = None;
    loop {
        {
            let mut slot = handle.active_slot();
            match child.try_wait() {
                Ok(Some(status)) => {
                    *slot = None;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => {
                    *slot = None;
                    return Err(e);
                }
            }
        }

        if handle.is_stop_requested() {
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + timeout);
            if Instant::now() >= deadline {
                warn!("Process {} ignored cancellation, forcing kill", child.id());
                let mut slot = handle.active_slot();
                // Fails only if it already exited, which the wait below reports
                let _ = child.kill();
                let status = child.wait();
                *slot = None;
                return status;
            }
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Read a stream and send it line by line, splitting on both `\n` and `\r`
fn spawn_reader<R: Read + Send + 'static>(mut stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for &byte in &buf[..n] {
                if byte == b'\n' || byte == b'\r' {
                    if !pending.is_empty() {
                        let line = String::from_utf8_lossy(&pending).into_owned();
                        pending.clear();
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                } else {
                    pending.push(byte);
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
    });
}
