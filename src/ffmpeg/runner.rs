//! Supervised external process execution.
//!
//! `SystemRunner::run` spawns a tool with stderr piped, hands every stderr line
//! to the caller as it arrives, and keeps a bounded tail for error reporting.
//! The running child is parked in a `CancelToken`; cancelling kills the whole
//! process tree, which closes stderr and lets the reading side unwind.
//! `SystemRunner::capture` is the short-lived variant used for probes.

use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::ffmpeg::path_to_string;

/// Characters of stderr kept for error reporting.
pub const MAX_STDERR_TAIL_CHARS: usize = 1000;
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(25);
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Result of a process that ran to completion (successfully or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// None when the process did not exit on its own.
    pub exit_code: Option<i32>,
    /// Signal that ended the process (unix only).
    pub signal: Option<i32>,
    pub stderr_tail: String,
}

impl ProcessOutcome {
    pub fn exited(code: i32, stderr_tail: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
            stderr_tail: stderr_tail.into(),
        }
    }

    pub fn killed(signal: i32, stderr_tail: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal),
            stderr_tail: stderr_tail.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Error for an unsuccessful outcome. A signal never masquerades as an exit code.
    pub fn into_error(self) -> AppError {
        match (self.exit_code, self.signal) {
            (Some(code), _) => AppError::tool_exit(code, self.stderr_tail),
            (None, Some(signal)) => AppError::tool_terminated(signal, self.stderr_tail),
            (None, None) => AppError::tool_terminated(0, self.stderr_tail),
        }
    }
}

/// Output of a short-lived capture run (probe queries, filter listing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Process-execution boundary. The batch engine only talks to tools through this.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, streaming stderr lines to `on_stderr_line`.
    /// Returns `Cancelled` if `cancel` fires while the process is alive.
    fn run(
        &self,
        program: &Path,
        args: &[String],
        on_stderr_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> Result<ProcessOutcome, AppError>;

    /// Run with stdout and stderr captured; the process tree is killed after
    /// `timeout` or as soon as `cancel` fires.
    fn capture(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<CapturedOutput, AppError>;
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    active: Mutex<Option<Child>>,
}

/// Cancellation flag plus the child it owns while a process is running.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and kill the attached process tree, if any.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let child = self.inner.active.lock().take();
        if let Some(mut child) = child {
            log::info!(
                target: "denoiser::ffmpeg::runner",
                "Cancellation requested, terminating pid {}",
                child.id()
            );
            kill_process_tree(&mut child);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Park a running child. Hands it back if cancellation already happened.
    fn attach(&self, child: Child) -> Result<(), Child> {
        let mut guard = self.inner.active.lock();
        if self.is_cancelled() {
            return Err(child);
        }
        *guard = Some(child);
        Ok(())
    }

    /// Take the child back. None means `cancel` already killed it.
    fn detach(&self) -> Option<Child> {
        self.inner.active.lock().take()
    }

    /// `try_wait` on the attached child. None means `cancel` already killed it.
    fn poll(&self) -> Option<io::Result<Option<ExitStatus>>> {
        self.inner.active.lock().as_mut().map(Child::try_wait)
    }
}

/// Keeps the last `limit` characters of a line stream.
struct StderrTail {
    buf: String,
    limit: usize,
}

impl StderrTail {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    fn push_line(&mut self, line: &str) {
        self.buf.push_str(line);
        self.buf.push('\n');
        // Compact lazily so long runs do not re-slice on every line.
        if self.buf.len() > self.limit * 8 {
            self.buf = tail_chars(&self.buf, self.limit).to_string();
        }
    }

    fn finish(self) -> String {
        tail_chars(self.buf.trim_end(), self.limit).to_string()
    }
}

fn tail_chars(s: &str, limit: usize) -> &str {
    match s.char_indices().rev().nth(limit.saturating_sub(1)) {
        Some((idx, _)) if limit > 0 => &s[idx..],
        _ if limit == 0 => "",
        _ => s,
    }
}

/// Call `f` for every non-empty line. ffmpeg ends its stats lines with `\r`,
/// so both `\r` and `\n` terminate a line.
fn for_each_line<R: Read>(reader: R, mut f: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);
    loop {
        let buf = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    f(&String::from_utf8_lossy(&line));
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
        reader.consume(len);
    }
    if !line.is_empty() {
        f(&String::from_utf8_lossy(&line));
    }
    Ok(())
}

fn spawn_error(program: &Path, e: io::Error) -> AppError {
    let program = path_to_string(program);
    if e.kind() == io::ErrorKind::NotFound {
        AppError::ToolNotFound(program)
    } else {
        AppError::LaunchFailed {
            program,
            reason: e.to_string(),
        }
    }
}

/// Exit code and terminating signal of a finished process.
fn termination(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

fn base_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    // Own process group so the whole tree can be signalled at once.
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Forcibly terminate `child` and everything it spawned, then reap it.
pub fn kill_process_tree(child: &mut Child) {
    let pid = child.id();
    #[cfg(unix)]
    {
        // The child leads its own process group (see base_command).
        if let Ok(pgid) = libc::pid_t::try_from(pid) {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .creation_flags(CREATE_NO_WINDOW)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
    log::debug!(target: "denoiser::ffmpeg::runner", "Process tree {} terminated", pid);
}

/// `ProcessRunner` backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        on_stderr_line: &mut dyn FnMut(&str),
        cancel: &CancelToken,
    ) -> Result<ProcessOutcome, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        log::debug!(
            target: "denoiser::ffmpeg::runner",
            "Spawning: path={}, args={}",
            program.display(),
            args.len()
        );

        let mut cmd = base_command(program, args);
        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;

        let stderr = match child.stderr.take() {
            Some(s) => s,
            None => {
                kill_process_tree(&mut child);
                return Err(AppError::LaunchFailed {
                    program: path_to_string(program),
                    reason: "Failed to capture stderr".to_string(),
                });
            }
        };

        if let Err(mut child) = cancel.attach(child) {
            kill_process_tree(&mut child);
            return Err(AppError::Cancelled);
        }

        let mut tail = StderrTail::new(MAX_STDERR_TAIL_CHARS);
        let read_result = for_each_line(stderr, |line| {
            tail.push_line(line);
            on_stderr_line(line);
        });

        let child = cancel.detach();
        let Some(mut child) = child else {
            log::warn!(
                target: "denoiser::ffmpeg::runner",
                "Process was cancelled (terminated externally)"
            );
            return Err(AppError::Cancelled);
        };

        if let Err(e) = read_result {
            log::error!(target: "denoiser::ffmpeg::runner", "Reading stderr failed: {}", e);
            kill_process_tree(&mut child);
            return Err(AppError::Io(e));
        }

        let status = child.wait()?;
        let (exit_code, signal) = termination(status);
        if exit_code != Some(0) && cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let stderr_tail = tail.finish();
        if exit_code == Some(0) {
            log::info!(target: "denoiser::ffmpeg::runner", "Process completed successfully");
        } else {
            let err_preview = stderr_tail
                .lines()
                .rev()
                .take(3)
                .collect::<Vec<_>>()
                .join("; ");
            log::error!(
                target: "denoiser::ffmpeg::runner",
                "Process failed (code={:?}, signal={:?}): {}",
                exit_code,
                signal,
                err_preview
            );
        }
        Ok(ProcessOutcome {
            exit_code,
            signal,
            stderr_tail,
        })
    }

    fn capture(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<CapturedOutput, AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let mut cmd = base_command(program, args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            kill_process_tree(&mut child);
            return Err(AppError::LaunchFailed {
                program: path_to_string(program),
                reason: "Failed to capture output".to_string(),
            });
        };

        let stdout_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            buf
        });
        let stderr_handle = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            buf
        });
        let join_readers = || {
            (
                stdout_handle.join().unwrap_or_default(),
                stderr_handle.join().unwrap_or_default(),
            )
        };

        if let Err(mut child) = cancel.attach(child) {
            kill_process_tree(&mut child);
            join_readers();
            return Err(AppError::Cancelled);
        }

        let started = Instant::now();
        let status = loop {
            match cancel.poll() {
                None => {
                    log::debug!(
                        target: "denoiser::ffmpeg::runner",
                        "{} cancelled",
                        program.display()
                    );
                    join_readers();
                    return Err(AppError::Cancelled);
                }
                Some(Ok(Some(status))) => {
                    cancel.detach();
                    break status;
                }
                Some(Ok(None)) if started.elapsed() >= timeout => {
                    if let Some(mut child) = cancel.detach() {
                        kill_process_tree(&mut child);
                    }
                    join_readers();
                    log::warn!(
                        target: "denoiser::ffmpeg::runner",
                        "{} timed out after {:?}",
                        program.display(),
                        timeout
                    );
                    return Err(AppError::ProbeUnavailable(format!(
                        "{} timed out after {}s",
                        path_to_string(program),
                        timeout.as_secs()
                    )));
                }
                Some(Ok(None)) => thread::sleep(CAPTURE_POLL_INTERVAL),
                Some(Err(e)) => {
                    if let Some(mut child) = cancel.detach() {
                        kill_process_tree(&mut child);
                    }
                    join_readers();
                    return Err(AppError::Io(e));
                }
            }
        };

        let (stdout, stderr) = join_readers();
        Ok(CapturedOutput {
            exit_code: termination(status).0.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}
