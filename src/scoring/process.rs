//! Time-bounded subprocess execution
//!
//! The child is always reaped before returning: on timeout it is killed and
//! waited on, and a failed `try_wait` kills it as well. On unix the child
//! leads its own process group and a timeout kills the whole group, so
//! wrapper scripts cannot leave the real analyzer running behind them.

use std::io::{self, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to keep draining pipes after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Spawn `command` and wait for it for at most `timeout`.
///
/// Spawn errors are returned unchanged so callers can tell a missing binary
/// (`ErrorKind::NotFound`) apart from other failures.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> io::Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command.spawn()?;

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            reap(&mut child);
            return Err(io::Error::other("Failed to capture stdout"));
        }
    };
    let stderr = match child.stderr.take() {
        Some(stderr) => stderr,
        None => {
            reap(&mut child);
            return Err(io::Error::other("Failed to capture stderr"));
        }
    };

    let stdout_rx = spawn_reader(stdout);
    let stderr_rx = spawn_reader(stderr);

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    break reap(&mut child);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        }
    };

    // A surviving descendant may still hold the pipes open; never wait on it.
    let deadline = Instant::now() + READER_GRACE;
    let stdout_bytes = drain(&stdout_rx, deadline);
    let stderr_bytes = drain(&stderr_rx, deadline);

    Ok(ProcessOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
        elapsed: start.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Collect chunks until the writer side closes or `deadline` passes.
fn drain(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    let mut buf = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    buf
}

/// Kill the child (and its process group on unix), then wait for it.
fn reap(child: &mut Child) -> Option<ExitStatus> {
    kill_group(child);
    let _ = child.kill();
    child.wait().ok()
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    // The leader is not reaped yet, so its pid still names the group.
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2"]);
        let out = run_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(!out.timed_out);
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(out.status.unwrap().success());
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let out = run_with_timeout(&mut cmd, Duration::from_millis(100)).unwrap();
        assert!(out.timed_out);
        assert!(out.elapsed < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_kills_forked_descendants() {
        // `sleep` runs as a grandchild that inherits the output pipes
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5; echo late"]);
        let out = run_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap();
        assert!(out.timed_out);
        assert!(out.elapsed < Duration::from_secs(3));
        assert!(!out.stdout.contains("late"));
    }

    #[test]
    fn test_background_descendant_does_not_block_return() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5 & echo ready"]);
        let started = Instant::now();
        let out = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(out.status.unwrap().success());
        assert_eq!(out.stdout.trim(), "ready");
    }

    #[test]
    fn test_missing_binary_is_not_found() {
        let mut cmd = Command::new("definitely-not-a-real-analyzer-binary");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
