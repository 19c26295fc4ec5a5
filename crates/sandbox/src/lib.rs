//! Sandbox Executor (C4): materializes a subprocess with enforced resource
//! limits and returns its exit code plus captured output. This is the
//! security-critical surface graders call into — it knows nothing about test
//! kinds, scoring, or reporters.

pub mod error;
pub mod hardening;

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub use error::{SandboxError, SandboxResult};

/// Resource limits applied to a single run, mirroring `T_wall`, `T_cpu`,
/// `M`, `P`, `F` from the execution contract.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Wall-clock timeout. Exceeding it kills the process group and sets
    /// `timed_out` on the outcome.
    pub wall_timeout: Duration,
    /// CPU-time limit in seconds, enforced via `RLIMIT_CPU`.
    pub cpu_seconds: u64,
    /// Address-space limit in bytes, enforced via `RLIMIT_AS`.
    pub mem_bytes: u64,
    /// Max number of processes/threads the run's user may hold, enforced
    /// via `RLIMIT_NPROC`.
    pub max_procs: u64,
    /// Max open file descriptors, enforced via `RLIMIT_NOFILE`.
    pub max_fds: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            wall_timeout: Duration::from_secs(10),
            cpu_seconds: 10,
            mem_bytes: 256 * 1024 * 1024,
            max_procs: 32,
            max_fds: 64,
        }
    }
}

/// A single sandboxed execution request.
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: Option<Vec<u8>>,
    pub limits: Limits,
    /// Maximum bytes captured per stream before truncation.
    pub capture_bytes: usize,
    /// When set and cancelled, the child's process group is killed
    /// immediately (§5 cancellation contract) instead of waiting on it.
    pub cancel: Option<CancellationToken>,
}

/// Outcome of a sandboxed execution. `retcode` is `124` when `timed_out` is
/// set, matching the conventional shell timeout sentinel.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub retcode: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub killed_by_limit: bool,
    /// Set when the run was terminated by an external cancellation (Run
    /// deletion) rather than by its own timeout or exit.
    pub cancelled: bool,
}

const GRACE_PERIOD: Duration = Duration::from_millis(500);
const TIMEOUT_RETCODE: i32 = 124;

/// Runs `req.argv[0]` with the remaining entries as arguments, inside
/// `req.cwd`, applying `req.limits` via a `pre_exec` hook between `fork` and
/// `exec`. The child is placed in its own process group so the whole tree —
/// not just the direct child — is killed on timeout.
pub async fn execute(req: ExecRequest) -> SandboxResult<ExecOutcome> {
    let (program, args) = req
        .argv
        .split_first()
        .ok_or_else(|| SandboxError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty argv",
        )))?;

    let run_root = req.cwd.to_string_lossy().to_string();
    let limits = req.limits;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&req.cwd)
        .env_clear()
        .env("PATH", "/usr/bin:/bin")
        .env("HOME", &run_root)
        .env("LANG", "C.UTF-8")
        .stdin(if req.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // SAFETY: pre_exec runs in the forked child between fork and exec; only
    // async-signal-safe calls are made (setrlimit, setsid, the hardening
    // hook's prctl/seccomp/sandbox_init paths).
    unsafe {
        command.pre_exec(move || {
            apply_rlimits(&limits)?;
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            hardening::apply_to_child(&run_root)?;
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(SandboxError::SpawnFailed)?;
    let pid = child.id().ok_or_else(|| {
        SandboxError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::Other,
            "child exited before pid could be read",
        ))
    })? as i32;

    if let Some(input) = req.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            // A grader that never reads stdin must not hang the run; ignore
            // write errors (broken pipe) since the child may already be done.
            let _ = stdin.write_all(&input).await;
        }
    }

    let mut stdout_handle = child.stdout.take();
    let mut stderr_handle = child.stderr.take();

    let run = async {
        let stdout_task = async {
            let mut buf = Vec::new();
            if let Some(h) = stdout_handle.as_mut() {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        };
        let stderr_task = async {
            let mut buf = Vec::new();
            if let Some(h) = stderr_handle.as_mut() {
                let _ = h.read_to_end(&mut buf).await;
            }
            buf
        };
        let (stdout_bytes, stderr_bytes) = tokio::join!(stdout_task, stderr_task);
        let status = child.wait().await;
        (status, stdout_bytes, stderr_bytes)
    };

    let cancel = req.cancel.clone();

    tokio::select! {
        result = run => {
            let (status, stdout_bytes, stderr_bytes) = result;
            let status = status?;
            let retcode = exit_code(status);
            Ok(ExecOutcome {
                retcode,
                stdout: truncate_utf8(&stdout_bytes, req.capture_bytes),
                stderr: truncate_utf8(&stderr_bytes, req.capture_bytes),
                timed_out: false,
                killed_by_limit: status.signal() == Some(libc::SIGKILL)
                    || status.signal() == Some(libc::SIGXCPU),
                cancelled: false,
            })
        }
        _ = tokio::time::sleep(req.limits.wall_timeout) => {
            kill_process_group(pid).await;
            Ok(ExecOutcome {
                retcode: TIMEOUT_RETCODE,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
                killed_by_limit: false,
                cancelled: false,
            })
        }
        _ = wait_for_cancel(&cancel) => {
            kill_process_group(pid).await;
            Ok(ExecOutcome {
                retcode: TIMEOUT_RETCODE,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                killed_by_limit: false,
                cancelled: true,
            })
        }
    }
}

/// Resolves when `cancel` fires, or never if there is no token — letting a
/// caller without a cancellation contract `select!` against this branch for
/// free.
async fn wait_for_cancel(cancel: &Option<CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Sends `SIGTERM` to the process group, waits a grace period, then
/// escalates to `SIGKILL`. Best-effort: a process that already exited
/// produces `ESRCH`, which is not an error worth surfacing.
async fn kill_process_group(pid: i32) {
    // SAFETY: kill(2) with a negative pid targets the process group; pid is
    // the session leader set via setsid() in pre_exec, so -pid is valid.
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
    tokio::time::sleep(GRACE_PERIOD).await;
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

fn apply_rlimits(limits: &Limits) -> std::io::Result<()> {
    set_rlimit(libc::RLIMIT_CPU, limits.cpu_seconds)?;
    set_rlimit(libc::RLIMIT_AS, limits.mem_bytes)?;
    set_rlimit(libc::RLIMIT_NPROC, limits.max_procs)?;
    set_rlimit(libc::RLIMIT_NOFILE, limits.max_fds)?;
    Ok(())
}

fn set_rlimit(resource: libc::c_int, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    // SAFETY: setrlimit is async-signal-safe; `limit` is a valid, live value.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Truncates `bytes` to at most `max` bytes, then lossily decodes as UTF-8
/// so a multi-byte sequence split at the boundary never produces a panic or
/// replacement-character garbage mid-stream.
fn truncate_utf8(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = max;
    while end > 0 && !bytes.is_char_boundary(end) {
        end -= 1;
    }
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(argv: &[&str]) -> ExecRequest {
        ExecRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: std::env::temp_dir(),
            stdin: None,
            limits: Limits::default(),
            capture_bytes: 4096,
            cancel: None,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = execute(req(&["/bin/echo", "hello"])).await.unwrap();
        assert_eq!(outcome.retcode, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_propagates() {
        let outcome = execute(req(&["/bin/sh", "-c", "exit 7"])).await.unwrap();
        assert_eq!(outcome.retcode, 7);
    }

    #[tokio::test]
    async fn wall_clock_timeout_is_flagged() {
        let mut r = req(&["/bin/sleep", "5"]);
        r.limits.wall_timeout = Duration::from_millis(200);
        let outcome = execute(r).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.retcode, TIMEOUT_RETCODE);
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let mut r = req(&["/bin/cat"]);
        r.stdin = Some(b"piped input\n".to_vec());
        let outcome = execute(r).await.unwrap();
        assert_eq!(outcome.stdout, "piped input\n");
    }

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        let bytes = "héllo".as_bytes(); // 'é' is two bytes
        let truncated = truncate_utf8(bytes, 2);
        assert!(truncated == "h" || truncated.len() < 2);
    }

    #[tokio::test]
    async fn cancellation_kills_the_process_before_it_finishes() {
        let mut r = req(&["/bin/sleep", "5"]);
        let token = CancellationToken::new();
        r.cancel = Some(token.clone());
        r.limits.wall_timeout = Duration::from_secs(30);
        let handle = tokio::spawn(execute(r));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.timed_out);
    }
}
