use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use burnoff_core::format_secs;

/// Exit code reported when the child was killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code reported when the child could not be started at all.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -2;
/// Exit code reported when the child was terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -3;
/// Exit code reported when the child started but waiting on it failed.
pub const WAIT_FAILED_EXIT_CODE: i32 = -4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Raw outcome of one external-process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// stdout followed by stderr, for backends that print metrics to either stream.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }

    /// Last non-empty stderr line, falling back to stdout.
    pub fn error_summary(&self) -> String {
        last_line(&self.stderr)
            .or_else(|| last_line(&self.stdout))
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }

    fn timeout(timeout: Duration, elapsed: Duration) -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("timed out after {}", format_secs(timeout)),
            elapsed,
        }
    }

    fn wait_failed(spec: &CommandSpec, error: &std::io::Error, elapsed: Duration) -> Self {
        Self::failed(
            WAIT_FAILED_EXIT_CODE,
            format!("failed to wait for {}: {}", spec.program.display(), error),
            elapsed,
        )
    }

    fn failed(exit_code: i32, message: String, elapsed: Duration) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: message,
            elapsed,
        }
    }
}

fn last_line(s: &str) -> Option<String> {
    s.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Seam between subprocess adapters and the operating system.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion or until `timeout`. Never fails; problems are encoded in the result.
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> CommandResult;
}

/// How long output pipes may stay open after the child exits before the
/// descendants still holding them are killed.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs commands as real child processes via `tokio::process`.
///
/// Each child leads its own process group, and the whole group is killed on
/// timeout, on wait failure, when the call is dropped, and once the call
/// returns. Nothing the child forked outlives the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> CommandResult {
        let start = Instant::now();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        debug!("Spawning: {}", spec);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn {}: {}", spec.program.display(), e);
                return CommandResult::failed(
                    SPAWN_FAILED_EXIT_CODE,
                    format!("failed to spawn {}: {}", spec.program.display(), e),
                    start.elapsed(),
                );
            }
        };
        let group = ProcessGroup::of(&child);

        // Both pipes are drained concurrently so neither can fill up and stall the child.
        let stop_reading = CancellationToken::new();
        let stdout = tokio::spawn(read_pipe(child.stdout.take(), stop_reading.clone()));
        let stderr = tokio::spawn(read_pipe(child.stderr.take(), stop_reading.clone()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Failed to wait for {}: {}", spec.program.display(), e);
                group.kill();
                terminate(&mut child, spec).await;
                stop_reading.cancel();
                return CommandResult::wait_failed(spec, &e, start.elapsed());
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}, killing",
                    spec.program.display(),
                    format_secs(timeout)
                );
                group.kill();
                terminate(&mut child, spec).await;
                stop_reading.cancel();
                return CommandResult::timeout(timeout, start.elapsed());
            }
        };

        let exit_code = status.code().unwrap_or(SIGNAL_EXIT_CODE);
        debug!(
            "{} exited with {} after {:.0}ms",
            spec.program.display(),
            exit_code,
            start.elapsed().as_secs_f64() * 1000.0
        );

        let (out, err) = collect_output(stdout, stderr, &group, &stop_reading).await;
        CommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            elapsed: start.elapsed(),
        }
    }
}

/// The child's process group. Dropping it kills every remaining member.
struct ProcessGroup(Option<i32>);

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self(child.id().and_then(|pid| i32::try_from(pid).ok()))
    }

    fn kill(&self) {
        #[cfg(unix)]
        {
            let Some(pgid) = self.0 else {
                return;
            };
            // SAFETY: killpg only signals; pgid is the group this call's child leads.
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    warn!("Failed to kill process group {}: {}", pgid, err);
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill and reap, so no zombie or orphan outlives the call.
async fn terminate(child: &mut tokio::process::Child, spec: &CommandSpec) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", spec.program.display(), e);
    }
}

/// Wait for both readers after the child exited. A background descendant can
/// keep a pipe open indefinitely, so after a grace period the group is killed
/// and, failing that, reading stops with whatever arrived.
async fn collect_output(
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    group: &ProcessGroup,
    stop_reading: &CancellationToken,
) -> (Vec<u8>, Vec<u8>) {
    let readers = async { tokio::join!(stdout, stderr) };
    tokio::pin!(readers);

    if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut readers).await.is_err() {
        debug!("Output pipes still open after exit, killing process group");
        group.kill();
        if tokio::time::timeout(PIPE_DRAIN_GRACE, &mut readers).await.is_err() {
            warn!("Output pipes held open by a process outside the group, giving up on them");
            stop_reading.cancel();
        }
    }

    let (out, err) = readers.await;
    (out.unwrap_or_default(), err.unwrap_or_default())
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, stop: CancellationToken) -> Vec<u8> {
    let mut buf = Vec::new();
    let Some(mut pipe) = pipe else {
        return buf;
    };

    let mut chunk = [0u8; 8192];
    loop {
        let read = tokio::select! {
            _ = stop.cancelled() => break,
            read = pipe.read(&mut chunk) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                debug!("Pipe read ended early: {}", e);
                break;
            }
        }
    }
    buf
}

/// `which`-style lookup. Names containing a path separator are checked directly.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let direct = Path::new(name);
    if direct.components().count() > 1 || direct.is_absolute() {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
