#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    time::timeout,
};

/// Most bytes kept from each of stdout and stderr; the rest is drained and
/// discarded.
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// Kills every process in the group led by `pgid`.
///
/// The id is the one recorded at spawn, so this still reaches descendants
/// after the leader itself has been reaped.
fn kill_group(pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        // SAFETY: killpg has no memory-safety preconditions.
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Drop guard that terminates a spawned process tree if it is not awaited to
/// completion, including when a deadline cancels the wait.
struct ChildDropGuard {
    /// The group leader, until it is reaped.
    child: Option<Child>,
    /// Process group id recorded at spawn.
    pgid:  Option<u32>,
}

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        let pgid = child.id();
        Self {
            child: Some(child),
            pgid,
        }
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> anyhow::Result<&mut Child> {
        self.child
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Kills whatever is left of the group once the leader has been reaped,
    /// leaving nothing for the drop to do.
    fn reap_group(&mut self) {
        kill_group(self.pgid.take());
        self.child = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        kill_group(self.pgid);
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Reads `reader` to the end, keeping at most `limit` bytes.
async fn read_capped<R>(reader: R, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: std::process::ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

impl Collected {
    /// Lossy UTF-8 view of stdout.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Lossy UTF-8 view of stderr.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// How a bounded subprocess ended.
#[derive(Debug)]
pub enum Completion {
    /// The process exited on its own.
    Finished(Collected),
    /// The deadline passed; the process tree was killed.
    TimedOut(Duration),
}

/// Describes how stdin should be wired for the spawned process.
#[derive(Debug)]
pub enum StdinSource {
    /// Inherit the parent's stdin.
    Inherit,
    /// Attach nothing to stdin.
    Null,
    /// Write the provided bytes, then close stdin.
    Bytes(Vec<u8>),
}

impl From<Option<&str>> for StdinSource {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(text) => StdinSource::Bytes(text.as_bytes().to_vec()),
            None => StdinSource::Null,
        }
    }
}

/// A fully resolved command line.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Executable to launch.
    pub program: OsString,
    /// Arguments passed to the executable.
    pub args:    Vec<OsString>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args:    Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Renders the command for log output.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawns a command, optionally feeds stdin, and collects stdout/stderr.
///
/// With a `deadline`, a process that outlives it is killed along with its
/// descendants and `Completion::TimedOut` is returned. Descendants left behind
/// by a leader that exited on its own are killed as well. Each stream keeps at
/// most [`MAX_CAPTURE_BYTES`].
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    stdin: StdinSource,
    cwd: Option<&Path>,
    env: &[(OsString, OsString)],
    deadline: Option<Duration>,
) -> Result<Completion> {
    let mut cmd = Command::new(program.as_ref());
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    match &stdin {
        StdinSource::Inherit => {
            cmd.stdin(Stdio::inherit());
        }
        StdinSource::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
    }

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut guard = ChildDropGuard::new(cmd.spawn().with_context(|| {
        format!("failed to spawn process `{}`", program.as_ref().to_string_lossy())
    })?);
    let stdin_payload = match stdin {
        StdinSource::Bytes(bytes) => Some(bytes),
        StdinSource::Inherit | StdinSource::Null => None,
    };

    if let Some(bytes) = stdin_payload
        && let Some(mut handle) = guard.child_mut()?.stdin.take()
    {
        tokio::spawn(async move {
            if !bytes.is_empty() {
                let _ = handle.write_all(&bytes).await;
            }
            let _ = handle.shutdown().await;
        });
    }

    let stdout = guard
        .child_mut()?
        .stdout
        .take()
        .context("missing stdout pipe")?;
    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .context("missing stderr pipe")?;

    let out_task = tokio::spawn(async move {
        read_capped(stdout, MAX_CAPTURE_BYTES)
            .await
            .context("failed to read stdout")
    });

    let err_task = tokio::spawn(async move {
        read_capped(stderr, MAX_CAPTURE_BYTES)
            .await
            .context("failed to read stderr")
    });

    let wait_future = async move {
        let mut guard = guard;
        let status = guard
            .child_mut()?
            .wait()
            .await
            .context("failed to wait on process")?;
        // Descendants still holding the pipes open would keep the readers
        // from reaching EOF.
        guard.reap_group();
        let stdout = out_task.await.context("stdout task join error")??;
        let stderr = err_task.await.context("stderr task join error")??;
        Ok(Collected {
            status,
            stdout,
            stderr,
        })
    };

    match deadline {
        Some(limit) => match timeout(limit, wait_future).await {
            Ok(collected) => collected.map(Completion::Finished),
            Err(_) => Ok(Completion::TimedOut(limit)),
        },
        None => wait_future.await.map(Completion::Finished),
    }
}
