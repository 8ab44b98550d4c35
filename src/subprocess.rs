//! Subprocess handle.
//!
//! Spawns via `tokio::process::Command` with `kill_on_drop(true)` as a
//! last-resort safety net. Stdio wiring is expressed as an enum over
//! `std::process::Stdio` construction (pipe, inherited stream, a file,
//! or null) rather than raw FDs.

use crate::logging::Logger;
use std::path::{Path, PathBuf};
use std::process::Stdio as StdStdio;
use tokio::process::{Child, Command};
use tokio::time::Duration;
use tracing::{info, warn, Instrument};

#[derive(Debug, Clone, Default)]
pub enum StdioTarget {
    #[default]
    Pipe,
    Inherit,
    Null,
    File(PathBuf),
    /// Only meaningful for `stderr`: fuses it into the same stream as
    /// stdout via `dup2` in the child, after fork and before exec.
    /// Requires `stdout` to be `Pipe`.
    StdoutAlias,
    /// An already-open file descriptor, handed to the child as-is.
    Fd(std::os::fd::RawFd),
}

impl StdioTarget {
    fn into_std(self) -> std::io::Result<StdStdio> {
        use std::os::fd::FromRawFd;
        Ok(match self {
            StdioTarget::Pipe => StdStdio::piped(),
            StdioTarget::Inherit => StdStdio::inherit(),
            StdioTarget::Null => StdStdio::null(),
            StdioTarget::File(path) => StdStdio::from(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            ),
            // Replaced by `dup2` in a `pre_exec` hook once the command is
            // assembled; the field itself just needs to not leave fd 2
            // pointing at something the dup2 has to race against.
            StdioTarget::StdoutAlias => StdStdio::null(),
            // SAFETY: caller-supplied fd, taken on the understanding that
            // ownership transfers to the child's `Stdio`.
            StdioTarget::Fd(fd) => unsafe { StdStdio::from_raw_fd(fd) },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StdioWiring {
    pub stdin: StdioTarget,
    pub stdout: StdioTarget,
    pub stderr: StdioTarget,
}

/// A spawned child process with piped stdin/stdout available for the
/// connection's transport, plus reap semantics (`poll`/`wait`) and a
/// `terminate → wait → kill` shutdown escalation.
pub struct SubprocessHandle {
    child: Child,
    logger: Logger,
}

impl SubprocessHandle {
    /// Spawns `program` directly (never via a shell) with `args` and
    /// `env` applied on top of the parent's environment, in
    /// `working_directory`, with the given stdio wiring.
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        working_directory: &Path,
        wiring: StdioWiring,
    ) -> std::io::Result<Self> {
        let stderr_alias = matches!(wiring.stderr, StdioTarget::StdoutAlias);
        if stderr_alias && !matches!(wiring.stdout, StdioTarget::Pipe) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "stderr = StdoutAlias requires stdout = Pipe",
            ));
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env)
            .current_dir(working_directory)
            .stdin(wiring.stdin.into_std()?)
            .stdout(wiring.stdout.into_std()?)
            .stderr(wiring.stderr.into_std()?)
            .kill_on_drop(true);

        #[cfg(unix)]
        if stderr_alias {
            use std::os::unix::process::CommandExt;
            // SAFETY: dup2 is async-signal-safe and the only thing this
            // hook does between fork and exec.
            unsafe {
                command.pre_exec(|| {
                    if libc::dup2(1, 2) == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        #[cfg(not(unix))]
        if stderr_alias {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stderr = StdoutAlias is only supported on unix",
            ));
        }

        let logger = Logger::default();
        let _entered = logger.enter();
        let child = command.spawn()?;
        info!(program, pid = child.id(), "spawned subprocess");
        drop(_entered);
        Ok(Self { child, logger })
    }

    pub fn stdin(&mut self) -> Option<tokio::process::ChildStdin> {
        self.child.stdin.take()
    }

    pub fn stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking reap: `Some(status)` if the child already exited.
    pub fn poll(&mut self) -> std::io::Result<Option<std::process::ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Waits up to `timeout` for natural exit, then escalates: `kill()`
    /// (SIGKILL-equivalent via `tokio::process::Child::kill`) followed by
    /// a final bounded wait. Never leaves the process running.
    pub async fn shutdown(&mut self, timeout: Duration) -> crate::error::Result<()> {
        let span = self.logger.span().clone();
        async {
            match tokio::time::timeout(timeout, self.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => {
                    warn!("subprocess did not exit within deadline, escalating to kill");
                    self.child.start_kill()?;
                    match tokio::time::timeout(Duration::from_secs(5), self.wait()).await {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) => Err(e.into()),
                        Err(_) => Err(crate::error::ClientError::SubprocessTerminationStuck),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Runs `body` with a mutable reference to this handle, guaranteeing
    /// the process is reaped (best-effort kill + wait) on the way out
    /// regardless of how `body` returns.
    pub async fn scoped<F, Fut, T>(mut self, body: F) -> T
    where
        F: FnOnce(&mut SubprocessHandle) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let result = body(&mut self).await;
        let _ = self.shutdown(Duration::from_secs(5)).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_reap_a_trivial_process() {
        let wiring = StdioWiring {
            stdin: StdioTarget::Null,
            stdout: StdioTarget::Null,
            stderr: StdioTarget::Null,
        };
        let mut handle = SubprocessHandle::spawn(
            "true",
            &[],
            &std::collections::HashMap::new(),
            Path::new("."),
            wiring,
        )
        .expect("spawning `true` should succeed on any POSIX system");
        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn stdout_alias_fuses_stderr_into_stdout() {
        let wiring = StdioWiring {
            stdin: StdioTarget::Null,
            stdout: StdioTarget::Pipe,
            stderr: StdioTarget::StdoutAlias,
        };
        let mut handle = SubprocessHandle::spawn(
            "sh",
            &["-c".to_string(), "echo out-line; echo err-line 1>&2".to_string()],
            &std::collections::HashMap::new(),
            Path::new("."),
            wiring,
        )
        .expect("spawning `sh` should succeed on any POSIX system");

        let mut stdout = handle.stdout().expect("piped stdout");
        let mut combined = String::new();
        use tokio::io::AsyncReadExt;
        stdout.read_to_string(&mut combined).await.unwrap();

        assert!(combined.contains("out-line"));
        assert!(combined.contains("err-line"));

        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }

    #[test]
    fn stdout_alias_requires_piped_stdout() {
        let wiring = StdioWiring {
            stdin: StdioTarget::Null,
            stdout: StdioTarget::Null,
            stderr: StdioTarget::StdoutAlias,
        };
        let err = SubprocessHandle::spawn(
            "true",
            &[],
            &std::collections::HashMap::new(),
            Path::new("."),
            wiring,
        )
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
