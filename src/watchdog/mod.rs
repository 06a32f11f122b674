//! Hard-timeout isolation for calls that may block forever inside the OS.
//!
//! A call runs in its own worker process (and process group on unix). The
//! worker answers with a single JSON [`WorkerReply`] line on stdout; the caller
//! waits for that line up to a deadline and kills the whole group when it
//! expires. A reply that arrives in time wins even if the worker then hangs. In-process cancellation is never attempted: a thread stuck in a
//! foreign, non-interruptible call cannot be stopped, a process can.
pub mod worker;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};

/// Command-line flag that puts the current binary into worker mode.
pub const WORKER_FLAG: &str = "--isolated-worker";

/// How long a worker that already replied may take to exit before it is killed.
const REAP_GRACE: Duration = Duration::from_millis(500);

/// Envelope written by a worker: `{"ok": value}` or `{"err": error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReply<T, E> {
    Ok(T),
    Err(E),
}

impl<T, E> From<Result<T, E>> for WorkerReply<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => WorkerReply::Ok(v),
            Err(e) => WorkerReply::Err(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchdogError<E> {
    #[error("isolated call '{call}' timed out after {timeout:?}; worker terminated")]
    Timeout { call: String, timeout: Duration },

    /// The worker ran to completion and reported its own error.
    #[error(transparent)]
    Call(E),

    #[error("failed to spawn worker for '{call}': {source}")]
    Spawn {
        call: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for '{call}' broke the reply protocol: {reason}")]
    Protocol { call: String, reason: String },
}

impl<E> WatchdogError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WatchdogError::Timeout { .. })
    }
}

/// How to start the worker process for one isolated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCall {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl WorkerCall {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-executes the running binary as `<exe> --isolated-worker <name>`.
    pub fn current_exe(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let exe = std::env::current_exe()?;
        Ok(Self::new(name.clone(), exe).arg(WORKER_FLAG).arg(name))
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn command(&self) -> Command {
        let mut std_cmd = std::process::Command::new(&self.program);
        std_cmd
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Circuit breaker around isolated calls. No retries, no fallback.
#[derive(Debug, Clone, Default)]
pub struct Watchdog;

impl Watchdog {
    pub fn new() -> Self {
        Self
    }

    /// Runs `call` in a fresh worker and waits at most `timeout` for its reply.
    pub async fn run_isolated<T, E>(
        &self,
        call: &WorkerCall,
        timeout: Duration,
    ) -> Result<T, WatchdogError<E>>
    where
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let mut child = call.command().spawn().map_err(|source| WatchdogError::Spawn {
            call: call.name.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(call = %call.name, pid = ?pid, timeout_ms = timeout.as_millis() as u64, "worker spawned");

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child).await;
            return Err(WatchdogError::Protocol {
                call: call.name.clone(),
                reason: "worker stdout not captured".into(),
            });
        };

        let mut lines = BufReader::new(stdout).lines();
        let received = tokio::time::timeout(timeout, read_reply::<T, E, _>(&mut lines)).await;
        drop(lines);

        let reply = match received {
            Ok(Ok(reply)) => reply,
            Ok(Err(reason)) => {
                let status = reap(&mut child, &call.name).await;
                let reason = match status {
                    Some(status) => format!("{reason} (exit status {status})"),
                    None => reason,
                };
                return Err(WatchdogError::Protocol {
                    call: call.name.clone(),
                    reason,
                });
            }
            Err(_) => {
                terminate(&mut child).await;
                tracing::warn!(call = %call.name, pid = ?pid, ?timeout, "worker timed out; terminated");
                return Err(WatchdogError::Timeout {
                    call: call.name.clone(),
                    timeout,
                });
            }
        };

        reap(&mut child, &call.name).await;
        match reply {
            WorkerReply::Ok(value) => Ok(value),
            WorkerReply::Err(err) => {
                tracing::debug!(call = %call.name, "worker reported an error");
                Err(WatchdogError::Call(err))
            }
        }
    }
}

/// Reads worker output until a line decodes as a reply. Other output is skipped.
async fn read_reply<T, E, R>(lines: &mut Lines<R>) -> Result<WorkerReply<T, E>, String>
where
    T: DeserializeOwned,
    E: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut last_error = None;
    loop {
        match lines.next_line().await {
            Ok(Some(raw)) => {
                let line = raw.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(reply) => return Ok(reply),
                    Err(e) => {
                        tracing::trace!(line, "skipping non-reply worker output");
                        last_error = Some(e);
                    }
                }
            }
            Ok(None) => {
                return Err(match last_error {
                    Some(e) => format!("malformed reply: {e}"),
                    None => "worker exited without a reply".to_string(),
                })
            }
            Err(e) => return Err(format!("reading worker reply: {e}")),
        }
    }
}

/// Gives a worker that is done talking a short grace period to exit, then kills it.
async fn reap(child: &mut Child, call: &str) -> Option<ExitStatus> {
    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::debug!(call, error = %e, "waiting for worker failed");
            terminate(child).await;
            None
        }
        Err(_) => {
            tracing::debug!(call, "worker lingered after its reply; terminated");
            terminate(child).await;
            None
        }
    }
}

/// Kills the worker's process group, then the worker itself, and reaps it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall; the group was created for this worker alone.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "worker already gone");
    }
}
