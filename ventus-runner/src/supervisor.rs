//! External process supervision
//!
//! Launches one external tool per call, appends its combined stdout/stderr to
//! a log file and waits for it on the caller's task without blocking the
//! runtime. Every child runs in its own process group so that cancellation
//! and timeouts reach any helpers it forks (e.g. MPI launchers).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Program and arguments of one external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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
}

impl std::fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited on its own with this code
    Exited(i32),
    /// Process was killed by a signal nobody here sent
    Signalled,
    /// Stopped because the job was cancelled; the process is gone
    Cancelled,
    /// Stopped because the deadline passed; the process is gone
    TimedOut,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => ExitOutcome::Exited(code),
            None => ExitOutcome::Signalled,
        }
    }
}

/// Failures launching or waiting on an external process
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to open log {}: {source}", path.display())]
    LogSink {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

/// Runs external processes to completion, cancellation or deadline
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    poll_interval: Duration,
    termination_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(poll_interval: Duration, termination_grace: Duration) -> Self {
        Self {
            poll_interval,
            termination_grace,
        }
    }

    /// Runs `command` in `cwd`, appending its output to `log_path`
    ///
    /// `on_poll` is awaited every poll interval with the time since launch
    /// while the process is alive. If `cancel` fires or `deadline` passes the
    /// process group is terminated and the call returns only after the child
    /// has been reaped.
    pub async fn run<F, Fut>(
        &self,
        command: &ExternalCommand,
        cwd: &Path,
        log_path: &Path,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        mut on_poll: F,
    ) -> Result<ExitOutcome, ExecutionError>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = ()>,
    {
        let log_err = |source| ExecutionError::LogSink {
            path: log_path.to_path_buf(),
            source,
        };
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(log_err)?;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        info!(
            "Started `{}` (pid {:?}) in {}",
            command,
            child.id(),
            cwd.display()
        );

        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;

                status = child.wait() => {
                    let status = status.map_err(|source| ExecutionError::Wait {
                        program: command.program.clone(),
                        source,
                    })?;
                    let outcome = ExitOutcome::from_status(status);
                    debug!("`{}` finished after {:?}: {:?}", command.program, started.elapsed(), outcome);
                    return Ok(outcome);
                }
                _ = cancel.cancelled() => {
                    info!("Cancelling `{}`", command.program);
                    self.terminate(&mut child, &command.program).await;
                    return Ok(ExitOutcome::Cancelled);
                }
                _ = &mut expired => {
                    warn!("`{}` exceeded its deadline, terminating", command.program);
                    self.terminate(&mut child, &command.program).await;
                    return Ok(ExitOutcome::TimedOut);
                }
                _ = ticker.tick() => on_poll(started.elapsed()).await,
            }
        }
    }

    /// SIGTERM to the group, then SIGKILL once the grace period runs out
    async fn terminate(&self, child: &mut Child, program: &str) {
        if let Some(pid) = child.id() {
            signal_group(pid, Signal::Terminate);

            match tokio::time::timeout(self.termination_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("`{}` exited after SIGTERM: {}", program, status);
                    // Stragglers in the group that ignored SIGTERM
                    signal_group(pid, Signal::Kill);
                    return;
                }
                Ok(Err(e)) => warn!("Failed to wait for `{}`: {}", program, e),
                Err(_) => warn!(
                    "`{}` still running {:?} after SIGTERM, killing",
                    program, self.termination_grace
                ),
            }

            signal_group(pid, Signal::Kill);
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill `{}`: {}", program, e);
        }
    }
}

enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    let signal = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // The child was spawned as leader of its own group, so pgid == pid.
    // ESRCH just means the group is already gone.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: Signal) {}
