//! Sequential shell-command orchestration.
//!
//! A [`Runner`] executes a list of [`Step`]s strictly in order. Foreground
//! steps are awaited, followed by a short settle delay. Daemon steps are
//! launched, tracked in the runner's [`DaemonSet`], and given a longer settle
//! delay instead of being awaited. Readiness is assumed once that delay
//! elapses; a daemon that is slow to come up is not detected.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::daemon::DaemonSet;
use crate::error::{DbTestError, Result};
use crate::exit_guard::ExitGuard;

/// Cap on the output carried by [`DbTestError::StepFailed`].
const MAX_OUTPUT: usize = 10 * 1024;

// ─── Step ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Await exit; non-zero aborts the sequence.
    Foreground,
    /// Await exit; non-zero is logged and ignored.
    FailOk,
    /// Launch in the background and continue after the daemon settle delay.
    Daemon,
    /// Do nothing; keeps its position in the list.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub command: String,
    pub mode: StepMode,
}

impl Step {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: StepMode::Foreground,
        }
    }

    /// Tolerate a non-zero exit. Only affects foreground steps.
    pub fn fail_ok(mut self) -> Self {
        if self.mode == StepMode::Foreground {
            self.mode = StepMode::FailOk;
        }
        self
    }

    pub fn daemon(mut self) -> Self {
        if self.mode != StepMode::Skip {
            self.mode = StepMode::Daemon;
        }
        self
    }

    pub fn skip_if(mut self, skip: bool) -> Self {
        if skip {
            self.mode = StepMode::Skip;
        }
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.mode == StepMode::Skip
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────

pub struct Runner {
    step_settle: Duration,
    daemon_settle: Duration,
    daemons: DaemonSet,
}

impl Runner {
    pub fn new(step_settle: Duration, daemon_settle: Duration) -> Self {
        Self {
            step_settle,
            daemon_settle,
            daemons: DaemonSet::new(),
        }
    }

    pub fn daemons(&self) -> &DaemonSet {
        &self.daemons
    }

    /// Run `steps` in order, stopping at the first unrecoverable failure.
    pub async fn run(&self, steps: impl IntoIterator<Item = Step>) -> Result<()> {
        for (index, step) in steps.into_iter().enumerate() {
            match step.mode {
                StepMode::Skip => {
                    tracing::debug!(step = index, command = %step.command, "skipping step");
                }
                StepMode::Daemon => self.run_daemon(index, &step).await?,
                StepMode::Foreground | StepMode::FailOk => {
                    self.run_foreground(index, &step).await?
                }
            }
        }
        Ok(())
    }

    async fn run_foreground(&self, index: usize, step: &Step) -> Result<()> {
        tracing::debug!(step = index, command = %step.command, "running step");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&step.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DbTestError::Spawn {
                command: step.command.clone(),
                source,
            })?;

        let guard = ExitGuard::register(child.id(), &step.command);
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| DbTestError::Spawn {
                command: step.command.clone(),
                source,
            })?;
        drop(guard);

        let combined = format_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        );
        if !combined.is_empty() {
            tracing::debug!(step = index, output = %combined, "step output");
        }

        tokio::time::sleep(self.step_settle).await;

        if output.status.success() {
            return Ok(());
        }
        if step.mode == StepMode::FailOk {
            tracing::debug!(
                step = index,
                code = ?output.status.code(),
                command = %step.command,
                "step failed, continuing"
            );
            return Ok(());
        }
        Err(DbTestError::StepFailed {
            command: step.command.clone(),
            code: output.status.code(),
            output: combined,
        })
    }

    async fn run_daemon(&self, index: usize, step: &Step) -> Result<()> {
        let mut launch = self.daemons.spawn(&step.command)?;
        tracing::info!(step = index, pid = ?launch.pid, command = %step.command, "daemon launched");

        tokio::time::sleep(self.daemon_settle).await;

        match launch.try_exit_status() {
            None => Ok(()),
            Some(Ok(status)) if status.success() => {
                tracing::debug!(step = index, "daemon exited cleanly during settle delay");
                Ok(())
            }
            Some(Ok(status)) => Err(DbTestError::StepFailed {
                command: step.command.clone(),
                code: status.code(),
                output: launch.output(),
            }),
            Some(Err(source)) => Err(DbTestError::Spawn {
                command: step.command.clone(),
                source,
            }),
        }
    }
}

/// Combine stdout/stderr and cap to 10KB (keeping the tail).
fn format_output(stdout: &str, stderr: &str) -> String {
    let output = if stderr.is_empty() {
        stdout.to_string()
    } else if stdout.is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Quote `arg` for interpolation into a `sh -c` command line.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
