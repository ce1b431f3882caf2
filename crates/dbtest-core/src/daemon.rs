use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{DbTestError, Result};
use crate::exit_guard::{send_signal, ExitGuard};

/// Cap on retained daemon output (bytes, tail kept).
const MAX_CAPTURED_OUTPUT: usize = 10 * 1024;

// ─── DaemonSet ────────────────────────────────────────────────────────────

/// One tracked background process.
struct Tracked {
    pid: Option<u32>,
    command: String,
    control: mpsc::UnboundedSender<Signal>,
    watcher: Option<JoinHandle<()>>,
}

/// The set of daemon processes launched by a [`Runner`](crate::runner::Runner).
///
/// Each child is owned by a watcher task. The watcher removes the entry when
/// the child exits and is the only place signals are delivered, through
/// `Child::id()`, which returns `None` once the child is reaped. That keeps
/// us from ever signalling a pid that already exited.
#[derive(Default)]
pub struct DaemonSet {
    entries: Arc<Mutex<BTreeMap<u64, Tracked>>>,
    next_id: AtomicU64,
}

/// Returned by [`DaemonSet::spawn`]; reports an early exit of the daemon.
pub struct DaemonLaunch {
    pub id: u64,
    pub pid: Option<u32>,
    exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
    output: Arc<Mutex<String>>,
}

impl DaemonLaunch {
    /// The exit status if the daemon already terminated, `None` while running.
    pub fn try_exit_status(&mut self) -> Option<std::io::Result<ExitStatus>> {
        self.exit.try_recv().ok()
    }

    /// Output captured from the daemon so far (tail only).
    pub fn output(&self) -> String {
        self.output
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

impl DaemonSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, Tracked>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.lock().values().filter_map(|t| t.pid).collect()
    }

    /// Launch `command` through `sh -c` and track it until it exits.
    pub fn spawn(&self, command: &str) -> Result<DaemonLaunch> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DbTestError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let pid = child.id();
        let guard = ExitGuard::register(pid, command);

        let output = Arc::new(Mutex::new(String::new()));
        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, pid, "stdout", Arc::clone(&output));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, pid, "stderr", Arc::clone(&output));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (control, mut signals) = mpsc::unbounded_channel::<Signal>();
        let (exit_tx, exit_rx) = oneshot::channel();

        // Insert before the watcher exists so its removal can never run first.
        self.lock().insert(
            id,
            Tracked {
                pid,
                command: command.to_string(),
                control,
                watcher: None,
            },
        );

        let entries = Arc::clone(&self.entries);
        let command_owned = command.to_string();
        let watcher = tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(signal) = signals.recv() => {
                        if let Some(pid) = child.id() {
                            tracing::debug!(pid, signal = %signal, "signalling daemon");
                            if let Err(err) = send_signal(pid, signal) {
                                tracing::warn!(pid, signal = %signal, error = %err, "failed to signal daemon");
                            }
                        }
                    }
                }
            };
            drop(guard);

            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);

            match &status {
                Ok(s) => tracing::debug!(pid = ?pid, status = %s, command = %command_owned, "daemon exited"),
                Err(err) => tracing::warn!(pid = ?pid, error = %err, "failed waiting for daemon"),
            }
            let _ = exit_tx.send(status);
        });

        if let Some(tracked) = self.lock().get_mut(&id) {
            tracked.watcher = Some(watcher);
        }

        Ok(DaemonLaunch {
            id,
            pid,
            exit: exit_rx,
            output,
        })
    }

    /// Signal every tracked daemon with SIGTERM and clear the set.
    ///
    /// Daemons still running after `grace` get SIGKILL. Returns the number of
    /// daemons that were tracked when the sweep began.
    pub async fn terminate_all(&self, grace: Duration) -> usize {
        let drained: Vec<Tracked> = std::mem::take(&mut *self.lock()).into_values().collect();
        let count = drained.len();

        for tracked in &drained {
            tracing::debug!(pid = ?tracked.pid, command = %tracked.command, "Sending SIGTERM to daemon");
            let _ = tracked.control.send(Signal::SIGTERM);
        }

        for tracked in drained {
            let Some(mut watcher) = tracked.watcher else {
                continue;
            };
            if tokio::time::timeout(grace, &mut watcher).await.is_err() {
                tracing::warn!(pid = ?tracked.pid, "daemon ignored SIGTERM, sending SIGKILL");
                let _ = tracked.control.send(Signal::SIGKILL);
                if tokio::time::timeout(grace, &mut watcher).await.is_err() {
                    watcher.abort();
                }
            }
        }

        count
    }
}

/// Forward each output line to tracing and keep a bounded tail for errors.
///
/// Reads until EOF whatever the bytes are; closing the pipe early would hand
/// the daemon a SIGPIPE on its next write.
fn forward_output<R>(reader: R, pid: Option<u32>, stream: &'static str, buf: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(pid = ?pid, stream, error = %err, "daemon output read failed");
                    break;
                }
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            tracing::debug!(pid = ?pid, stream, "{line}");
            if let Ok(mut b) = buf.lock() {
                if !b.is_empty() {
                    b.push('\n');
                }
                b.push_str(line);
                if b.len() > MAX_CAPTURED_OUTPUT {
                    let mut cut = b.len() - MAX_CAPTURED_OUTPUT;
                    while !b.is_char_boundary(cut) {
                        cut += 1;
                    }
                    b.drain(..cut);
                }
            }
        }
    });
}
