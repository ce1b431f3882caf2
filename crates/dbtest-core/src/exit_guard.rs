//! Process-wide registry of child processes that must not outlive the host.
//!
//! Every spawned step holds an [`ExitGuard`] while it runs. If the host is
//! shutting down (Ctrl-C, SIGTERM, or a normal exit from the CLI), calling
//! [`terminate_registered`] sends SIGTERM to everything still registered.
//! Dropping the guard, which happens once the child's own lifecycle is over,
//! removes it from the registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

struct Registered {
    pid: u32,
    command: String,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, Registered>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Registered>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registration of one live child in the host's shutdown sequence.
#[derive(Debug)]
pub struct ExitGuard {
    id: u64,
}

impl ExitGuard {
    /// Register `pid`. A child that already exited (`None`) gets an inert guard.
    pub fn register(pid: Option<u32>, command: &str) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        if let Some(pid) = pid {
            if let Ok(mut map) = registry().lock() {
                map.insert(
                    id,
                    Registered {
                        pid,
                        command: command.to_string(),
                    },
                );
            }
        }
        Self { id }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = registry().lock() {
            map.remove(&self.id);
        }
    }
}

/// Pids currently registered for cleanup.
pub fn registered_pids() -> Vec<u32> {
    registry()
        .lock()
        .map(|map| map.values().map(|r| r.pid).collect())
        .unwrap_or_default()
}

/// Send SIGTERM to every registered child. Returns how many were signalled.
pub fn terminate_registered() -> usize {
    let targets: Vec<(u32, String)> = match registry().lock() {
        Ok(map) => map.values().map(|r| (r.pid, r.command.clone())).collect(),
        Err(_) => return 0,
    };

    let mut signalled = 0;
    for (pid, command) in targets {
        tracing::debug!(pid, command = %command, "terminating child on host exit");
        match send_signal(pid, Signal::SIGTERM) {
            Ok(()) => signalled += 1,
            Err(err) => tracing::warn!(pid, error = %err, "failed to signal child"),
        }
    }
    signalled
}

/// Drive `work` until it finishes or `shutdown` resolves.
///
/// On shutdown the registered children are sent SIGTERM while `work` still
/// owns them, and `work` keeps running for up to `grace` so they can exit
/// cleanly. Whatever is left is killed when `work` is dropped.
pub async fn run_until_shutdown<W, S>(
    work: W,
    shutdown: S,
    grace: Duration,
) -> std::result::Result<W::Output, S::Output>
where
    W: Future,
    S: Future,
{
    tokio::pin!(work);
    let reason = tokio::select! {
        out = &mut work => return Ok(out),
        reason = shutdown => reason,
    };

    let signalled = terminate_registered();
    tracing::info!(signalled, "shutdown requested, terminating children");
    if tokio::time::timeout(grace, &mut work).await.is_err() {
        tracing::warn!("children still running after grace period");
    }
    Err(reason)
}

/// Send `signal` to `pid`.
pub fn send_signal(pid: u32, signal: Signal) -> nix::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
    nix::sys::signal::kill(Pid::from_raw(raw), signal)
}

/// True while a process with `pid` exists (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match nix::sys::signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // exists but owned by someone else
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_registers_until_dropped() {
        let guard = ExitGuard::register(Some(999_999_001), "sleep 60");
        assert!(registered_pids().contains(&999_999_001));
        drop(guard);
        assert!(!registered_pids().contains(&999_999_001));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[tokio::test]
    async fn send_signal_terminates_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let _guard = ExitGuard::register(Some(pid), "sleep 30");
        assert!(pid_alive(pid));

        send_signal(pid, Signal::SIGTERM).unwrap();

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after SIGTERM")
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn signalling_missing_pid_fails() {
        assert!(send_signal(999_999_002, Signal::SIGTERM).is_err());
        assert!(!pid_alive(999_999_002));
    }
}
