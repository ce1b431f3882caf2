//! Throwaway local `mysqld` instances.
//!
//! `start` wipes the instance directory, initializes a data directory,
//! launches `mysqld` as a daemon bound to a private socket, loads timezone
//! tables and optionally applies a SQL file. `kill` optionally applies a SQL
//! file, asks the server to shut down, signals the pid recorded in the pid
//! file and finally sweeps every daemon this instance launched.
//!
//! # Binaries
//!
//! | Binary                | Role                                  |
//! |-----------------------|---------------------------------------|
//! | `mysql_install_db`    | Initialize the data directory         |
//! | `mysqld`              | Run the server (daemon step)          |
//! | `mysql_tzinfo_to_sql` | Convert the zoneinfo tree to SQL      |
//! | `mysql`               | Load timezone data and user SQL files |
//! | `mysqladmin`          | Graceful shutdown on teardown         |

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::config::LocalOptions;
use crate::error::{DbTestError, Result};
use crate::exit_guard::{pid_alive, send_signal};
use crate::paths;
use crate::runner::{shell_quote, Runner, Step};

const PID_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct LocalMySql {
    options: LocalOptions,
    runner: Runner,
}

fn q(path: &Path) -> String {
    shell_quote(&path.display().to_string())
}

impl LocalMySql {
    pub fn new(options: LocalOptions) -> Self {
        let runner = Runner::new(options.step_settle_delay(), options.daemon_settle_delay());
        Self { options, runner }
    }

    pub fn options(&self) -> &LocalOptions {
        &self.options
    }

    pub fn socket_path(&self) -> &Path {
        &self.options.mysql_socket
    }

    pub fn pid_file(&self) -> PathBuf {
        paths::pid_file(&self.options.mysql_data_dir)
    }

    /// Daemons launched by this instance that have not exited yet.
    pub fn daemon_count(&self) -> usize {
        self.runner.daemons().len()
    }

    fn data_subdir(&self, name: &str) -> PathBuf {
        self.options.mysql_data_dir.join(name)
    }

    /// Binaries `start` needs on `PATH`.
    pub fn required_binaries(&self) -> Vec<&str> {
        vec![
            self.options.mysql_install_db.as_str(),
            self.options.mysqld.as_str(),
            self.options.mysql_tzinfo_to_sql.as_str(),
            self.options.mysql.as_str(),
        ]
    }

    /// InnoDB home flags; install and server must agree on them.
    fn innodb_flags(&self) -> [String; 2] {
        let innodb = q(&self.data_subdir(paths::INNODB_DIR));
        [
            format!("--innodb-data-home-dir={innodb}"),
            format!("--innodb-log-group-home-dir={innodb}"),
        ]
    }

    /// Server flags derived from the options.
    pub fn mysqld_flags(&self) -> Vec<String> {
        let o = &self.options;
        let [data_home, log_home] = self.innodb_flags();
        let mut flags = vec![
            format!("--datadir={}", q(&self.data_subdir(paths::DATA_DIR))),
            format!("--tmpdir={}", q(&self.data_subdir(paths::TMP_DIR))),
            format!(
                "--slave-load-tmpdir={}",
                q(&self.data_subdir(paths::SLAVE_TMP_DIR))
            ),
            format!(
                "--secure-file-priv={}",
                q(&self.data_subdir(paths::SECURE_FILE_PRIV_DIR))
            ),
            data_home,
            log_home,
            format!("--port={}", o.mysql_local_port),
            format!("--bind-address={}", shell_quote(&o.mysql_host)),
            format!("--socket={}", q(&o.mysql_socket)),
            format!("--pid-file={}", q(&self.pid_file())),
            format!("--user={}", shell_quote(&o.system_user)),
        ];
        let extra = o.effective_mysqld_args();
        if !extra.is_empty() {
            flags.push(extra);
        }
        flags
    }

    fn client(&self) -> String {
        let mut cmd = format!(
            "{} --socket={}",
            self.options.mysql,
            q(&self.options.mysql_socket)
        );
        let user = self.options.client_user_args();
        if !user.is_empty() {
            cmd.push(' ');
            cmd.push_str(user);
        }
        cmd
    }

    fn user_sql_step(&self, sql_file: Option<&Path>) -> Step {
        let out = q(&paths::sql_output_file(&self.options.mysql_data_dir));
        match sql_file {
            Some(file) => Step::shell(format!("{} < {} >> {out} 2>&1", self.client(), q(file))),
            None => Step::shell(String::new()).skip_if(true),
        }
    }

    /// The command sequence `start` runs.
    pub fn start_steps(&self, sql_file: Option<&Path>) -> Vec<Step> {
        let o = &self.options;
        let out = q(&paths::sql_output_file(&o.mysql_data_dir));
        vec![
            Step::shell(format!(
                "{} --datadir={} --basedir={} --user={} {} >> {out} 2>&1",
                o.mysql_install_db,
                q(&self.data_subdir(paths::DATA_DIR)),
                q(&o.mysql_base_dir),
                shell_quote(&o.system_user),
                self.innodb_flags().join(" "),
            )),
            Step::shell(format!("{} {}", o.mysqld, self.mysqld_flags().join(" "))).daemon(),
            Step::shell(format!(
                "{} {} | {} mysql",
                o.mysql_tzinfo_to_sql,
                q(&o.zoneinfo_dir),
                self.client(),
            )),
            self.user_sql_step(sql_file),
        ]
    }

    /// The command sequence `kill` runs before signalling.
    pub fn kill_steps(&self, sql_file: Option<&Path>) -> Vec<Step> {
        let o = &self.options;
        let mut admin = format!("{} --socket={}", o.mysqladmin, q(&o.mysql_socket));
        let user = o.client_user_args();
        if !user.is_empty() {
            admin.push(' ');
            admin.push_str(user);
        }
        admin.push_str(" shutdown");

        vec![self.user_sql_step(sql_file), Step::shell(admin).fail_ok()]
    }

    /// Start a fresh instance. On success the socket is expected to accept
    /// connections; readiness is approximated by the daemon settle delay.
    pub async fn start(&self, sql_file: Option<&Path>) -> Result<()> {
        tracing::info!(
            data_dir = %self.options.mysql_data_dir.display(),
            socket = %self.options.mysql_socket.display(),
            port = self.options.mysql_local_port,
            "Starting local MySQL instance"
        );

        for binary in self.required_binaries() {
            which::which(binary).map_err(|_| DbTestError::BinaryNotFound(binary.to_string()))?;
        }

        self.reset_data_dir().await?;
        self.runner.run(self.start_steps(sql_file)).await
    }

    /// Stop the instance. The final daemon sweep runs even when an earlier
    /// step failed; the first failure is returned.
    pub async fn kill(&self, sql_file: Option<&Path>) -> Result<()> {
        tracing::info!(
            socket = %self.options.mysql_socket.display(),
            "Stopping local MySQL instance"
        );

        let result = async {
            self.runner.run(self.kill_steps(sql_file)).await?;
            self.signal_pid_file().await
        }
        .await;

        let swept = self
            .runner
            .daemons()
            .terminate_all(self.options.shutdown_timeout())
            .await;
        tracing::debug!(swept, "daemon sweep complete");

        result
    }

    async fn reset_data_dir(&self) -> Result<()> {
        let root = &self.options.mysql_data_dir;
        tracing::debug!(dir = %root.display(), "rm -rf");
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        for dir in paths::instance_dirs(root) {
            tracing::debug!(dir = %dir.display(), "mkdir -p");
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// SIGTERM the pid recorded by `mysqld`, escalating to SIGKILL after the
    /// shutdown timeout. A missing or stale pid file is not an error.
    async fn signal_pid_file(&self) -> Result<()> {
        let pid_file = self.pid_file();
        let text = match tokio::fs::read_to_string(&pid_file).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(pid_file = %pid_file.display(), "no pid file, nothing to signal");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let Ok(pid) = text.trim().parse::<u32>() else {
            tracing::warn!(pid_file = %pid_file.display(), contents = %text.trim(), "unparseable pid file");
            return Ok(());
        };

        terminate_pid(pid, self.options.shutdown_timeout()).await;
        Ok(())
    }
}

/// SIGTERM `pid`, wait up to `timeout` for it to disappear, then SIGKILL.
/// Returns true when the process is gone.
pub async fn terminate_pid(pid: u32, timeout: Duration) -> bool {
    if !pid_alive(pid) {
        return true;
    }
    tracing::debug!(pid, "Sending SIGTERM");
    if let Err(err) = send_signal(pid, Signal::SIGTERM) {
        tracing::warn!(pid, error = %err, "failed to send SIGTERM");
    }
    if wait_for_exit(pid, timeout).await {
        return true;
    }

    tracing::warn!(pid, "process ignored SIGTERM, sending SIGKILL");
    if let Err(err) = send_signal(pid, Signal::SIGKILL) {
        tracing::warn!(pid, error = %err, "failed to send SIGKILL");
    }
    wait_for_exit(pid, timeout).await
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(PID_POLL_INTERVAL).await;
    }
    true
}
