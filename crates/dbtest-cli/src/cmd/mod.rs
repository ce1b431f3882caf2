pub mod create;
pub mod drop;
pub mod local;
pub mod name;

use clap::Args;
use dbtest_core::exit_guard::run_until_shutdown;
use dbtest_core::ConnectionConfig;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Grace period for children to exit after SIGTERM on Ctrl-C.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Drive `fut` on a fresh runtime. On Ctrl-C or SIGTERM its children are
/// terminated and the command fails.
pub fn block_on<T, F>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = dbtest_core::Result<T>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match run_until_shutdown(fut, shutdown_signal(), SHUTDOWN_GRACE).await {
            Ok(res) => Ok(res?),
            Err(reason) => anyhow::bail!("{}", reason?),
        }
    })
}

/// Resolves on Ctrl-C or SIGTERM with a word describing which.
pub async fn shutdown_signal() -> anyhow::Result<&'static str> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("interrupted")
        }
        _ = term.recv() => Ok("terminated"),
    }
}

/// Connection flags shared by `create` and `drop`. Anything left unset is
/// filled from the connection-config files.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Database name (must carry the configured suffix)
    #[arg(long, short = 'd')]
    pub database: String,

    #[arg(long, short = 'u')]
    pub user: Option<String>,

    #[arg(long, env = "DBTEST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, short = 'H')]
    pub host: Option<String>,

    #[arg(long, short = 'P')]
    pub port: Option<u16>,

    /// Unix socket; takes priority over host/port
    #[arg(long)]
    pub socket: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn into_config(self) -> ConnectionConfig {
        ConnectionConfig {
            user: self.user,
            password: self.password,
            host: self.host,
            port: self.port,
            database: Some(self.database),
            socket_path: self.socket,
            ..Default::default()
        }
    }
}
