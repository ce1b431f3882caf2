use crate::cmd::{block_on, shutdown_signal, SHUTDOWN_GRACE};
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use dbtest_core::exit_guard::run_until_shutdown;
use dbtest_core::{LocalMySql, LocalOptions};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum LocalSubcommand {
    /// Start a fresh instance and keep it running until Ctrl-C
    Up {
        /// SQL file piped into the new instance after startup
        #[arg(long)]
        sql: Option<PathBuf>,
    },
    /// Stop an instance started with `local up` from another process
    Down {
        /// SQL file piped into the instance before shutdown
        #[arg(long)]
        sql: Option<PathBuf>,
    },
}

pub fn run(options: LocalOptions, subcmd: LocalSubcommand, json: bool) -> anyhow::Result<()> {
    let local = LocalMySql::new(options);
    match subcmd {
        LocalSubcommand::Up { sql } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(up(&local, sql, json))
        }
        LocalSubcommand::Down { sql } => {
            block_on(local.kill(sql.as_deref()))?;
            if !json {
                println!("Local MySQL stopped");
            }
            Ok(())
        }
    }
}

async fn up(local: &LocalMySql, sql: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let started =
        match run_until_shutdown(local.start(sql.as_deref()), shutdown_signal(), SHUTDOWN_GRACE)
            .await
        {
            Ok(res) => res.map_err(anyhow::Error::from),
            Err(reason) => {
                Err(reason.map_or_else(|e| e, |r| anyhow::anyhow!("{r} during startup")))
            }
        };
    if let Err(e) = started {
        if let Err(cleanup) = local.kill(None).await {
            tracing::warn!(error = %cleanup, "cleanup after failed start also failed");
        }
        return Err(e);
    }

    let opts = local.options();
    if json {
        print_json(&serde_json::json!({
            "socket": local.socket_path(),
            "port": opts.mysql_local_port,
            "dataDir": opts.mysql_data_dir,
            "pidFile": local.pid_file(),
        }))?;
    } else {
        println!(
            "Local MySQL listening on {} (port {}). Press Ctrl-C to stop.",
            local.socket_path().display(),
            opts.mysql_local_port
        );
    }

    let waited = shutdown_signal()
        .await
        .context("failed to listen for shutdown signals");
    tracing::info!("shutting down local MySQL");
    local.kill(None).await?;
    waited.map(|_| ())
}
