//! Provisioning uniquely-named schemas on an already-running server.
//!
//! `create_test_db` walks a fixed sequence of stages, each gating the next:
//!
//! ```text
//! Preflight ─► CreateDatabase ─► ScheduleSelfDestruct ─► LoadFixtures ─► Done
//! ```
//!
//! The self-destruct event is created *before* fixtures load so a database
//! whose fixtures fail is still cleaned up by the server.

use std::path::Path;

use chrono::TimeDelta;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};

use crate::config::{ConnectionConfig, ProvisionOptions};
use crate::error::{DbTestError, Result};
use crate::fixture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    CreateDatabase,
    ScheduleSelfDestruct,
    LoadFixtures,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::CreateDatabase => "create_database",
            Stage::ScheduleSelfDestruct => "schedule_self_destruct",
            Stage::LoadFixtures => "load_fixtures",
            Stage::Done => "done",
        }
    }
}

pub struct Provisioner {
    options: ProvisionOptions,
}

impl Provisioner {
    pub fn new(options: ProvisionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ProvisionOptions {
        &self.options
    }

    /// Create the database named in `config`, schedule its self-destruct and
    /// load `sql_files` into it. `config` is filled with defaults in place.
    pub async fn create_test_db<P: AsRef<Path>>(
        &self,
        config: &mut ConnectionConfig,
        sql_files: &[P],
    ) -> Result<()> {
        config.apply_defaults(&self.options.layer_files(), &self.options.collate)?;
        let database = config.database().to_string();

        tracing::debug!(stage = Stage::Preflight.as_str(), database = %database, host = %config.host());
        self.preflight(config)?;
        let ttl = config.self_destruct().ttl()?;

        tracing::debug!(stage = Stage::CreateDatabase.as_str(), database = %database);
        self.create_database(config).await?;

        if let Some(ttl) = ttl {
            tracing::debug!(stage = Stage::ScheduleSelfDestruct.as_str(), database = %database, ttl_secs = ttl.num_seconds());
            self.schedule_self_destruct(config, ttl).await?;
        }

        tracing::debug!(stage = Stage::LoadFixtures.as_str(), database = %database, files = sql_files.len());
        fixture::load_sql_files(&self.options.mysql, config, &self.options.charset, sql_files)
            .await?;

        tracing::info!(stage = Stage::Done.as_str(), database = %database, "test database ready");
        Ok(())
    }

    /// Drop a database created by [`create_test_db`](Self::create_test_db).
    /// The same safety checks apply.
    pub async fn drop_test_db(&self, config: &mut ConnectionConfig) -> Result<()> {
        config.apply_defaults(&self.options.layer_files(), &self.options.collate)?;
        self.preflight(config)?;

        let database = config.database().to_string();
        let wrap = |source| DbTestError::DbDrop {
            database: database.clone(),
            source,
        };

        let mut conn = connect(config, false).await.map_err(wrap)?;
        let result = sqlx::raw_sql(&format!(
            "DROP DATABASE IF EXISTS {}",
            quote_identifier(&database)
        ))
        .execute(&mut conn)
        .await;
        close(conn).await;
        result.map_err(wrap)?;

        tracing::info!(database = %database, "test database dropped");
        Ok(())
    }

    /// Refuse names without the required suffix and blacklisted hosts.
    pub fn preflight(&self, config: &ConnectionConfig) -> Result<()> {
        let database = config.database();
        let must_end_with = &self.options.database_must_end_with;
        if !database.ends_with(must_end_with.as_str()) {
            return Err(DbTestError::MissingSuffix {
                database: database.to_string(),
                must_end_with: must_end_with.clone(),
            });
        }

        let host = config.host();
        if self.options.host_blacklist.iter().any(|h| h == host) {
            return Err(DbTestError::HostBlacklisted {
                host: host.to_string(),
                blacklist: self.options.host_blacklist.clone(),
            });
        }
        Ok(())
    }

    async fn create_database(&self, config: &ConnectionConfig) -> Result<()> {
        let database = config.database();
        let wrap = |source| DbTestError::DbCreate {
            database: database.to_string(),
            source,
        };

        let mut conn = connect(config, false).await.map_err(wrap)?;
        let result = sqlx::raw_sql(&create_database_sql(
            database,
            &self.options.charset,
            &self.options.collate,
        ))
        .execute(&mut conn)
        .await;
        close(conn).await;
        result.map_err(wrap)?;
        Ok(())
    }

    async fn schedule_self_destruct(&self, config: &ConnectionConfig, ttl: TimeDelta) -> Result<()> {
        let database = config.database();
        let wrap = |source| DbTestError::DbEvent {
            database: database.to_string(),
            source,
        };

        let mut conn = connect(config, true).await.map_err(wrap)?;
        let mut result = sqlx::raw_sql(&self_destruct_event_sql(database, ttl))
            .execute(&mut conn)
            .await
            .map(|_| ());
        if result.is_ok() {
            result = sqlx::raw_sql("SET GLOBAL event_scheduler = ON")
                .execute(&mut conn)
                .await
                .map(|_| ());
        }
        close(conn).await;
        result.map_err(wrap)
    }
}

// ─── SQL helpers ──────────────────────────────────────────────────────────

/// Backtick-quote a MySQL identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn create_database_sql(database: &str, charset: &str, collate: &str) -> String {
    format!(
        "CREATE DATABASE {} CHARACTER SET {} COLLATE {}",
        quote_identifier(database),
        quote_identifier(charset),
        quote_identifier(collate),
    )
}

/// Event that drops `database` once `ttl` has passed, measured on the
/// server's clock.
pub fn self_destruct_event_sql(database: &str, ttl: TimeDelta) -> String {
    let millis = ttl.num_milliseconds().max(0);
    let secs = (millis + 999) / 1_000;
    format!(
        "CREATE EVENT {} ON SCHEDULE AT CURRENT_TIMESTAMP + INTERVAL {secs} SECOND DO DROP DATABASE {}",
        quote_identifier(&format!("{database}_self_destruct")),
        quote_identifier(database),
    )
}

// ─── Connections ──────────────────────────────────────────────────────────

pub fn connect_options(config: &ConnectionConfig, with_database: bool) -> MySqlConnectOptions {
    let mut opts = MySqlConnectOptions::new().username(config.user());

    opts = match &config.socket_path {
        Some(socket) => opts.socket(socket),
        None => opts.host(config.host()).port(config.port()),
    };

    if let Some(password) = config.password() {
        opts = opts.password(password);
    }

    // `charset` may name either a character set or a collation.
    if let Some(charset) = config.charset.as_deref() {
        opts = if charset.contains('_') {
            opts.collation(charset)
        } else {
            opts.charset(charset)
        };
    }

    if with_database {
        opts = opts.database(config.database());
    }
    opts
}

async fn connect(config: &ConnectionConfig, with_database: bool) -> sqlx::Result<MySqlConnection> {
    connect_options(config, with_database).connect().await
}

async fn close(conn: MySqlConnection) {
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "error closing connection");
    }
}
