use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbTestError {
    #[error("database name '{database}' missing test suffix '{must_end_with}'")]
    MissingSuffix {
        database: String,
        must_end_with: String,
    },

    #[error("host '{host}' must not appear in host blacklist {blacklist:?}")]
    HostBlacklisted {
        host: String,
        blacklist: Vec<String>,
    },

    #[error("could not create database '{database}': {source}")]
    DbCreate {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("could not create event to self destruct database '{database}': {source}")]
    DbEvent {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("could not drop database '{database}': {source}")]
    DbDrop {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "problem executing mysql command '{}' (exit code {:?})\n{}",
        .program,
        .code,
        combined_output(.stdout, .stderr)
    )]
    MysqlCmd {
        program: String,
        args: Vec<String>,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("could not read fixture file {}: {source}", path.display())]
    FixtureUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command failed (exit code {code:?}): {command}\n{output}")]
    StepFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("binary not found on PATH: {0}")]
    BinaryNotFound(String),

    #[error("invalid ISO-8601 duration: '{0}'")]
    InvalidDuration(String),

    #[error("invalid config {}: {message}", path.display())]
    InvalidConfig { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DbTestError {
    /// Stable symbolic name for matching in scripts and test assertions.
    pub fn tag(&self) -> &'static str {
        match self {
            DbTestError::MissingSuffix { .. } => "DBTESTUTIL_DATABASE_MISSING_SUFFIX",
            DbTestError::HostBlacklisted { .. } => "DBTESTUTIL_HOST_BLACKLISTED",
            DbTestError::DbCreate { .. } => "DBTESTUTIL_DB_CREATE",
            DbTestError::DbEvent { .. } => "DBTESTUTIL_DB_EVENT",
            DbTestError::DbDrop { .. } => "DBTESTUTIL_DB_DROP",
            DbTestError::MysqlCmd { .. } => "DBTESTUTIL_MYSQL_CMD",
            DbTestError::FixtureUnreadable { .. } => "DBTESTUTIL_FIXTURE_READ",
            DbTestError::StepFailed { .. } => "DBTESTUTIL_STEP_FAILED",
            DbTestError::Spawn { .. } => "DBTESTUTIL_SPAWN",
            DbTestError::BinaryNotFound(_) => "DBTESTUTIL_BINARY_NOT_FOUND",
            DbTestError::InvalidDuration(_) => "DBTESTUTIL_INVALID_DURATION",
            DbTestError::InvalidConfig { .. } => "DBTESTUTIL_CONFIG",
            DbTestError::Io(_) => "DBTESTUTIL_IO",
            DbTestError::Yaml(_) => "DBTESTUTIL_YAML",
            DbTestError::Json(_) => "DBTESTUTIL_JSON",
        }
    }

    /// True for the safety rejections raised before anything is mutated.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            DbTestError::MissingSuffix { .. } | DbTestError::HostBlacklisted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DbTestError>;

/// stdout followed by stderr, whichever are non-empty.
fn combined_output(stdout: &str, stderr: &str) -> String {
    [stdout.trim_end(), stderr.trim_end()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
