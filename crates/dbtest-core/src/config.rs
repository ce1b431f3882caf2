use crate::duration::parse_iso8601_duration;
use crate::error::{DbTestError, Result};
use crate::paths;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// LocalOptions
// ---------------------------------------------------------------------------

/// Options for a throwaway local `mysqld` instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOptions {
    pub mysql_local_port: u16,
    pub mysqld: String,
    pub mysql: String,
    pub mysqladmin: String,
    pub mysql_tzinfo_to_sql: String,
    pub mysql_install_db: String,
    pub mysql_base_dir: PathBuf,
    pub mysql_data_dir: PathBuf,
    /// Wait after launching the daemon before the next step runs.
    pub mysql_settle_delay_ms: u64,
    /// Wait after every foreground step.
    pub step_settle_delay_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on teardown.
    pub shutdown_timeout_ms: u64,
    pub mysql_host: String,
    pub mysql_socket: PathBuf,
    pub mysql_create_grant_tables: bool,
    pub mysqld_args: String,
    pub zoneinfo_dir: PathBuf,
    pub system_user: String,
}

fn default_system_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            mysql_local_port: 3307,
            mysqld: "mysqld".to_string(),
            mysql: "mysql".to_string(),
            mysqladmin: "mysqladmin".to_string(),
            mysql_tzinfo_to_sql: "mysql_tzinfo_to_sql".to_string(),
            mysql_install_db: "mysql_install_db".to_string(),
            mysql_base_dir: PathBuf::from("/usr/local"),
            mysql_data_dir: PathBuf::from("./mysql-local"),
            mysql_settle_delay_ms: 3_000,
            step_settle_delay_ms: 1_000,
            shutdown_timeout_ms: 10_000,
            mysql_host: "127.0.0.1".to_string(),
            mysql_socket: PathBuf::from("/tmp/mysqltest.sock"),
            mysql_create_grant_tables: false,
            mysqld_args: String::new(),
            zoneinfo_dir: PathBuf::from("/usr/share/zoneinfo"),
            system_user: default_system_user(),
        }
    }
}

impl LocalOptions {
    pub fn daemon_settle_delay(&self) -> Duration {
        Duration::from_millis(self.mysql_settle_delay_ms)
    }

    pub fn step_settle_delay(&self) -> Duration {
        Duration::from_millis(self.step_settle_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Client auth flag: grant tables mean we must log in as root.
    pub fn client_user_args(&self) -> &'static str {
        if self.mysql_create_grant_tables {
            "-u root"
        } else {
            ""
        }
    }

    /// Extra server arguments, with `--skip-grant-tables` when no grant
    /// tables are created.
    pub fn effective_mysqld_args(&self) -> String {
        let mut args = self.mysqld_args.trim().to_string();
        if !self.mysql_create_grant_tables {
            if !args.is_empty() {
                args.push(' ');
            }
            args.push_str("--skip-grant-tables");
        }
        args
    }
}

// ---------------------------------------------------------------------------
// ProvisionOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionOptions {
    /// SQL client binary used to load fixture files.
    pub mysql: String,
    pub database_must_end_with: String,
    pub host_blacklist: Vec<String>,
    pub charset: String,
    pub collate: String,
    /// Connection-config layer files, highest priority first. `None` means
    /// the standard `~/.dbtestutil.conf`, `/usr/local/etc`, `/etc` search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_files: Option<Vec<PathBuf>>,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            mysql: "mysql".to_string(),
            database_must_end_with: "_test".to_string(),
            host_blacklist: Vec::new(),
            charset: "utf8mb4".to_string(),
            collate: "utf8mb4_unicode_520_ci".to_string(),
            config_files: None,
        }
    }
}

impl ProvisionOptions {
    pub fn layer_files(&self) -> Vec<PathBuf> {
        self.config_files
            .clone()
            .unwrap_or_else(paths::connection_config_layers)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Top-level settings file (YAML).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub local: LocalOptions,
    pub provision: ProvisionOptions,
}

impl Settings {
    /// Load settings from `path`, or built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data).map_err(|e| DbTestError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }
}

// ---------------------------------------------------------------------------
// SelfDestruct
// ---------------------------------------------------------------------------

/// Time-to-live for a provisioned database.
///
/// Serialized as an ISO-8601 duration string, or `false` to disable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelfDestructRepr", into = "SelfDestructRepr")]
pub enum SelfDestruct {
    Disabled,
    After(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SelfDestructRepr {
    Ttl(String),
    Flag(bool),
}

impl TryFrom<SelfDestructRepr> for SelfDestruct {
    type Error = String;

    fn try_from(repr: SelfDestructRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            SelfDestructRepr::Ttl(ttl) => Ok(SelfDestruct::After(ttl)),
            SelfDestructRepr::Flag(false) => Ok(SelfDestruct::Disabled),
            SelfDestructRepr::Flag(true) => {
                Err("selfDestruct must be an ISO-8601 duration or false".to_string())
            }
        }
    }
}

impl From<SelfDestruct> for SelfDestructRepr {
    fn from(value: SelfDestruct) -> Self {
        match value {
            SelfDestruct::Disabled => SelfDestructRepr::Flag(false),
            SelfDestruct::After(ttl) => SelfDestructRepr::Ttl(ttl),
        }
    }
}

impl SelfDestruct {
    /// Parsed TTL, `None` when disabled.
    pub fn ttl(&self) -> Result<Option<TimeDelta>> {
        match self {
            SelfDestruct::Disabled => Ok(None),
            SelfDestruct::After(ttl) => parse_iso8601_duration(ttl).map(Some),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionConfig
// ---------------------------------------------------------------------------

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_SELF_DESTRUCT: &str = "PT6H";

/// Connection settings for `createTestDb`. Every field is optional so the
/// same type can describe the caller's input, a config-file layer, and the
/// defaulted result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_destruct: Option<SelfDestruct>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_statements: Option<bool>,
    /// Connection collation/charset; defaults to the provisioner's collation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
}

impl ConnectionConfig {
    /// Built-in fallback values, lowest priority layer.
    pub fn builtin(collate: &str) -> Self {
        Self {
            user: Some(DEFAULT_USER.to_string()),
            password: Some(String::new()),
            host: Some(DEFAULT_HOST.to_string()),
            port: Some(DEFAULT_PORT),
            database: Some(String::new()),
            socket_path: None,
            self_destruct: Some(SelfDestruct::After(DEFAULT_SELF_DESTRUCT.to_string())),
            multiple_statements: Some(true),
            charset: Some(collate.to_string()),
        }
    }

    /// Fill every unset field from `fallback`. Set fields are never replaced.
    pub fn fill_from(&mut self, fallback: &ConnectionConfig) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.user, &fallback.user);
        fill(&mut self.password, &fallback.password);
        fill(&mut self.host, &fallback.host);
        fill(&mut self.port, &fallback.port);
        fill(&mut self.database, &fallback.database);
        fill(&mut self.socket_path, &fallback.socket_path);
        fill(&mut self.self_destruct, &fallback.self_destruct);
        fill(&mut self.multiple_statements, &fallback.multiple_statements);
        fill(&mut self.charset, &fallback.charset);
    }

    /// Read one JSON layer. A missing file is an empty layer; a malformed
    /// one is an error so the user sees it.
    pub fn load_layer(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&data).map_err(|e| DbTestError::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Fill defaults in place: `layers` in order, then the built-ins.
    pub fn apply_defaults(&mut self, layers: &[PathBuf], collate: &str) -> Result<()> {
        for path in layers {
            let layer = Self::load_layer(path)?;
            self.fill_from(&layer);
        }
        self.fill_from(&Self::builtin(collate));
        Ok(())
    }

    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(DEFAULT_USER)
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or("")
    }

    pub fn self_destruct(&self) -> &SelfDestruct {
        const DISABLED: &SelfDestruct = &SelfDestruct::Disabled;
        self.self_destruct.as_ref().unwrap_or(DISABLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn local_defaults() {
        let opts = LocalOptions::default();
        assert_eq!(opts.mysql_local_port, 3307);
        assert_eq!(opts.mysql_socket, PathBuf::from("/tmp/mysqltest.sock"));
        assert_eq!(opts.daemon_settle_delay(), Duration::from_secs(3));
        assert!(!opts.system_user.is_empty());
    }

    #[test]
    fn skip_grant_tables_unless_created() {
        let mut opts = LocalOptions {
            mysqld_args: "--log-bin".into(),
            ..Default::default()
        };
        assert_eq!(opts.effective_mysqld_args(), "--log-bin --skip-grant-tables");
        assert_eq!(opts.client_user_args(), "");

        opts.mysql_create_grant_tables = true;
        assert_eq!(opts.effective_mysqld_args(), "--log-bin");
        assert_eq!(opts.client_user_args(), "-u root");
    }

    #[test]
    fn settings_partial_yaml() {
        let yaml = r#"
local:
  mysql_local_port: 3310
provision:
  host_blacklist: [db.prod.example.com]
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.local.mysql_local_port, 3310);
        assert_eq!(settings.local.mysqld, "mysqld");
        assert_eq!(settings.provision.host_blacklist, vec!["db.prod.example.com"]);
        assert_eq!(settings.provision.database_must_end_with, "_test");
    }

    #[test]
    fn settings_missing_path_is_default() {
        assert_eq!(Settings::load(None).unwrap(), Settings::default());
    }

    #[test]
    fn settings_bad_yaml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dbtest.yaml");
        std::fs::write(&path, "local: [not, a, map]").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert_eq!(err.tag(), "DBTESTUTIL_CONFIG");
    }

    #[test]
    fn self_destruct_json_forms() {
        let cfg: ConnectionConfig = serde_json::from_str(r#"{"selfDestruct":"PT1H"}"#).unwrap();
        assert_eq!(cfg.self_destruct, Some(SelfDestruct::After("PT1H".into())));
        assert_eq!(
            cfg.self_destruct().ttl().unwrap(),
            Some(TimeDelta::hours(1))
        );

        let cfg: ConnectionConfig = serde_json::from_str(r#"{"selfDestruct":false}"#).unwrap();
        assert_eq!(cfg.self_destruct, Some(SelfDestruct::Disabled));
        assert_eq!(cfg.self_destruct().ttl().unwrap(), None);

        assert!(serde_json::from_str::<ConnectionConfig>(r#"{"selfDestruct":true}"#).is_err());
    }

    #[test]
    fn layers_fill_in_priority_order() {
        let dir = TempDir::new().unwrap();
        let user_layer = dir.path().join("user.conf");
        let etc_layer = dir.path().join("etc.conf");
        std::fs::write(&user_layer, r#"{"host":"db.local","socketPath":"/tmp/my.sock"}"#).unwrap();
        std::fs::write(&etc_layer, r#"{"host":"ignored","port":3310,"user":"ci"}"#).unwrap();

        let mut cfg = ConnectionConfig {
            database: Some("x_test".into()),
            user: Some("me".into()),
            ..Default::default()
        };
        cfg.apply_defaults(
            &[user_layer, dir.path().join("missing.conf"), etc_layer],
            "utf8mb4_bin",
        )
        .unwrap();

        assert_eq!(cfg.user(), "me");
        assert_eq!(cfg.host(), "db.local");
        assert_eq!(cfg.port(), 3310);
        assert_eq!(cfg.database(), "x_test");
        assert_eq!(cfg.socket_path, Some(PathBuf::from("/tmp/my.sock")));
        assert_eq!(cfg.charset.as_deref(), Some("utf8mb4_bin"));
        assert_eq!(cfg.multiple_statements, Some(true));
        assert_eq!(
            cfg.self_destruct,
            Some(SelfDestruct::After(DEFAULT_SELF_DESTRUCT.into()))
        );
        assert_eq!(cfg.password(), None);
    }

    #[test]
    fn malformed_layer_is_reported() {
        let dir = TempDir::new().unwrap();
        let layer = dir.path().join("bad.conf");
        std::fs::write(&layer, "{ not json").unwrap();
        let mut cfg = ConnectionConfig::default();
        let err = cfg.apply_defaults(&[layer], "utf8mb4_bin").unwrap_err();
        assert_eq!(err.tag(), "DBTESTUTIL_CONFIG");
    }
}
