use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Connection config layers
// ---------------------------------------------------------------------------

pub const USER_CONFIG_FILE: &str = ".dbtestutil.conf";
pub const LOCAL_ETC_CONFIG: &str = "/usr/local/etc/dbtestutil.conf";
pub const ETC_CONFIG: &str = "/etc/dbtestutil.conf";

/// Connection-config layer files, highest priority first.
pub fn connection_config_layers() -> Vec<PathBuf> {
    let home = home::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    vec![
        home.join(USER_CONFIG_FILE),
        PathBuf::from(LOCAL_ETC_CONFIG),
        PathBuf::from(ETC_CONFIG),
    ]
}

// ---------------------------------------------------------------------------
// Local instance layout
// ---------------------------------------------------------------------------

pub const DATA_DIR: &str = "data";
pub const TMP_DIR: &str = "tmp";
pub const SLAVE_TMP_DIR: &str = "slave-tmp";
pub const SECURE_FILE_PRIV_DIR: &str = "secure-file-priv";
pub const INNODB_DIR: &str = "innodb";

pub const PID_FILE: &str = "mysqld.pid";
pub const SQL_OUTPUT_FILE: &str = "dbSqlCmd.out";

/// Every directory `startLocalMySql` recreates under the instance root.
pub fn instance_dirs(root: &Path) -> Vec<PathBuf> {
    [
        DATA_DIR,
        TMP_DIR,
        SLAVE_TMP_DIR,
        SECURE_FILE_PRIV_DIR,
        INNODB_DIR,
    ]
    .iter()
    .map(|d| root.join(d))
    .collect()
}

pub fn pid_file(root: &Path) -> PathBuf {
    root.join(PID_FILE)
}

pub fn sql_output_file(root: &Path) -> PathBuf {
    root.join(SQL_OUTPUT_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_layer_comes_first() {
        let layers = connection_config_layers();
        assert_eq!(layers.len(), 3);
        assert!(layers[0].ends_with(USER_CONFIG_FILE));
        assert_eq!(layers[2], PathBuf::from(ETC_CONFIG));
    }

    #[test]
    fn instance_dirs_are_rooted() {
        let root = Path::new("/tmp/mysql-local");
        let dirs = instance_dirs(root);
        assert_eq!(dirs.len(), 5);
        assert!(dirs.iter().all(|d| d.starts_with(root)));
        assert_eq!(pid_file(root), root.join("mysqld.pid"));
    }
}
