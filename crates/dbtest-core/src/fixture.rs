//! Loading SQL fixture files through the external `mysql` client.
//!
//! Each file is streamed into the client's stdin while stdout and stderr are
//! collected. Files load one at a time; the first failure stops the rest.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::config::ConnectionConfig;
use crate::error::{DbTestError, Result};
use crate::exit_guard::ExitGuard;

/// Client arguments for `config`. A socket path takes priority over host/port.
pub fn client_args(config: &ConnectionConfig, charset: &str) -> Vec<String> {
    let mut args = vec![
        format!("--default-character-set={charset}"),
        "--user".to_string(),
        config.user().to_string(),
    ];

    match &config.socket_path {
        Some(socket) => {
            args.push("--socket".to_string());
            args.push(socket.display().to_string());
        }
        None => {
            args.push("--host".to_string());
            args.push(config.host().to_string());
            args.push("--port".to_string());
            args.push(config.port().to_string());
        }
    }

    if let Some(password) = config.password() {
        args.push(format!("-p{password}"));
    }

    args.push(config.database().to_string());
    args
}

/// Copy of `args` safe to log or attach to an error.
pub fn redact_args(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|a| {
            if a.starts_with("-p") && a.len() > 2 {
                "-p****".to_string()
            } else {
                a.clone()
            }
        })
        .collect()
}

/// Pipe one SQL file into `program`.
pub async fn load_sql_file(
    program: &str,
    config: &ConnectionConfig,
    charset: &str,
    path: &Path,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| DbTestError::FixtureUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let args = client_args(config, charset);
    tracing::debug!(
        program,
        args = ?redact_args(&args),
        file = %path.display(),
        "loading SQL file"
    );

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| DbTestError::Spawn {
            command: program.to_string(),
            source,
        })?;
    let _guard = ExitGuard::register(child.id(), program);

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("stdin not captured"))?;

    // Write from a separate task so a chatty client can't fill its stdout
    // pipe while we are still blocked on stdin.
    let writer = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut file, &mut stdin).await;
        drop(stdin);
        copied
    });

    let output = child.wait_with_output().await?;

    match writer.await {
        Ok(Ok(bytes)) => tracing::trace!(bytes, "SQL file streamed"),
        // the client quit early; its exit status tells the story
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(source)) => {
            return Err(DbTestError::FixtureUnreadable {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(join) => tracing::warn!(error = %join, "SQL writer task failed"),
    }

    if !output.status.success() {
        return Err(DbTestError::MysqlCmd {
            program: program.to_string(),
            args: redact_args(&args),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Load `files` in order, stopping at the first failure.
pub async fn load_sql_files<P: AsRef<Path>>(
    program: &str,
    config: &ConnectionConfig,
    charset: &str,
    files: &[P],
) -> Result<()> {
    for file in files {
        load_sql_file(program, config, charset, file.as_ref()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// A stand-in `mysql` that records its args and input, and fails on
    /// input containing `BAD`.
    fn fake_client(dir: &Path) -> String {
        let script = dir.join("fake-mysql");
        let body = format!(
            "#!/bin/sh\n\
             echo \"$@\" > {args}\n\
             cat >> {input}\n\
             if grep -q BAD {input}; then echo 'ERROR 1064 (42000) at line 1' >&2; exit 1; fi\n\
             echo loaded\n",
            args = dir.join("args.txt").display(),
            input = dir.join("input.sql").display(),
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            user: Some("ci".into()),
            host: Some("db.local".into()),
            port: Some(3310),
            database: Some("app_1234abcd_test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn args_prefer_socket() {
        let mut cfg = config();
        let args = client_args(&cfg, "utf8mb4");
        assert_eq!(
            args,
            vec![
                "--default-character-set=utf8mb4",
                "--user",
                "ci",
                "--host",
                "db.local",
                "--port",
                "3310",
                "app_1234abcd_test",
            ]
        );

        cfg.socket_path = Some(PathBuf::from("/tmp/mysql.sock"));
        cfg.password = Some("s3cret".into());
        let args = client_args(&cfg, "utf8mb4");
        assert!(args.windows(2).any(|w| w == ["--socket", "/tmp/mysql.sock"]));
        assert!(!args.iter().any(|a| a == "--host"));
        assert!(args.contains(&"-ps3cret".to_string()));
        assert!(redact_args(&args).contains(&"-p****".to_string()));
    }

    #[test]
    fn empty_password_adds_no_flag() {
        let cfg = ConnectionConfig {
            password: Some(String::new()),
            ..config()
        };
        assert!(!client_args(&cfg, "utf8mb4").iter().any(|a| a.starts_with("-p")));
    }

    #[tokio::test]
    async fn streams_file_into_client() {
        let dir = TempDir::new().unwrap();
        let client = fake_client(dir.path());
        let sql = dir.path().join("schema.sql");
        std::fs::write(&sql, "CREATE TABLE messages (message VARCHAR(255));\n").unwrap();

        load_sql_file(&client, &config(), "utf8mb4", &sql).await.unwrap();

        let input = std::fs::read_to_string(dir.path().join("input.sql")).unwrap();
        assert!(input.contains("CREATE TABLE messages"));
        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert!(args.contains("--host db.local --port 3310 app_1234abcd_test"), "got: {args}");
    }

    #[tokio::test]
    async fn failure_carries_output_and_stops_later_files() {
        let dir = TempDir::new().unwrap();
        let client = fake_client(dir.path());
        let good = dir.path().join("schema.sql");
        let bad = dir.path().join("bad.sql");
        let never = dir.path().join("corpus.sql");
        std::fs::write(&good, "SELECT 1;\n").unwrap();
        std::fs::write(&bad, "BAD SQL;\n").unwrap();
        std::fs::write(&never, "SELECT 'never';\n").unwrap();

        let err = load_sql_files(&client, &config(), "utf8mb4", &[&good, &bad, &never])
            .await
            .unwrap_err();

        let DbTestError::MysqlCmd { code, stderr, args, .. } = &err else {
            panic!("expected MysqlCmd, got {err:?}");
        };
        assert_eq!(*code, Some(1));
        assert!(stderr.contains("ERROR 1064"), "got: {stderr}");
        assert_eq!(args.last().map(String::as_str), Some("app_1234abcd_test"));

        let input = std::fs::read_to_string(dir.path().join("input.sql")).unwrap();
        assert!(input.contains("SELECT 1;"));
        assert!(!input.contains("never"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_sql_file("mysql", &config(), "utf8mb4", &dir.path().join("nope.sql"))
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "DBTESTUTIL_FIXTURE_READ");
    }
}
