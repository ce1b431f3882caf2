use crate::cmd::{block_on, ConnectionArgs};
use crate::output::print_json;
use dbtest_core::{ProvisionOptions, Provisioner, SelfDestruct};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    database: String,
    host: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    socket_path: Option<PathBuf>,
    self_destruct: SelfDestruct,
    files: Vec<PathBuf>,
}

pub fn run(
    options: ProvisionOptions,
    connection: ConnectionArgs,
    self_destruct: Option<String>,
    no_self_destruct: bool,
    files: &[PathBuf],
    json: bool,
) -> anyhow::Result<()> {
    let mut config = connection.into_config();
    config.self_destruct = match (self_destruct, no_self_destruct) {
        (_, true) => Some(SelfDestruct::Disabled),
        (Some(ttl), false) => Some(SelfDestruct::After(ttl)),
        (None, false) => None,
    };

    block_on(Provisioner::new(options).create_test_db(&mut config, files))?;

    if json {
        return print_json(&Created {
            database: config.database().to_string(),
            host: config.host().to_string(),
            port: config.port(),
            socket_path: config.socket_path.clone(),
            self_destruct: config.self_destruct().clone(),
            files: files.to_vec(),
        });
    }

    println!("{}", config.database());
    Ok(())
}
