use crate::cmd::{block_on, ConnectionArgs};
use crate::output::print_json;
use dbtest_core::{ProvisionOptions, Provisioner};

pub fn run(options: ProvisionOptions, connection: ConnectionArgs, json: bool) -> anyhow::Result<()> {
    let mut config = connection.into_config();

    block_on(Provisioner::new(options).drop_test_db(&mut config))?;

    if json {
        print_json(&serde_json::json!({ "dropped": config.database() }))
    } else {
        println!("Dropped {}", config.database());
        Ok(())
    }
}
