use crate::output::print_json;
use dbtest_core::make_database_name;

pub fn run(
    stem: Option<&str>,
    suffix: Option<&str>,
    separator: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let name = make_database_name(stem, suffix, separator);
    if json {
        print_json(&serde_json::json!({ "name": name }))
    } else {
        println!("{name}");
        Ok(())
    }
}
