use uuid::Uuid;

pub const DEFAULT_STEM: &str = "dbtestutil";
pub const DEFAULT_SUFFIX: &str = "test";
pub const DEFAULT_SEPARATOR: &str = "_";

/// Generate a collision-resistant database name: `stem_<8 hex>_suffix`.
///
/// Uniqueness comes from the random component only; nothing is checked
/// against the server.
pub fn make_database_name(
    stem: Option<&str>,
    suffix: Option<&str>,
    separator: Option<&str>,
) -> String {
    let random = Uuid::new_v4().simple().to_string();
    [
        stem.unwrap_or(DEFAULT_STEM),
        &random[..8],
        suffix.unwrap_or(DEFAULT_SUFFIX),
    ]
    .join(separator.unwrap_or(DEFAULT_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn generates_unique_names() {
        let pattern = Regex::new(r"^foobar_[0-9a-f]{8}_test$").unwrap();
        let a = make_database_name(Some("foobar"), None, None);
        let b = make_database_name(Some("foobar"), None, None);
        assert!(pattern.is_match(&a), "got: {a}");
        assert!(pattern.is_match(&b), "got: {b}");
        assert_ne!(a, b);
    }

    #[test]
    fn custom_suffix_and_separator() {
        let c = make_database_name(Some("foobar"), Some("tst"), Some("__"));
        assert!(
            Regex::new(r"^foobar__[0-9a-f]{8}__tst$").unwrap().is_match(&c),
            "got: {c}"
        );
    }

    #[test]
    fn defaults_satisfy_required_suffix() {
        let name = make_database_name(None, None, None);
        assert!(name.starts_with("dbtestutil_"));
        assert!(name.ends_with("_test"));
    }
}
