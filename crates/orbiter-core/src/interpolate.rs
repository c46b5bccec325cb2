//! Argument interpolation for target commands
//!
//! Commands may reference CLI overrides as `{args.<name>}`. Placeholders with
//! no matching override are left as written.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

/// Regex for `{args.<name>}` placeholders
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{args\.([A-Za-z0-9_\-]+)\}").expect("Invalid regex"));

/// Replace `{args.<name>}` placeholders with override values
pub fn interpolate_args(template: &str, overrides: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match overrides.get(name) {
                Some(value) => value.clone(),
                None => {
                    debug!(placeholder = name, "no override for placeholder");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Parse trailing `--name=value` / `--flag` arguments into overrides.
///
/// Bare `--flag` maps to `"true"`; `--name value` consumes the next argument
/// when it does not itself start with `--`.
pub fn parse_overrides<S: AsRef<str>>(args: &[S]) -> BTreeMap<String, String> {
    let mut overrides = BTreeMap::new();
    let mut iter = args.iter().map(|a| a.as_ref()).peekable();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            debug!(arg, "ignoring positional override");
            continue;
        };

        if let Some((name, value)) = stripped.split_once('=') {
            overrides.insert(name.to_string(), value.to_string());
        } else if let Some(next) = iter.next_if(|n| !n.starts_with("--")) {
            overrides.insert(stripped.to_string(), next.to_string());
        } else {
            overrides.insert(stripped.to_string(), "true".to_string());
        }
    }

    overrides
}
