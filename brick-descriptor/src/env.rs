//! `BRICK_*` environment variable expansion
//!
//! Descriptors may reference `${BRICK_NAME}` or `${BRICK_NAME:-default}`.
//! Expansion happens on the raw descriptor text before YAML parsing. Other
//! variables are left untouched so they reach the step's shell verbatim.

use regex::Regex;
use std::sync::LazyLock;

use brick_core::{BrickError, Result};

/// `${BRICK_NAME}` or `${BRICK_NAME:-default}`
static BRACED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(BRICK_\w*)(?::-([^}]*))?\}").expect("constant regex pattern is valid")
});

/// `$BRICK_NAME` without braces
static BARE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$BRICK_\w*").expect("constant regex pattern is valid"));

/// Expands `BRICK_*` variables from the process environment
pub fn expand_brick_variables(text: &str) -> Result<String> {
    expand_with(text, |name| std::env::var(name).ok())
}

/// Expands `BRICK_*` variables using the given lookup
pub fn expand_with<F>(text: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bare) = BARE_PATTERN.find(text) {
        return Err(BrickError::config(format!(
            "faulty BRICK_ environment variable '{}': use ${{VAR}} or ${{VAR:-default}}",
            bare.as_str()
        )));
    }

    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;

    for caps in BRACED_PATTERN.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let name = &caps[1];

        let value = match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                return Err(BrickError::config(format!(
                    "Could not find environment variable {} or default value",
                    name
                )));
            }
        };

        expanded.push_str(&text[last..whole.start()]);
        expanded.push_str(&value);
        last = whole.end();
    }

    expanded.push_str(&text[last..]);
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_sha(name: &str) -> Option<String> {
        (name == "BRICK_COMMIT_SHA").then(|| "1234".to_string())
    }

    fn empty(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(expand_with("", empty).unwrap(), "");
    }

    #[test]
    fn test_default_used_when_unset() {
        assert_eq!(
            expand_with("tag: server:${BRICK_COMMIT_SHA:-latest}", empty).unwrap(),
            "tag: server:latest"
        );
    }

    #[test]
    fn test_value_used_when_set() {
        assert_eq!(
            expand_with("tag: server:${BRICK_COMMIT_SHA:-latest}", with_sha).unwrap(),
            "tag: server:1234"
        );
        assert_eq!(
            expand_with("tag: server:${BRICK_COMMIT_SHA}", with_sha).unwrap(),
            "tag: server:1234"
        );
    }

    #[test]
    fn test_other_variables_untouched() {
        assert_eq!(
            expand_with("tag: server:${COMMIT_SHA:-latest} $HOME", with_sha).unwrap(),
            "tag: server:${COMMIT_SHA:-latest} $HOME"
        );
    }

    #[test]
    fn test_bare_variable_rejected() {
        let err = expand_with("tag: server:$BRICK_FOO", with_sha).unwrap_err();
        assert!(err.to_string().contains("faulty BRICK_ environment"));
    }

    #[test]
    fn test_missing_without_default_rejected() {
        let err = expand_with("tag: server:${BRICK_FOO}", with_sha).unwrap_err();
        assert!(
            err.to_string()
                .contains("not find environment variable BRICK_FOO or default value")
        );
    }
}
