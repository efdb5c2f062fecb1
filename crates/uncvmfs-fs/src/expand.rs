//! Placeholder expansion for symlink targets
//!
//! Catalog symlinks may carry environment-style placeholders such as
//! `$(ARCH)/lib` or `$(SITE:-default)/etc`. They are resolved against an
//! explicit set of variables taken from the repository configuration.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\(([A-Za-z_][A-Za-z0-9_]*)(?::-([^)]*))?\)").unwrap()
});

/// Resolves `$(NAME)` and `$(NAME:-default)` placeholders.
///
/// Lookup order is the configured variables, then (if enabled) the process
/// environment, then the inline default. Unresolved placeholders expand to
/// the empty string.
#[derive(Debug, Clone, Default)]
pub struct Expander {
    vars: BTreeMap<String, String>,
    process_env: bool,
}

impl Expander {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            process_env: false,
        }
    }

    /// Also consult the process environment after the configured variables.
    pub fn with_process_env(mut self) -> Self {
        self.process_env = true;
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        if self.process_env {
            return std::env::var(name).ok();
        }
        None
    }

    pub fn expand(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                self.lookup(&caps[1])
                    .or_else(|| caps.get(2).map(|d| d.as_str().to_string()))
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn expander() -> Expander {
        let mut vars = BTreeMap::new();
        vars.insert("ARCH".to_string(), "x86_64".to_string());
        vars.insert("EMPTY".to_string(), String::new());
        Expander::new(vars)
    }

    #[rstest]
    #[case("/opt/x", "/opt/x")]
    #[case("/opt/$(ARCH)/lib", "/opt/x86_64/lib")]
    #[case("$(MISSING:-fallback)/etc", "fallback/etc")]
    #[case("$(ARCH:-other)", "x86_64")]
    #[case("$(MISSING)", "")]
    #[case("$(EMPTY:-unused)", "")]
    #[case("$(ARCH)-$(ARCH)", "x86_64-x86_64")]
    #[case("$ARCH", "$ARCH")]
    fn expands_placeholders(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(expander().expand(template), expected);
    }
}
