//! `${name}` placeholder replacement in script text.

use std::collections::BTreeMap;

use regex_lite::Regex;

use crate::error::{SqlError, SqlResult};

/// Default placeholder prefix.
pub const DEFAULT_PREFIX: &str = "${";
/// Default placeholder suffix.
pub const DEFAULT_SUFFIX: &str = "}";

/// Replaces placeholders in scripts before they are parsed.
#[derive(Debug, Clone)]
pub struct PlaceholderReplacer {
    placeholders: BTreeMap<String, String>,
    pattern: Regex,
    enabled: bool,
}

impl PlaceholderReplacer {
    /// Create a replacer with the default `${` / `}` syntax.
    pub fn new(placeholders: BTreeMap<String, String>) -> Self {
        Self {
            placeholders,
            pattern: Regex::new(r"\$\{(.+?)\}").expect("static placeholder pattern"),
            enabled: true,
        }
    }

    /// Create a replacer with a custom prefix and suffix.
    pub fn with_syntax(
        placeholders: BTreeMap<String, String>,
        prefix: &str,
        suffix: &str,
    ) -> SqlResult<Self> {
        if prefix.is_empty() || suffix.is_empty() {
            return Err(SqlError::InvalidPlaceholderSyntax(format!(
                "prefix and suffix must not be empty (got '{prefix}' and '{suffix}')"
            )));
        }
        let pattern = format!(
            "{}(.+?){}",
            regex_lite::escape(prefix),
            regex_lite::escape(suffix)
        );
        let pattern =
            Regex::new(&pattern).map_err(|e| SqlError::InvalidPlaceholderSyntax(e.to_string()))?;
        Ok(Self {
            placeholders,
            pattern,
            enabled: true,
        })
    }

    /// A replacer that returns text unchanged.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(BTreeMap::new())
        }
    }

    /// Add or override one placeholder.
    pub fn with_placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(name.into(), value.into());
        self
    }

    /// Whether replacement is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replace all placeholders in `text`.
    pub fn replace(&self, text: &str) -> SqlResult<String> {
        if !self.enabled {
            return Ok(text.to_string());
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self
                .placeholders
                .get(name.as_str())
                .ok_or_else(|| SqlError::MissingPlaceholder(name.as_str().to_string()))?;
            out.push_str(&text[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }
}

impl Default for PlaceholderReplacer {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
