//! Redaction of sensitive values in triggers.

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Default pattern for keys whose values must never be reported.
pub const DEFAULT_KEY_REGEX: &str = r"(?i)pass|pw(?:or)?d|secret|(?:api|private|public|access)[_-]?key|token|consumer[_-]?(?:id|key|secret)|sign(?:ed|ature)|bearer|authorization|jsessionid|phpsessid|asp\.net[_-]sessionid|sid|jwt";

/// Replacement text for redacted values.
pub const REDACTED: &str = "<Redacted>";

/// Decides which matched values are redacted.
#[derive(Debug, Clone)]
pub struct Obfuscator {
    key: Option<Regex>,
    value: Option<Regex>,
}

impl Obfuscator {
    /// Builds an obfuscator. An invalid key pattern falls back to the default;
    /// an invalid value pattern disables value redaction.
    #[must_use]
    pub fn new(key_regex: Option<&str>, value_regex: Option<&str>) -> Self {
        let key = compile(key_regex.unwrap_or(DEFAULT_KEY_REGEX)).or_else(|| {
            warn!(pattern = ?key_regex, "Invalid obfuscator key regex, using default");
            compile(DEFAULT_KEY_REGEX)
        });
        let value = value_regex.and_then(|pattern| {
            let compiled = compile(pattern);
            if compiled.is_none() {
                warn!(pattern, "Invalid obfuscator value regex, value redaction disabled");
            }
            compiled
        });
        Self { key, value }
    }

    /// Whether the value at `key_path` must be redacted.
    #[must_use]
    pub fn should_redact(&self, key_path: &[String], value: &str) -> bool {
        let key_hit = self
            .key
            .as_ref()
            .is_some_and(|re| key_path.iter().any(|k| re.is_match(k)));
        key_hit || self.value.as_ref().is_some_and(|re| re.is_match(value))
    }
}

impl Default for Obfuscator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).size_limit(1 << 20).build().ok()
}
