//! Settings carried by `client_init` and `config_sync`.
//!
//! Missing keys fall back to defaults; keys present with the wrong type are
//! payload errors.

use std::hash::{Hash, Hasher};

use crate::error::DecodeError;
use crate::value::Value;

const METHOD: &str = "client_init";

/// Default per-call evaluation budget in microseconds.
pub const DEFAULT_WAF_TIMEOUT_US: u64 = 10_000;

/// Default cap on forced trace retention per second.
pub const DEFAULT_TRACE_RATE_LIMIT: u32 = 100;

/// Default schema extraction sample rate.
pub const DEFAULT_SAMPLE_RATE: f64 = 0.1;

/// Settings that shape how an engine instance is built and driven.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineSettings {
    /// Path to the rules document. `None` selects the bundled rules.
    pub rules_file: Option<String>,
    /// Evaluation budget per publish, in microseconds.
    pub waf_timeout_us: u64,
    /// Forced retentions allowed per second. Zero means unlimited.
    pub trace_rate_limit: u32,
    /// Regex selecting keys whose values are redacted.
    pub obfuscator_key_regex: Option<String>,
    /// Regex selecting values that are redacted.
    pub obfuscator_value_regex: Option<String>,
    /// API schema extraction.
    pub schema_extraction: SchemaExtraction,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rules_file: None,
            waf_timeout_us: DEFAULT_WAF_TIMEOUT_US,
            trace_rate_limit: DEFAULT_TRACE_RATE_LIMIT,
            obfuscator_key_regex: None,
            obfuscator_value_regex: None,
            schema_extraction: SchemaExtraction::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        expect_map(value, "engine_settings")?;
        let defaults = Self::default();

        let waf_timeout_us = match opt_u64(value, "waf_timeout_us")? {
            None | Some(0) => defaults.waf_timeout_us,
            Some(v) => v,
        };
        let trace_rate_limit = match opt_u64(value, "trace_rate_limit")? {
            None => defaults.trace_rate_limit,
            Some(v) => u32::try_from(v).unwrap_or(u32::MAX),
        };
        let schema_extraction = match value.get("schema_extraction") {
            None | Some(Value::Nil) => SchemaExtraction::default(),
            Some(v) => SchemaExtraction::from_value(v)?,
        };

        Ok(Self {
            rules_file: opt_nonempty_str(value, "rules_file")?,
            waf_timeout_us,
            trace_rate_limit,
            obfuscator_key_regex: opt_nonempty_str(value, "obfuscator_key_regex")?,
            obfuscator_value_regex: opt_nonempty_str(value, "obfuscator_value_regex")?,
            schema_extraction,
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        [
            ("rules_file", Value::from(self.rules_file.clone().unwrap_or_default())),
            ("waf_timeout_us", Value::from(self.waf_timeout_us)),
            ("trace_rate_limit", Value::from(self.trace_rate_limit)),
            (
                "obfuscator_key_regex",
                Value::from(self.obfuscator_key_regex.clone().unwrap_or_default()),
            ),
            (
                "obfuscator_value_regex",
                Value::from(self.obfuscator_value_regex.clone().unwrap_or_default()),
            ),
            ("schema_extraction", self.schema_extraction.to_value()),
        ]
        .into_iter()
        .collect()
    }
}

/// API schema extraction settings.
#[derive(Debug, Clone, Copy)]
pub struct SchemaExtraction {
    pub enabled: bool,
    /// Fraction of distinct endpoints sampled, in `(0, 1]`.
    pub sample_rate: f64,
}

impl Default for SchemaExtraction {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

// Floats compare and hash by bit pattern so the settings can key a cache.
impl PartialEq for SchemaExtraction {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled && self.sample_rate.to_bits() == other.sample_rate.to_bits()
    }
}

impl Eq for SchemaExtraction {}

impl Hash for SchemaExtraction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.enabled.hash(state);
        self.sample_rate.to_bits().hash(state);
    }
}

impl SchemaExtraction {
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        expect_map(value, "schema_extraction")?;
        let sample_rate = match value.get("sample_rate") {
            None | Some(Value::Nil) => DEFAULT_SAMPLE_RATE,
            Some(v) => v
                .as_f64()
                .ok_or_else(|| type_error("schema_extraction.sample_rate", "number", v))?,
        };
        Ok(Self {
            enabled: opt_bool(value, "enabled")?.unwrap_or(false),
            sample_rate,
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        [
            ("enabled", Value::from(self.enabled)),
            ("sample_rate", Value::from(self.sample_rate)),
        ]
        .into_iter()
        .collect()
    }
}

/// Remote configuration wiring handed to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RemoteConfigSettings {
    pub enabled: bool,
    /// Path of the remote configuration directory file.
    pub shmem_path: String,
}

impl RemoteConfigSettings {
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        expect_map(value, "rc_settings")?;
        Ok(Self {
            enabled: opt_bool(value, "enabled")?.unwrap_or(false),
            shmem_path: opt_nonempty_str(value, "shmem_path")?.unwrap_or_default(),
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        [
            ("enabled", Value::from(self.enabled)),
            ("shmem_path", Value::from(self.shmem_path.as_str())),
        ]
        .into_iter()
        .collect()
    }
}

/// Identity of the instrumented service.
///
/// `extra_services` is kept sorted and deduplicated, so two identities that
/// name the same set compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub env_name: String,
    pub extra_services: Vec<String>,
}

impl ServiceIdentity {
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        env_name: impl Into<String>,
        extra_services: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut extra_services: Vec<String> = extra_services.into_iter().collect();
        extra_services.sort();
        extra_services.dedup();
        Self {
            service_name: service_name.into(),
            env_name: env_name.into(),
            extra_services,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        expect_map(value, "service_identity")?;
        let extra_services = match value.get("extra_services") {
            None | Some(Value::Nil) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| type_error("extra_services[]", "string", item))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(type_error("extra_services", "array", other)),
        };
        Ok(Self::new(
            opt_nonempty_str(value, "service_name")?.unwrap_or_default(),
            opt_nonempty_str(value, "env_name")?.unwrap_or_default(),
            extra_services,
        ))
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        [
            ("service_name", Value::from(self.service_name.as_str())),
            ("env_name", Value::from(self.env_name.as_str())),
            (
                "extra_services",
                Value::Array(
                    self.extra_services
                        .iter()
                        .map(|s| Value::from(s.as_str()))
                        .collect(),
                ),
            ),
        ]
        .into_iter()
        .collect()
    }
}

fn type_error(field: &str, expected: &str, got: &Value) -> DecodeError {
    DecodeError::payload(
        METHOD,
        format!("{field}: expected {expected}, got {}", got.type_name()),
    )
}

fn expect_map(value: &Value, field: &str) -> Result<(), DecodeError> {
    if value.is_map() {
        Ok(())
    } else {
        Err(type_error(field, "map", value))
    }
}

fn opt_nonempty_str(map: &Value, key: &str) -> Result<Option<String>, DecodeError> {
    match map.get(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::Str(s)) if s.is_empty() => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(type_error(key, "string", other)),
    }
}

fn opt_bool(map: &Value, key: &str) -> Result<Option<bool>, DecodeError> {
    match map.get(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(type_error(key, "bool", other)),
    }
}

fn opt_u64(map: &Value, key: &str) -> Result<Option<u64>, DecodeError> {
    match map.get(key) {
        None | Some(Value::Nil) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| type_error(key, "unsigned integer", v)),
    }
}
