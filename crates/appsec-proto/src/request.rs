//! Requests sent by the extension to the helper.
//!
//! On the wire every request is `[method_name, payload]`. The payload is an
//! array whose arity and element types depend on the method.

use crate::error::DecodeError;
use crate::settings::{EngineSettings, RemoteConfigSettings, ServiceIdentity};
use crate::value::Value;

/// Stable numeric identifiers for request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestId {
    ClientInit = 1,
    RequestInit = 2,
    RequestExec = 3,
    RequestShutdown = 4,
    ConfigSync = 5,
}

impl RequestId {
    /// Returns the numeric value of this id.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns the method name used on the wire.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::ClientInit => "client_init",
            Self::RequestInit => "request_init",
            Self::RequestExec => "request_exec",
            Self::RequestShutdown => "request_shutdown",
            Self::ConfigSync => "config_sync",
        }
    }

    /// Maps a wire method name to its id.
    #[must_use]
    pub fn from_method(name: &str) -> Option<Self> {
        match name {
            "client_init" => Some(Self::ClientInit),
            "request_init" => Some(Self::RequestInit),
            "request_exec" => Some(Self::RequestExec),
            "request_shutdown" => Some(Self::RequestShutdown),
            "config_sync" => Some(Self::ConfigSync),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ClientInit(Box<ClientInit>),
    RequestInit(RequestInit),
    RequestExec(RequestExec),
    RequestShutdown(RequestShutdown),
    ConfigSync(ConfigSync),
}

/// `client_init` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInit {
    pub pid: u32,
    pub client_version: String,
    pub runtime_version: String,
    /// Local enablement: `None` defers to remote configuration.
    pub enabled_configuration: Option<bool>,
    pub engine_settings: EngineSettings,
    pub rc_settings: RemoteConfigSettings,
    pub service_identity: ServiceIdentity,
}

/// `request_init` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestInit {
    /// Address to value map describing the request.
    pub data: Value,
}

/// `request_exec` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestExec {
    pub data: Value,
    /// Restricts evaluation to rules of this type.
    pub rasp_rule: Option<String>,
}

/// `request_shutdown` arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestShutdown {
    pub data: Value,
    /// Endpoint key used to sample API schema extraction.
    pub api_sec_samp_key: Option<u64>,
}

/// `config_sync` arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSync {
    /// Remote configuration path currently used by the extension.
    pub rem_cfg_path: Option<String>,
}

impl Request {
    /// Returns the numeric id of this request.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        match self {
            Self::ClientInit(_) => RequestId::ClientInit,
            Self::RequestInit(_) => RequestId::RequestInit,
            Self::RequestExec(_) => RequestId::RequestExec,
            Self::RequestShutdown(_) => RequestId::RequestShutdown,
            Self::ConfigSync(_) => RequestId::ConfigSync,
        }
    }

    /// Returns the wire method name of this request.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.id().method()
    }

    /// Decodes a request from its top-level `[method, payload]` value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Array(items) = value else {
            return Err(DecodeError::InvalidShape(format!(
                "expected array, got {}",
                value.type_name()
            )));
        };
        let [method, payload]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
            DecodeError::InvalidShape(format!("expected 2 elements, got {}", items.len()))
        })?;
        let Value::Str(method) = method else {
            return Err(DecodeError::InvalidShape(format!(
                "method name must be a string, got {}",
                method.type_name()
            )));
        };
        let id = RequestId::from_method(&method).ok_or(DecodeError::UnknownMethod(method))?;
        let Value::Array(args) = payload else {
            return Err(DecodeError::payload(
                id.method(),
                format!("expected array, got {}", payload.type_name()),
            ));
        };

        match id {
            RequestId::ClientInit => ClientInit::from_args(args).map(|r| Self::ClientInit(Box::new(r))),
            RequestId::RequestInit => RequestInit::from_args(args).map(Self::RequestInit),
            RequestId::RequestExec => RequestExec::from_args(args).map(Self::RequestExec),
            RequestId::RequestShutdown => {
                RequestShutdown::from_args(args).map(Self::RequestShutdown)
            }
            RequestId::ConfigSync => ConfigSync::from_args(args).map(Self::ConfigSync),
        }
    }

    /// Encodes this request to its top-level `[method, payload]` value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let args = match self {
            Self::ClientInit(init) => init.to_args(),
            Self::RequestInit(r) => vec![r.data.clone()],
            Self::RequestExec(r) => {
                let mut args = vec![r.data.clone()];
                if let Some(rule) = &r.rasp_rule {
                    args.push([("rasp_rule", Value::from(rule.as_str()))].into_iter().collect());
                }
                args
            }
            Self::RequestShutdown(r) => {
                let mut args = vec![r.data.clone()];
                if let Some(key) = r.api_sec_samp_key {
                    args.push(Value::UInt(key));
                }
                args
            }
            Self::ConfigSync(r) => r
                .rem_cfg_path
                .as_ref()
                .map(|p| vec![Value::from(p.as_str())])
                .unwrap_or_default(),
        };
        Value::Array(vec![Value::from(self.method()), Value::Array(args)])
    }
}

impl ClientInit {
    const METHOD: &'static str = "client_init";

    fn from_args(args: Vec<Value>) -> Result<Self, DecodeError> {
        if args.len() != 6 && args.len() != 7 {
            return Err(DecodeError::payload(
                Self::METHOD,
                format!("expected 6 or 7 elements, got {}", args.len()),
            ));
        }
        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or_default();

        let pid = next();
        let pid = pid
            .as_u64()
            .and_then(|p| u32::try_from(p).ok())
            .ok_or_else(|| DecodeError::payload(Self::METHOD, "pid must be an unsigned 32-bit integer"))?;
        let client_version = expect_string(next(), Self::METHOD, "client_version")?;
        let runtime_version = expect_string(next(), Self::METHOD, "runtime_version")?;
        let enabled_configuration = match next() {
            Value::Nil => None,
            Value::Bool(b) => Some(b),
            other => {
                return Err(DecodeError::payload(
                    Self::METHOD,
                    format!("enabled_configuration must be nil or bool, got {}", other.type_name()),
                ))
            }
        };
        let engine_settings = EngineSettings::from_value(&next())?;
        let rc_settings = RemoteConfigSettings::from_value(&next())?;
        let service_identity = match next() {
            Value::Nil => ServiceIdentity::default(),
            other => ServiceIdentity::from_value(&other)?,
        };

        Ok(Self {
            pid,
            client_version,
            runtime_version,
            enabled_configuration,
            engine_settings,
            rc_settings,
            service_identity,
        })
    }

    fn to_args(&self) -> Vec<Value> {
        vec![
            Value::from(self.pid),
            Value::from(self.client_version.as_str()),
            Value::from(self.runtime_version.as_str()),
            Value::from(self.enabled_configuration),
            self.engine_settings.to_value(),
            self.rc_settings.to_value(),
            self.service_identity.to_value(),
        ]
    }
}

impl RequestInit {
    fn from_args(args: Vec<Value>) -> Result<Self, DecodeError> {
        let [data]: [Value; 1] = args.try_into().map_err(|args: Vec<Value>| {
            DecodeError::payload("request_init", format!("expected 1 element, got {}", args.len()))
        })?;
        Ok(Self { data })
    }
}

impl RequestExec {
    const METHOD: &'static str = "request_exec";

    fn from_args(args: Vec<Value>) -> Result<Self, DecodeError> {
        if args.is_empty() || args.len() > 2 {
            return Err(DecodeError::payload(
                Self::METHOD,
                format!("expected 1 or 2 elements, got {}", args.len()),
            ));
        }
        let mut args = args.into_iter();
        let data = args.next().unwrap_or_default();

        // The options element is either the rule type itself or a map
        // carrying it under `rasp_rule`.
        let rasp_rule = match args.next() {
            None | Some(Value::Nil) => None,
            Some(Value::Str(s)) => Some(s),
            Some(options @ Value::Map(_)) => match options.get("rasp_rule") {
                None | Some(Value::Nil) => None,
                Some(Value::Str(s)) => Some(s.clone()),
                Some(other) => {
                    return Err(DecodeError::payload(
                        Self::METHOD,
                        format!("rasp_rule must be a string, got {}", other.type_name()),
                    ))
                }
            },
            Some(other) => {
                return Err(DecodeError::payload(
                    Self::METHOD,
                    format!("options must be a string or map, got {}", other.type_name()),
                ))
            }
        };

        Ok(Self {
            data,
            rasp_rule: rasp_rule.filter(|s| !s.is_empty()),
        })
    }
}

impl RequestShutdown {
    const METHOD: &'static str = "request_shutdown";

    fn from_args(args: Vec<Value>) -> Result<Self, DecodeError> {
        if args.is_empty() || args.len() > 3 {
            return Err(DecodeError::payload(
                Self::METHOD,
                format!("expected 1 to 3 elements, got {}", args.len()),
            ));
        }
        let mut args = args.into_iter();
        let data = args.next().unwrap_or_default();
        let api_sec_samp_key = match args.next() {
            None | Some(Value::Nil) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| {
                DecodeError::payload(Self::METHOD, "api_sec_samp_key must be an unsigned integer")
            })?),
        };
        Ok(Self {
            data,
            api_sec_samp_key: api_sec_samp_key.filter(|k| *k != 0),
        })
    }
}

impl ConfigSync {
    fn from_args(args: Vec<Value>) -> Result<Self, DecodeError> {
        match args.len() {
            0 => Ok(Self::default()),
            1 | 2 => {
                let path = args.into_iter().next().unwrap_or_default();
                match path {
                    Value::Nil => Ok(Self::default()),
                    Value::Str(s) => Ok(Self {
                        rem_cfg_path: Some(s).filter(|s| !s.is_empty()),
                    }),
                    other => Err(DecodeError::payload(
                        "config_sync",
                        format!("rem_cfg_path must be a string, got {}", other.type_name()),
                    )),
                }
            }
            n => Err(DecodeError::payload(
                "config_sync",
                format!("expected at most 2 elements, got {n}"),
            )),
        }
    }
}

fn expect_string(value: Value, method: &'static str, field: &str) -> Result<String, DecodeError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(DecodeError::payload(
            method,
            format!("{field} must be a string, got {}", other.type_name()),
        )),
    }
}
