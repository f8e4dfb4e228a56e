//! Responses sent by the helper to the extension.
//!
//! A frame carries `[[type_name, payload], ...]`. Decoding is provided so
//! peers and tests can read responses back.

use std::collections::BTreeMap;

use crate::error::DecodeError;
use crate::value::Value;

/// Verdict of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Nothing to do.
    Ok,
    /// Keep the request's events.
    Record,
    /// Block the request.
    Block,
    /// Redirect the request.
    Redirect,
    /// Collect a stack trace.
    StackTrace,
    /// Extract the API schema.
    ExtractSchema,
}

impl Verdict {
    /// Returns the wire name of this verdict.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Record => "record",
            Self::Block => "block",
            Self::Redirect => "redirect",
            Self::StackTrace => "stack_trace",
            Self::ExtractSchema => "extract_schema",
        }
    }

    /// Parses a wire verdict name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ok" => Some(Self::Ok),
            "record" => Some(Self::Record),
            "block" => Some(Self::Block),
            "redirect" => Some(Self::Redirect),
            "stack_trace" => Some(Self::StackTrace),
            "extract_schema" => Some(Self::ExtractSchema),
            _ => None,
        }
    }

    /// Whether this verdict produces a security event on the caller side.
    #[must_use]
    pub const fn is_event(self) -> bool {
        matches!(self, Self::Record | Self::Block | Self::Redirect)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action for the caller to take, with string parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verdict: Verdict,
    pub parameters: BTreeMap<String, String>,
}

impl Action {
    #[must_use]
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameters(verdict: Verdict, parameters: BTreeMap<String, String>) -> Self {
        Self { verdict, parameters }
    }
}

/// Outcome of `client_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Ok,
    Fail,
}

impl InitStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
        }
    }
}

/// `client_init` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInitResponse {
    pub status: InitStatus,
    /// Helper version string.
    pub version: String,
    pub errors: Vec<String>,
    pub meta: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

/// Body shared by `request_init`, `request_exec` and `request_shutdown`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestResponse {
    pub actions: Vec<Action>,
    pub triggers: Vec<String>,
    /// Whether the caller must retain the trace.
    pub force_keep: bool,
    pub settings: BTreeMap<String, String>,
}

/// `request_shutdown` response: the request body plus end-of-request telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestShutdownResponse {
    pub response: RequestResponse,
    pub meta: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

/// A response to a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ClientInit(ClientInitResponse),
    RequestInit(RequestResponse),
    RequestExec(RequestResponse),
    RequestShutdown(RequestShutdownResponse),
    ConfigSync,
    ConfigFeatures { enabled: bool },
    /// Malformed or out-of-order interaction.
    Error,
}

impl Response {
    /// Returns the wire type name of this response.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::ClientInit(_) => "client_init",
            Self::RequestInit(_) => "request_init",
            Self::RequestExec(_) => "request_exec",
            Self::RequestShutdown(_) => "request_shutdown",
            Self::ConfigSync => "config_sync",
            Self::ConfigFeatures { .. } => "config_features",
            Self::Error => "error",
        }
    }

    /// Encodes the payload of this response.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::ClientInit(r) => Value::Array(vec![
                Value::from(r.status.as_str()),
                Value::from(r.version.as_str()),
                Value::Array(r.errors.iter().map(|e| Value::from(e.as_str())).collect()),
                string_map(&r.meta),
                float_map(&r.metrics),
            ]),
            Self::RequestInit(r) | Self::RequestExec(r) => Value::Array(request_fields(r)),
            Self::RequestShutdown(r) => {
                let mut fields = request_fields(&r.response);
                fields.push(string_map(&r.meta));
                fields.push(float_map(&r.metrics));
                Value::Array(fields)
            }
            Self::ConfigFeatures { enabled } => Value::Array(vec![Value::Bool(*enabled)]),
            Self::ConfigSync | Self::Error => Value::Array(vec![]),
        }
    }

    /// Encodes this response as `[type_name, payload]`.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        Value::Array(vec![Value::from(self.type_name()), self.to_payload()])
    }

    /// Decodes a response from its type name and payload.
    pub fn from_parts(type_name: &str, payload: Value) -> Result<Self, DecodeError> {
        let Value::Array(fields) = payload else {
            return Err(DecodeError::InvalidShape(format!(
                "{type_name} payload must be an array"
            )));
        };
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();

        let response = match type_name {
            "client_init" => {
                let status = match next().as_str() {
                    Some("ok") => InitStatus::Ok,
                    Some("fail") => InitStatus::Fail,
                    _ => return Err(shape("client_init status must be ok or fail")),
                };
                let version = next().as_str().map(str::to_owned).unwrap_or_default();
                let errors = read_strings(next())?;
                let meta = read_string_map(next())?;
                let metrics = read_float_map(next())?;
                Self::ClientInit(ClientInitResponse {
                    status,
                    version,
                    errors,
                    meta,
                    metrics,
                })
            }
            "request_init" => Self::RequestInit(read_request(&mut next)?),
            "request_exec" => Self::RequestExec(read_request(&mut next)?),
            "request_shutdown" => {
                let response = read_request(&mut next)?;
                let meta = read_string_map(next())?;
                let metrics = read_float_map(next())?;
                Self::RequestShutdown(RequestShutdownResponse {
                    response,
                    meta,
                    metrics,
                })
            }
            "config_features" => Self::ConfigFeatures {
                enabled: next()
                    .as_bool()
                    .ok_or_else(|| shape("config_features payload must hold a bool"))?,
            },
            "config_sync" => Self::ConfigSync,
            "error" => Self::Error,
            other => return Err(DecodeError::UnknownMethod(other.to_owned())),
        };
        Ok(response)
    }

    /// Decodes a `[[type_name, payload], ...]` batch.
    pub fn decode_batch(value: Value) -> Result<Vec<Self>, DecodeError> {
        let Value::Array(items) = value else {
            return Err(shape("response batch must be an array"));
        };
        items
            .into_iter()
            .map(|item| {
                let Value::Array(parts) = item else {
                    return Err(shape("response must be [type, payload]"));
                };
                let [type_name, payload]: [Value; 2] = parts
                    .try_into()
                    .map_err(|_| shape("response must be [type, payload]"))?;
                let type_name = type_name
                    .as_str()
                    .ok_or_else(|| shape("response type must be a string"))?
                    .to_owned();
                Self::from_parts(&type_name, payload)
            })
            .collect()
    }
}

fn shape(reason: &str) -> DecodeError {
    DecodeError::InvalidShape(reason.to_owned())
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    map.iter()
        .map(|(k, v)| (k.as_str(), Value::from(v.as_str())))
        .collect()
}

fn float_map(map: &BTreeMap<String, f64>) -> Value {
    map.iter().map(|(k, v)| (k.as_str(), Value::Float(*v))).collect()
}

fn request_fields(r: &RequestResponse) -> Vec<Value> {
    let actions = r
        .actions
        .iter()
        .map(|a| {
            Value::Array(vec![
                Value::from(a.verdict.as_str()),
                string_map(&a.parameters),
            ])
        })
        .collect();
    vec![
        Value::Array(actions),
        Value::Array(r.triggers.iter().map(|t| Value::from(t.as_str())).collect()),
        Value::Bool(r.force_keep),
        string_map(&r.settings),
    ]
}

fn read_request(next: &mut impl FnMut() -> Value) -> Result<RequestResponse, DecodeError> {
    let Value::Array(raw_actions) = next() else {
        return Err(shape("actions must be an array"));
    };
    let actions = raw_actions
        .into_iter()
        .map(|raw| {
            let Value::Array(parts) = raw else {
                return Err(shape("action must be [verdict, parameters]"));
            };
            let mut parts = parts.into_iter();
            let verdict = parts
                .next()
                .and_then(|v| v.as_str().and_then(Verdict::from_name))
                .ok_or_else(|| shape("unknown action verdict"))?;
            let parameters = read_string_map(parts.next().unwrap_or_default())?;
            Ok(Action::with_parameters(verdict, parameters))
        })
        .collect::<Result<_, _>>()?;
    let triggers = read_strings(next())?;
    let force_keep = next().as_bool().unwrap_or(false);
    let settings = read_string_map(next())?;
    Ok(RequestResponse {
        actions,
        triggers,
        force_keep,
        settings,
    })
}

fn read_strings(value: Value) -> Result<Vec<String>, DecodeError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s),
                _ => Err(shape("expected an array of strings")),
            })
            .collect(),
        _ => Err(shape("expected an array of strings")),
    }
}

fn read_string_map(value: Value) -> Result<BTreeMap<String, String>, DecodeError> {
    match value {
        Value::Nil => Ok(BTreeMap::new()),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| {
                v.to_scalar_string()
                    .map(|v| (k, v))
                    .ok_or_else(|| shape("expected string values"))
            })
            .collect(),
        _ => Err(shape("expected a map")),
    }
}

fn read_float_map(value: Value) -> Result<BTreeMap<String, f64>, DecodeError> {
    match value {
        Value::Nil => Ok(BTreeMap::new()),
        Value::Map(entries) => entries
            .into_iter()
            .map(|(k, v)| {
                v.as_f64()
                    .map(|v| (k, v))
                    .ok_or_else(|| shape("expected numeric values"))
            })
            .collect(),
        _ => Err(shape("expected a map")),
    }
}
