//! Rules document loading.
//!
//! A document is JSON:
//!
//! ```json
//! {
//!   "version": "2.1",
//!   "metadata": { "rules_version": "1.10.0" },
//!   "rules": [
//!     {
//!       "id": "blk-001-001",
//!       "name": "Block IP addresses",
//!       "tags": { "type": "block_ip", "category": "security_response" },
//!       "conditions": [
//!         {
//!           "operator": "ip_match",
//!           "parameters": {
//!             "inputs": [{ "address": "http.client_ip" }],
//!             "list": ["192.168.1.1"]
//!           }
//!         }
//!       ],
//!       "on_match": ["block"]
//!     }
//!   ],
//!   "actions": []
//! }
//! ```
//!
//! Rules are compiled one by one. A rule that fails to compile is counted and
//! reported in [`Diagnostics`] without failing the whole document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::action::{ActionDefinition, ActionMap, ActionType};
use crate::error::{EngineError, Result};
use crate::operator::{Operator, OperatorParams};

const BUNDLED_RULES: &str = include_str!("rules/recommended.json");

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub conditions: Vec<Condition>,
    pub on_match: Vec<String>,
}

impl Rule {
    /// Returns the rule type tag, used to select rules for targeted runs.
    #[must_use]
    pub fn rule_type(&self) -> Option<&str> {
        self.tags.get("type").map(String::as_str)
    }

    /// Iterates over every address the rule reads.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.conditions
            .iter()
            .flat_map(|c| c.inputs.iter().map(|i| i.address.as_str()))
    }
}

/// All inputs of a condition are tested with one operator; any hit satisfies it.
#[derive(Debug, Clone)]
pub struct Condition {
    pub operator: Operator,
    pub inputs: Vec<Input>,
}

/// An address, optionally narrowed by a key path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Input {
    pub address: String,
    #[serde(default)]
    pub key_path: Vec<String>,
}

/// Outcome of loading a rules document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
    /// Error message to ids of the rules that hit it.
    pub errors: BTreeMap<String, Vec<String>>,
    pub rules_version: Option<String>,
}

impl Diagnostics {
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Returns the error map as JSON; `{}` when every rule loaded.
    #[must_use]
    pub fn errors_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_else(|_| "{}".to_owned())
    }

    fn record_failure(&mut self, id: String, message: String) {
        self.errors.entry(message).or_default().push(id.clone());
        self.failed.push(id);
    }
}

/// A compiled rules document.
#[derive(Debug, Clone)]
pub struct Ruleset {
    pub rules: Vec<Rule>,
    pub actions: ActionMap,
    pub diagnostics: Diagnostics,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    metadata: Option<RawMetadata>,
    rules: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    actions: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawMetadata {
    rules_version: Option<String>,
}

#[derive(Deserialize)]
struct RawRule {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    conditions: Vec<RawCondition>,
    #[serde(default)]
    on_match: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawCondition {
    operator: String,
    parameters: RawParameters,
}

#[derive(Deserialize)]
struct RawParameters {
    inputs: Vec<Input>,
    #[serde(flatten)]
    operator: OperatorParams,
}

#[derive(Deserialize)]
struct RawAction {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
}

const fn default_enabled() -> bool {
    true
}

impl Ruleset {
    /// Loads a document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                EngineError::RulesFileNotFound(path.to_path_buf())
            } else {
                EngineError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::parse(&contents)
    }

    /// Loads the rules bundled with the engine.
    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_RULES)
    }

    /// Parses and compiles a document.
    pub fn parse(json: &str) -> Result<Self> {
        let document: RawDocument =
            serde_json::from_str(json).map_err(|e| EngineError::Parsing(e.to_string()))?;
        let raw_rules = document
            .rules
            .ok_or_else(|| EngineError::Parsing("document has no rules array".to_owned()))?;

        let mut diagnostics = Diagnostics {
            rules_version: document.metadata.and_then(|m| m.rules_version),
            ..Diagnostics::default()
        };

        let mut rules = Vec::with_capacity(raw_rules.len());
        for (index, raw) in raw_rules.into_iter().enumerate() {
            let id = raw
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| format!("index:{index}"), str::to_owned);
            match compile_rule(raw) {
                Ok(Some(rule)) => {
                    diagnostics.loaded.push(rule.id.clone());
                    rules.push(rule);
                }
                Ok(None) => {}
                Err(message) => diagnostics.record_failure(id, message),
            }
        }

        if rules.is_empty() {
            return Err(EngineError::Parsing(format!(
                "no valid rules found ({} failed)",
                diagnostics.failed_count()
            )));
        }

        let mut actions = ActionMap::with_defaults();
        for raw in document.actions {
            match compile_action(raw) {
                Ok(action) => actions.insert(action),
                Err(message) => tracing::warn!(error = %message, "Skipping invalid action"),
            }
        }

        Ok(Self {
            rules,
            actions,
            diagnostics,
        })
    }
}

fn compile_rule(raw: serde_json::Value) -> std::result::Result<Option<Rule>, String> {
    let raw: RawRule = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    if !raw.enabled {
        return Ok(None);
    }
    if raw.conditions.is_empty() {
        return Err("rule has no conditions".to_owned());
    }

    let conditions = raw
        .conditions
        .into_iter()
        .map(|c| {
            if c.parameters.inputs.is_empty() {
                return Err("condition has no inputs".to_owned());
            }
            Ok(Condition {
                operator: Operator::compile(&c.operator, &c.parameters.operator)?,
                inputs: c.parameters.inputs,
            })
        })
        .collect::<std::result::Result<_, _>>()?;

    Ok(Some(Rule {
        id: raw.id,
        name: raw.name,
        tags: raw.tags,
        conditions,
        on_match: raw.on_match,
    }))
}

fn compile_action(raw: serde_json::Value) -> std::result::Result<ActionDefinition, String> {
    let raw: RawAction = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    let kind = ActionType::from_name(&raw.kind)
        .ok_or_else(|| format!("unknown action type '{}'", raw.kind))?;
    let mut action = ActionDefinition::new(raw.id, kind);
    for (key, value) in raw.parameters {
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => return Err(format!("action parameter '{key}' has unsupported value {other}")),
        };
        action.parameters.insert(key, value);
    }
    Ok(action)
}
