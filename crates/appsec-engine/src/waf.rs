//! The built-in rule evaluator.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use appsec_proto::{EngineSettings, Value};
use serde_json::json;
use tracing::{debug, warn};

use crate::action::{ActionMap, ActionType};
use crate::engine::{Event, Listener, Subscriber};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::obfuscator::{Obfuscator, REDACTED};
use crate::operator::Operator;
use crate::ruleset::{Condition, Rule, Ruleset};

/// Deepest nesting walked when looking for scalars under an address.
const MAX_WALK_DEPTH: usize = 20;

/// Address carrying per-context processor overrides.
const PROCESSOR_ADDRESS: &str = "waf.context.processor";

struct Shared {
    rules: Vec<Rule>,
    actions: ActionMap,
    obfuscator: Obfuscator,
    timeout: Duration,
    rules_version: Option<String>,
}

/// Evaluates a compiled [`Ruleset`].
pub struct Waf {
    shared: Arc<Shared>,
}

impl Waf {
    #[must_use]
    pub fn new(ruleset: Ruleset, settings: &EngineSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                rules: ruleset.rules,
                actions: ruleset.actions,
                obfuscator: Obfuscator::new(
                    settings.obfuscator_key_regex.as_deref(),
                    settings.obfuscator_value_regex.as_deref(),
                ),
                timeout: Duration::from_micros(settings.waf_timeout_us),
                rules_version: ruleset.diagnostics.rules_version,
            }),
        }
    }
}

impl Subscriber for Waf {
    fn name(&self) -> &str {
        "waf"
    }

    fn get_listener(&self) -> Box<dyn Listener> {
        Box::new(WafListener {
            shared: Arc::clone(&self.shared),
            store: HashMap::new(),
            fired: HashSet::new(),
            runtime: Duration::ZERO,
            timeouts: 0,
        })
    }
}

struct WafListener {
    shared: Arc<Shared>,
    store: HashMap<String, Value>,
    /// Indices of rules that already matched in this context.
    fired: HashSet<usize>,
    runtime: Duration,
    timeouts: u64,
}

/// One condition satisfied by one input.
struct Match {
    operator: &'static str,
    operator_value: String,
    address: String,
    key_path: Vec<String>,
    value: String,
    highlight: String,
}

impl Listener for WafListener {
    fn call(&mut self, data: &Value, rasp_rule: Option<&str>, event: &mut Event) -> Result<()> {
        let entries = data
            .as_map()
            .ok_or(EngineError::InvalidObject(data.type_name()))?;
        let started = Instant::now();
        let ephemeral = rasp_rule.is_some();
        let published: HashSet<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();

        if !ephemeral {
            for (key, value) in entries {
                self.store.insert(key.clone(), value.clone());
            }
        }

        let shared = Arc::clone(&self.shared);

        let mut fired = Vec::new();
        for (index, rule) in shared.rules.iter().enumerate() {
            if self.fired.contains(&index) {
                continue;
            }
            if let Some(kind) = rasp_rule {
                if rule.rule_type() != Some(kind) {
                    continue;
                }
            }
            if !rule.addresses().any(|a| published.contains(a)) {
                continue;
            }
            if started.elapsed() >= shared.timeout {
                warn!(rule = %rule.id, "Evaluation budget exhausted, skipping remaining rules");
                self.timeouts += 1;
                break;
            }

            let Some(matches) = evaluate(rule, &shared.obfuscator, data, &self.store) else {
                continue;
            };
            debug!(rule = %rule.id, "Rule matched");
            event.triggers.push(trigger_json(rule, &matches));
            for id in &rule.on_match {
                match shared.actions.get(id) {
                    Some(action) => event.add_action(action),
                    None => debug!(action = %id, rule = %rule.id, "Unknown action"),
                }
            }
            if !ephemeral {
                fired.push(index);
            }
        }
        self.fired.extend(fired);

        let extract_schema = data
            .get(PROCESSOR_ADDRESS)
            .and_then(|p| p.get("extract-schema"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if extract_schema
            && !event
                .actions
                .iter()
                .any(|a| a.kind == ActionType::GenerateSchema)
        {
            if let Some(action) = shared.actions.get("extract_schema") {
                event.add_action(action);
            }
        }

        self.runtime += started.elapsed();
        Ok(())
    }

    fn submit_metrics(
        &mut self,
        meta: &mut BTreeMap<String, String>,
        metrics: &mut BTreeMap<String, f64>,
    ) {
        *metrics.entry(metrics::WAF_DURATION.to_owned()).or_default() +=
            self.runtime.as_secs_f64() * 1_000_000.0;
        if self.timeouts > 0 {
            metrics.insert(metrics::WAF_TIMEOUTS.to_owned(), self.timeouts as f64);
        }
        if let Some(version) = &self.shared.rules_version {
            meta.insert(metrics::EVENT_RULES_VERSION.to_owned(), version.clone());
        }
    }
}

/// Returns the match of every condition, or `None` if any condition fails.
fn evaluate(
    rule: &Rule,
    obfuscator: &Obfuscator,
    data: &Value,
    store: &HashMap<String, Value>,
) -> Option<Vec<Match>> {
    rule.conditions
        .iter()
        .map(|condition| match_condition(condition, obfuscator, data, store))
        .collect()
}

fn match_condition(
    condition: &Condition,
    obfuscator: &Obfuscator,
    data: &Value,
    store: &HashMap<String, Value>,
) -> Option<Match> {
    condition.inputs.iter().find_map(|input| {
        let root = data
            .get(&input.address)
            .or_else(|| store.get(&input.address))?;
        let target = follow(root, &input.key_path)?;
        let mut key_path = input.key_path.clone();
        let (mut value, mut highlight) =
            find_match(target, &condition.operator, &mut key_path, 0)?;
        if obfuscator.should_redact(&key_path, &value) {
            value = REDACTED.to_owned();
            highlight = REDACTED.to_owned();
        }
        Some(Match {
            operator: condition.operator.name(),
            operator_value: condition.operator.value().to_owned(),
            address: input.address.clone(),
            key_path,
            value,
            highlight,
        })
    })
}

fn follow<'v>(root: &'v Value, key_path: &[String]) -> Option<&'v Value> {
    key_path.iter().try_fold(root, |value, key| match value {
        Value::Map(_) => value.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Walks `value` depth-first for a scalar the operator matches. On success
/// `path` points at the matching scalar.
fn find_match(
    value: &Value,
    operator: &Operator,
    path: &mut Vec<String>,
    depth: usize,
) -> Option<(String, String)> {
    match value {
        Value::Map(entries) if depth < MAX_WALK_DEPTH => {
            for (key, child) in entries {
                path.push(key.clone());
                if let Some(found) = find_match(child, operator, path, depth + 1) {
                    return Some(found);
                }
                path.pop();
            }
            None
        }
        Value::Array(items) if depth < MAX_WALK_DEPTH => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                if let Some(found) = find_match(child, operator, path, depth + 1) {
                    return Some(found);
                }
                path.pop();
            }
            None
        }
        scalar => {
            let text = scalar.to_scalar_string()?;
            let highlight = operator.matches(&text)?;
            Some((text, highlight))
        }
    }
}

fn trigger_json(rule: &Rule, matches: &[Match]) -> String {
    let rule_matches: Vec<_> = matches
        .iter()
        .map(|m| {
            json!({
                "operator": m.operator,
                "operator_value": m.operator_value,
                "parameters": [{
                    "address": m.address,
                    "key_path": m.key_path,
                    "value": m.value,
                    "highlight": [m.highlight],
                }],
            })
        })
        .collect();
    json!({
        "rule": {
            "id": rule.id,
            "name": rule.name,
            "tags": rule.tags,
            "on_match": rule.on_match,
        },
        "rule_matches": rule_matches,
    })
    .to_string()
}
