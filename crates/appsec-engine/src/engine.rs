//! The engine and its per-request contexts.

use std::collections::BTreeMap;
use std::sync::Arc;

use appsec_proto::{EngineSettings, Value};
use tracing::{debug, info};

use crate::action::ActionDefinition;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::ruleset::{Diagnostics, Ruleset};
use crate::waf::Waf;

/// A rule evaluator taking part in every context.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a fresh listener holding one request's state.
    fn get_listener(&self) -> Box<dyn Listener>;
}

/// Per-request state of a [`Subscriber`].
pub trait Listener: Send {
    /// Evaluates newly published data, recording matches into `event`.
    fn call(&mut self, data: &Value, rasp_rule: Option<&str>, event: &mut Event) -> Result<()>;

    /// Adds end-of-request telemetry.
    fn submit_metrics(
        &mut self,
        meta: &mut BTreeMap<String, String>,
        metrics: &mut BTreeMap<String, f64>,
    );
}

/// Matches accumulated during one publish.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub triggers: Vec<String>,
    pub actions: Vec<ActionDefinition>,
}

impl Event {
    /// Adds an action unless one with the same id is present. A second
    /// blocking action is dropped.
    pub fn add_action(&mut self, action: &ActionDefinition) {
        let duplicate = self.actions.iter().any(|a| {
            a.id == action.id || (a.kind.is_blocking() && action.kind.is_blocking())
        });
        if !duplicate {
            self.actions.push(action.clone());
        }
    }
}

/// Summary code of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Record,
    Block,
}

/// Outcome of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResult {
    pub actions: Vec<ActionDefinition>,
    pub triggers: Vec<String>,
}

impl EngineResult {
    #[must_use]
    pub fn code(&self) -> ResultCode {
        if self.actions.iter().any(|a| a.kind.is_blocking()) {
            ResultCode::Block
        } else if !self.triggers.is_empty() || !self.actions.is_empty() {
            ResultCode::Record
        } else {
            ResultCode::Ok
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.triggers.is_empty()
    }
}

/// A set of subscribers built from one rules document.
///
/// The engine is immutable once shared; contexts carry all per-request state.
pub struct Engine {
    subscribers: Vec<Arc<dyn Subscriber>>,
    diagnostics: Diagnostics,
}

impl Engine {
    /// Builds an engine from the configured rules file, or the bundled rules
    /// when none is set.
    pub fn create(settings: &EngineSettings) -> Result<Self> {
        let ruleset = match settings.rules_file.as_deref() {
            Some(path) => Ruleset::from_file(path)?,
            None => Ruleset::bundled()?,
        };
        let diagnostics = ruleset.diagnostics.clone();
        info!(
            rules_file = settings.rules_file.as_deref().unwrap_or("<bundled>"),
            loaded = diagnostics.loaded_count(),
            failed = diagnostics.failed_count(),
            "Rules loaded"
        );

        let mut engine = Self {
            subscribers: Vec::new(),
            diagnostics,
        };
        engine.subscribe(Arc::new(Waf::new(ruleset, settings)));
        Ok(engine)
    }

    /// Adds a subscriber to every context created from now on.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) {
        debug!(name = subscriber.name(), "Subscriber added");
        self.subscribers.push(subscriber);
    }

    /// Opens a context for one request.
    #[must_use]
    pub fn context(&self) -> Context {
        Context {
            listeners: self.subscribers.iter().map(|s| s.get_listener()).collect(),
        }
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Adds rule loading telemetry, reported once per `client_init`.
    pub fn init_metrics(
        &self,
        meta: &mut BTreeMap<String, String>,
        metrics: &mut BTreeMap<String, f64>,
    ) {
        meta.insert(metrics::WAF_VERSION.to_owned(), crate::VERSION.to_owned());
        meta.insert(
            metrics::EVENT_RULES_ERRORS.to_owned(),
            self.diagnostics.errors_json(),
        );
        metrics.insert(
            metrics::EVENT_RULES_LOADED.to_owned(),
            self.diagnostics.loaded_count() as f64,
        );
        metrics.insert(
            metrics::EVENT_RULES_FAILED.to_owned(),
            self.diagnostics.failed_count() as f64,
        );
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field(
                "subscribers",
                &self.subscribers.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Evaluation state for one request.
pub struct Context {
    listeners: Vec<Box<dyn Listener>>,
}

impl Context {
    /// Publishes a map of addresses to values.
    ///
    /// With `rasp_rule`, only rules of that type run and the data is not
    /// retained for later publishes.
    pub fn publish(&mut self, data: &Value, rasp_rule: Option<&str>) -> Result<EngineResult> {
        if !data.is_map() {
            return Err(EngineError::InvalidObject(data.type_name()));
        }

        let mut event = Event::default();
        for listener in &mut self.listeners {
            listener.call(data, rasp_rule, &mut event)?;
        }
        Ok(EngineResult {
            actions: event.actions,
            triggers: event.triggers,
        })
    }

    /// Collects end-of-request telemetry from every listener.
    pub fn get_metrics(
        &mut self,
        meta: &mut BTreeMap<String, String>,
        metrics: &mut BTreeMap<String, f64>,
    ) {
        for listener in &mut self.listeners {
            listener.submit_metrics(meta, metrics);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
