//! Actions rules can request when they match.

use std::collections::{BTreeMap, HashMap};

/// Kind of action a rule may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    BlockRequest,
    RedirectRequest,
    GenerateStack,
    GenerateSchema,
    Monitor,
}

impl ActionType {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "block_request" => Some(Self::BlockRequest),
            "redirect_request" => Some(Self::RedirectRequest),
            "generate_stack" => Some(Self::GenerateStack),
            "generate_schema" => Some(Self::GenerateSchema),
            "monitor" => Some(Self::Monitor),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockRequest => "block_request",
            Self::RedirectRequest => "redirect_request",
            Self::GenerateStack => "generate_stack",
            Self::GenerateSchema => "generate_schema",
            Self::Monitor => "monitor",
        }
    }

    /// Blocking actions interrupt the request; at most one is reported.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::BlockRequest | Self::RedirectRequest)
    }
}

/// A named action and its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub id: String,
    pub kind: ActionType,
    pub parameters: BTreeMap<String, String>,
}

impl ActionDefinition {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ActionType) -> Self {
        Self {
            id: id.into(),
            kind,
            parameters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// Action definitions keyed by id.
#[derive(Debug, Clone)]
pub struct ActionMap {
    by_id: HashMap<String, ActionDefinition>,
}

impl ActionMap {
    /// Returns the map with the built-in `block`, `stack_trace` and
    /// `extract_schema` actions.
    #[must_use]
    pub fn with_defaults() -> Self {
        let defaults = [
            ActionDefinition::new("block", ActionType::BlockRequest)
                .with_parameter("status_code", "403")
                .with_parameter("type", "auto"),
            ActionDefinition::new("stack_trace", ActionType::GenerateStack),
            ActionDefinition::new("extract_schema", ActionType::GenerateSchema),
        ];
        Self {
            by_id: defaults.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, action: ActionDefinition) {
        self.by_id.insert(action.id.clone(), action);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ActionDefinition> {
        self.by_id.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ActionMap {
    fn default() -> Self {
        Self::with_defaults()
    }
}
