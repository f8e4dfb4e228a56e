//! Rule evaluation engine for the AppSec helper.
//!
//! An [`Engine`] is built once per rules document and shared. Each request
//! gets its own [`Context`], which accumulates published addresses and
//! reports matches as JSON triggers plus the actions the matching rules ask
//! for.
//!
//! ```
//! use appsec_engine::{Engine, ResultCode};
//! use appsec_proto::{EngineSettings, Value};
//!
//! let engine = Engine::create(&EngineSettings::default()).unwrap();
//! let mut context = engine.context();
//!
//! let data: Value = [("server.request.query", Value::from("harmless"))]
//!     .into_iter()
//!     .collect();
//! let result = context.publish(&data, None).unwrap();
//! assert_eq!(result.code(), ResultCode::Ok);
//! ```

mod action;
mod engine;
mod error;
pub mod metrics;
mod obfuscator;
mod operator;
mod ruleset;
mod waf;

pub use action::{ActionDefinition, ActionMap, ActionType};
pub use engine::{Context, Engine, EngineResult, Event, Listener, ResultCode, Subscriber};
pub use error::{EngineError, Result};
pub use obfuscator::{Obfuscator, DEFAULT_KEY_REGEX, REDACTED};
pub use operator::{IpNetwork, Operator};
pub use ruleset::{Condition, Diagnostics, Input, Rule, Ruleset};
pub use waf::Waf;

/// Engine version reported in telemetry.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
