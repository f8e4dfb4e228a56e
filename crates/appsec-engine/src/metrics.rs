//! Span tag names reported by the engine.

/// Number of rules loaded.
pub const EVENT_RULES_LOADED: &str = "_dd.appsec.event_rules.loaded";
/// Number of rules that failed to load.
pub const EVENT_RULES_FAILED: &str = "_dd.appsec.event_rules.error_count";
/// JSON map of load error messages to rule ids.
pub const EVENT_RULES_ERRORS: &str = "_dd.appsec.event_rules.errors";
/// Version declared by the rules document.
pub const EVENT_RULES_VERSION: &str = "_dd.appsec.event_rules.version";
/// Engine version.
pub const WAF_VERSION: &str = "_dd.appsec.waf.version";
/// Cumulative evaluation time for a request, in microseconds.
pub const WAF_DURATION: &str = "_dd.appsec.waf.duration";
/// Number of evaluations cut short by the time budget.
pub const WAF_TIMEOUTS: &str = "_dd.appsec.waf.timeouts";
