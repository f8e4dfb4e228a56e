//! Per-connection session state machine.
//!
//! A [`Client`] starts uninitialised and accepts only `client_init`. Once a
//! service is bound, `request_init` opens a request scope that
//! `request_exec` reuses and `request_shutdown` closes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use appsec_engine::{ActionType, Context, EngineResult};
use appsec_proto::{
    Action, ClientInit, ClientInitResponse, ConfigSync, EngineSettings, InitStatus,
    RemoteConfigSettings, Request, RequestExec, RequestInit, RequestResponse, RequestShutdown,
    RequestShutdownResponse, Response, ServiceIdentity, Value, Verdict,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::clock::{Clock, SystemClock};
use crate::error::{BrokerError, DispatchError};
use crate::limiter::RateLimiter;
use crate::service::{AsmStatus, ServiceCache, ServiceHandle};
use crate::transport::Transport;

/// Key added to shutdown data when the schema sampler picks a request.
const SCHEMA_PROCESSOR_ADDRESS: &str = "waf.context.processor";

/// Settings key reporting the user instrumentation mode.
const AUTO_USER_INSTRUM: &str = "auto_user_instrum";

/// State bound by a successful `client_init`.
struct Session {
    service: ServiceHandle,
    limiter: RateLimiter,
    enabled_configuration: Option<bool>,
    engine_settings: EngineSettings,
    rc_settings: RemoteConfigSettings,
    identity: ServiceIdentity,
}

impl Session {
    /// Local choice when set, the service's remote status otherwise.
    fn enabled(&self) -> bool {
        self.enabled_configuration
            .unwrap_or_else(|| self.service.config().asm_status() == AsmStatus::Enabled)
    }

    fn response(&mut self, result: &EngineResult) -> RequestResponse {
        let force_keep = !result.triggers.is_empty() && self.limiter.allow();
        let mut settings = BTreeMap::new();
        settings.insert(
            AUTO_USER_INSTRUM.to_owned(),
            self.service
                .config()
                .auto_user_instrum_mode()
                .as_str()
                .to_owned(),
        );
        RequestResponse {
            actions: massage_actions(result),
            triggers: result.triggers.clone(),
            force_keep,
            settings,
        }
    }
}

/// One peer's session.
pub struct Client {
    cache: ServiceCache,
    clock: Arc<dyn Clock>,
    client_init_timeout: Duration,
    session: Option<Session>,
    scope: Option<Context>,
}

impl Client {
    #[must_use]
    pub fn new(cache: ServiceCache, client_init_timeout: Duration) -> Self {
        Self::with_clock(cache, client_init_timeout, Arc::new(SystemClock))
    }

    /// Uses `clock` for the session's rate limiter.
    #[must_use]
    pub fn with_clock(
        cache: ServiceCache,
        client_init_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            clock,
            client_init_timeout,
            session: None,
            scope: None,
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Whether a request scope is open.
    #[must_use]
    pub const fn in_request(&self) -> bool {
        self.scope.is_some()
    }

    /// The bound service, once initialised.
    #[must_use]
    pub fn service(&self) -> Option<&ServiceHandle> {
        self.session.as_ref().map(|s| &s.service)
    }

    /// Handles one request. Rejected requests yield [`Response::Error`].
    pub fn dispatch(&mut self, request: Request) -> Response {
        let method = request.method();
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(method, error = %e, "Request rejected");
                Response::Error
            }
        }
    }

    fn handle(&mut self, request: Request) -> Result<Response, DispatchError> {
        match request {
            Request::ClientInit(init) => self.client_init(*init),
            Request::ConfigSync(sync) => self.config_sync(sync),
            Request::RequestInit(req) => self.request_init(req),
            Request::RequestExec(req) => self.request_exec(req),
            Request::RequestShutdown(req) => self.request_shutdown(req),
        }
    }

    fn client_init(&mut self, init: ClientInit) -> Result<Response, DispatchError> {
        if self.session.is_some() {
            return Err(DispatchError::AlreadyInitialized);
        }

        info!(
            pid = init.pid,
            client_version = %init.client_version,
            runtime_version = %init.runtime_version,
            service = %init.service_identity.service_name,
            "Client init"
        );

        let service = match self.cache.get_or_create(
            &init.engine_settings,
            &init.rc_settings,
            &init.service_identity,
        ) {
            Ok(service) => service,
            Err(e) => {
                warn!(error = %e, "Failed to create service");
                return Ok(Response::ClientInit(ClientInitResponse {
                    status: InitStatus::Fail,
                    version: crate::VERSION.to_owned(),
                    errors: vec![e.to_string()],
                    meta: BTreeMap::new(),
                    metrics: BTreeMap::new(),
                }));
            }
        };

        let mut meta = BTreeMap::new();
        let mut metrics = BTreeMap::new();
        service.engine().init_metrics(&mut meta, &mut metrics);
        let errors = service
            .engine()
            .diagnostics()
            .errors
            .keys()
            .cloned()
            .collect();

        let session = Session {
            service,
            limiter: RateLimiter::new(
                init.engine_settings.trace_rate_limit,
                Arc::clone(&self.clock),
            ),
            enabled_configuration: init.enabled_configuration,
            engine_settings: init.engine_settings,
            rc_settings: init.rc_settings,
            identity: init.service_identity,
        };
        debug!(enabled = session.enabled(), "Session initialised");
        self.session = Some(session);

        Ok(Response::ClientInit(ClientInitResponse {
            status: InitStatus::Ok,
            version: crate::VERSION.to_owned(),
            errors,
            meta,
            metrics,
        }))
    }

    fn config_sync(&mut self, sync: ConfigSync) -> Result<Response, DispatchError> {
        let session = self
            .session
            .as_mut()
            .ok_or(DispatchError::NotInitialized("config_sync"))?;

        if let Some(path) = sync.rem_cfg_path.filter(|p| !p.is_empty()) {
            if path != session.rc_settings.shmem_path {
                let rc_settings = RemoteConfigSettings {
                    shmem_path: path,
                    ..session.rc_settings.clone()
                };
                match self.cache.get_or_create(
                    &session.engine_settings,
                    &rc_settings,
                    &session.identity,
                ) {
                    Ok(service) => {
                        info!(path = %rc_settings.shmem_path, "Remote config path changed");
                        session.service = service;
                        session.rc_settings = rc_settings;
                    }
                    Err(e) => warn!(
                        error = %e,
                        path = %rc_settings.shmem_path,
                        "Failed to switch remote config path, keeping current service"
                    ),
                }
            }
        }

        if session.enabled() {
            Ok(Response::ConfigFeatures { enabled: true })
        } else {
            Ok(Response::ConfigSync)
        }
    }

    fn request_init(&mut self, req: RequestInit) -> Result<Response, DispatchError> {
        let session = self
            .session
            .as_mut()
            .ok_or(DispatchError::NotInitialized("request_init"))?;

        // A new request supersedes any scope left open by the previous one.
        self.scope = None;
        if !session.enabled() {
            return Ok(Response::ConfigFeatures { enabled: false });
        }

        let mut context = session.service.engine().context();
        let result = context.publish(&req.data, None)?;
        self.scope = Some(context);
        Ok(Response::RequestInit(session.response(&result)))
    }

    fn request_exec(&mut self, req: RequestExec) -> Result<Response, DispatchError> {
        let session = self
            .session
            .as_mut()
            .ok_or(DispatchError::NotInitialized("request_exec"))?;
        if self.scope.is_none() {
            return Err(DispatchError::NoRequestScope("request_exec"));
        }

        if !session.enabled() {
            self.scope = None;
            return Ok(Response::ConfigFeatures { enabled: false });
        }

        let Some(context) = self.scope.as_mut() else {
            return Err(DispatchError::NoRequestScope("request_exec"));
        };
        let result = context.publish(&req.data, req.rasp_rule.as_deref())?;
        Ok(Response::RequestExec(session.response(&result)))
    }

    fn request_shutdown(&mut self, req: RequestShutdown) -> Result<Response, DispatchError> {
        let session = self
            .session
            .as_mut()
            .ok_or(DispatchError::NotInitialized("request_shutdown"))?;
        let mut context = self
            .scope
            .take()
            .ok_or(DispatchError::NoRequestScope("request_shutdown"))?;

        if !session.enabled() {
            return Ok(Response::ConfigFeatures { enabled: false });
        }

        let mut data = req.data;
        let sampled = req.api_sec_samp_key.is_some_and(|key| {
            session
                .service
                .schema_sampler()
                .is_some_and(|sampler| sampler.hit(key))
        });
        if sampled {
            data.insert(
                SCHEMA_PROCESSOR_ADDRESS,
                Value::from_iter([("extract-schema", Value::from(true))]),
            );
        }

        let result = context.publish(&data, None)?;
        let mut meta = BTreeMap::new();
        let mut metrics = BTreeMap::new();
        context.get_metrics(&mut meta, &mut metrics);

        Ok(Response::RequestShutdown(RequestShutdownResponse {
            response: session.response(&result),
            meta,
            metrics,
        }))
    }

    /// Serves requests from `broker` until the peer leaves, the stream
    /// loses framing, or `cancel` fires.
    ///
    /// Only the wait for `client_init` is bounded in time.
    pub async fn run<T: Transport>(&mut self, broker: &mut Broker<T>, cancel: CancellationToken) {
        loop {
            let timeout = (!self.is_initialized()).then_some(self.client_init_timeout);
            let received = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Session cancelled");
                    break;
                }
                received = broker.recv(timeout) => received,
            };

            let response = match received {
                Ok(request) => self.dispatch(request),
                Err(BrokerError::Disconnected) => {
                    debug!("Peer disconnected");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Rejected malformed message");
                    Response::Error
                }
                Err(e) => {
                    warn!(error = %e, "Closing session");
                    break;
                }
            };

            if !broker.send(&[response]).await {
                debug!("Failed to send response, closing session");
                break;
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("initialized", &self.is_initialized())
            .field("in_request", &self.in_request())
            .field("service", &self.service())
            .finish_non_exhaustive()
    }
}

const fn verdict_for(kind: ActionType) -> Option<Verdict> {
    match kind {
        ActionType::BlockRequest => Some(Verdict::Block),
        ActionType::RedirectRequest => Some(Verdict::Redirect),
        ActionType::GenerateStack => Some(Verdict::StackTrace),
        ActionType::GenerateSchema => Some(Verdict::ExtractSchema),
        ActionType::Monitor => None,
    }
}

/// Converts engine actions into response actions.
///
/// The caller only keeps triggers alongside a `record` (or `block`/`redirect`)
/// action, so one is added when triggers would otherwise be dropped and when
/// a stack trace has nothing to attach to.
fn massage_actions(result: &EngineResult) -> Vec<Action> {
    let mut actions: Vec<Action> = result
        .actions
        .iter()
        .filter_map(|a| {
            verdict_for(a.kind).map(|v| Action::with_parameters(v, a.parameters.clone()))
        })
        .collect();

    let has_event = actions.iter().any(|a| a.verdict.is_event());
    let has_stack = actions.iter().any(|a| a.verdict == Verdict::StackTrace);
    if !has_event && (has_stack || !result.triggers.is_empty()) {
        actions.push(Action::new(Verdict::Record));
    }

    if actions.is_empty() {
        actions.push(Action::new(Verdict::Ok));
    }
    actions
}

#[cfg(test)]
mod tests {
    use appsec_engine::ActionDefinition;
    use appsec_proto::SchemaExtraction;

    use super::*;
    use crate::clock::ManualClock;

    fn client_init(enabled: Option<bool>, settings: EngineSettings) -> Request {
        Request::ClientInit(Box::new(ClientInit {
            pid: 42,
            client_version: "1.0.0".to_owned(),
            runtime_version: "8.3.0".to_owned(),
            enabled_configuration: enabled,
            engine_settings: settings,
            rc_settings: RemoteConfigSettings::default(),
            service_identity: ServiceIdentity::new("web", "test", std::iter::empty::<String>()),
        }))
    }

    fn map(entries: &[(&str, &str)]) -> Value {
        entries
            .iter()
            .map(|(k, v)| (*k, Value::from(*v)))
            .collect()
    }

    fn request_init(data: Value) -> Request {
        Request::RequestInit(RequestInit { data })
    }

    fn request_exec(data: Value) -> Request {
        Request::RequestExec(RequestExec {
            data,
            rasp_rule: None,
        })
    }

    fn request_shutdown(data: Value, key: Option<u64>) -> Request {
        Request::RequestShutdown(RequestShutdown {
            data,
            api_sec_samp_key: key,
        })
    }

    fn config_sync() -> Request {
        Request::ConfigSync(ConfigSync { rem_cfg_path: None })
    }

    fn initialised(enabled: Option<bool>) -> Client {
        let mut client = Client::new(ServiceCache::default(), Duration::from_millis(500));
        let response = client.dispatch(client_init(enabled, EngineSettings::default()));
        assert!(matches!(
            response,
            Response::ClientInit(ClientInitResponse {
                status: InitStatus::Ok,
                ..
            })
        ));
        client
    }

    #[test]
    fn requests_before_init_are_errors() {
        let mut client = Client::new(ServiceCache::default(), Duration::from_millis(500));
        assert_eq!(client.dispatch(request_init(map(&[]))), Response::Error);
        assert_eq!(client.dispatch(request_exec(map(&[]))), Response::Error);
        assert_eq!(client.dispatch(request_shutdown(map(&[]), None)), Response::Error);
        assert_eq!(client.dispatch(config_sync()), Response::Error);
        assert!(!client.is_initialized());
    }

    #[test]
    fn second_client_init_is_an_error() {
        let mut client = initialised(Some(true));
        let response = client.dispatch(client_init(Some(true), EngineSettings::default()));
        assert_eq!(response, Response::Error);
        assert!(client.is_initialized());
    }

    #[test]
    fn failed_init_leaves_session_uninitialised() {
        let mut client = Client::new(ServiceCache::default(), Duration::from_millis(500));
        let settings = EngineSettings {
            rules_file: Some("/nonexistent/rules.json".to_owned()),
            ..EngineSettings::default()
        };
        let Response::ClientInit(response) = client.dispatch(client_init(Some(true), settings))
        else {
            panic!("expected client_init response");
        };
        assert_eq!(response.status, InitStatus::Fail);
        assert_eq!(response.errors.len(), 1);
        assert!(!client.is_initialized());

        // Retry succeeds.
        let response = client.dispatch(client_init(Some(true), EngineSettings::default()));
        assert!(matches!(response, Response::ClientInit(r) if r.status == InitStatus::Ok));
    }

    #[test]
    fn exec_and_shutdown_need_an_open_scope() {
        let mut client = initialised(Some(true));
        assert_eq!(client.dispatch(request_exec(map(&[]))), Response::Error);
        assert_eq!(client.dispatch(request_shutdown(map(&[]), None)), Response::Error);

        assert!(matches!(
            client.dispatch(request_init(map(&[]))),
            Response::RequestInit(_)
        ));
        assert!(matches!(
            client.dispatch(request_exec(map(&[]))),
            Response::RequestExec(_)
        ));
        assert!(matches!(
            client.dispatch(request_shutdown(map(&[]), None)),
            Response::RequestShutdown(_)
        ));
        assert!(!client.in_request());
        assert_eq!(client.dispatch(request_exec(map(&[]))), Response::Error);
    }

    #[test]
    fn clean_request_yields_ok() {
        let mut client = initialised(Some(true));
        let Response::RequestInit(response) =
            client.dispatch(request_init(map(&[("server.request.uri.raw", "/")])))
        else {
            panic!("expected request_init response");
        };
        assert_eq!(response.actions, vec![Action::new(Verdict::Ok)]);
        assert!(response.triggers.is_empty());
        assert!(!response.force_keep);
        assert_eq!(
            response.settings.get(AUTO_USER_INSTRUM).map(String::as_str),
            Some("undefined")
        );
    }

    #[test]
    fn attack_is_recorded_and_kept() {
        let mut client = initialised(Some(true));
        let data = map(&[("server.request.uri.raw", "/../../etc/passwd")]);
        let Response::RequestInit(response) = client.dispatch(request_init(data)) else {
            panic!("expected request_init response");
        };
        assert_eq!(response.triggers.len(), 1);
        assert_eq!(response.actions, vec![Action::new(Verdict::Record)]);
        assert!(response.force_keep);
    }

    #[test]
    fn non_map_payload_is_an_error() {
        let mut client = initialised(Some(true));
        let response = client.dispatch(request_init(Value::Array(vec![])));
        assert_eq!(response, Response::Error);
        assert!(!client.in_request());
    }

    #[test]
    fn rate_limiter_caps_force_keep() {
        let clock = Arc::new(ManualClock::new(1_000));
        let mut client = Client::with_clock(
            ServiceCache::default(),
            Duration::from_millis(500),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let settings = EngineSettings {
            trace_rate_limit: 2,
            ..EngineSettings::default()
        };
        client.dispatch(client_init(Some(true), settings));

        let mut kept = 0;
        for _ in 0..4 {
            let data = map(&[("server.request.uri.raw", "/../../etc/passwd")]);
            if let Response::RequestInit(r) = client.dispatch(request_init(data)) {
                assert_eq!(r.triggers.len(), 1);
                kept += usize::from(r.force_keep);
            }
        }
        assert_eq!(kept, 2);

        clock.advance(1);
        let data = map(&[("server.request.uri.raw", "/../../etc/passwd")]);
        let Response::RequestInit(r) = client.dispatch(request_init(data)) else {
            panic!("expected request_init response");
        };
        assert!(r.force_keep);
    }

    #[test]
    fn enablement_table() {
        let cases = [
            (None, AsmStatus::Enabled, true),
            (None, AsmStatus::Disabled, false),
            (None, AsmStatus::Unset, false),
            (Some(true), AsmStatus::Enabled, true),
            (Some(true), AsmStatus::Disabled, true),
            (Some(true), AsmStatus::Unset, true),
            (Some(false), AsmStatus::Enabled, false),
            (Some(false), AsmStatus::Disabled, false),
            (Some(false), AsmStatus::Unset, false),
        ];

        for (local, asm, expected) in cases {
            let mut client = initialised(local);
            let config = client.service().unwrap().config();
            match asm {
                AsmStatus::Enabled => config.enable_asm(),
                AsmStatus::Disabled => config.disable_asm(),
                AsmStatus::Unset => config.unset_asm(),
            }

            let response = client.dispatch(request_init(map(&[])));
            if expected {
                assert!(
                    matches!(response, Response::RequestInit(_)),
                    "{local:?} x {asm:?}"
                );
            } else {
                assert_eq!(
                    response,
                    Response::ConfigFeatures { enabled: false },
                    "{local:?} x {asm:?}"
                );
                assert!(!client.in_request());
            }

            let sync = client.dispatch(config_sync());
            let expected_sync = if expected {
                Response::ConfigFeatures { enabled: true }
            } else {
                Response::ConfigSync
            };
            assert_eq!(sync, expected_sync, "{local:?} x {asm:?}");
        }
    }

    #[test]
    fn remote_disable_closes_the_scope() {
        let mut client = initialised(None);
        let config = client.service().unwrap().config();
        config.enable_asm();
        assert!(matches!(
            client.dispatch(request_init(map(&[]))),
            Response::RequestInit(_)
        ));

        client.service().unwrap().config().disable_asm();
        assert_eq!(
            client.dispatch(request_exec(map(&[]))),
            Response::ConfigFeatures { enabled: false }
        );
        assert!(!client.in_request());
    }

    #[test]
    fn config_sync_moves_to_the_new_rc_path() {
        let cache = ServiceCache::default();
        let mut client = Client::new(cache.clone(), Duration::from_millis(500));
        client.dispatch(client_init(Some(true), EngineSettings::default()));
        assert_eq!(client.service().unwrap().rc_path(), "");

        let sync = Request::ConfigSync(ConfigSync {
            rem_cfg_path: Some("/tmp/appsec-rc-a".to_owned()),
        });
        assert_eq!(
            client.dispatch(sync),
            Response::ConfigFeatures { enabled: true }
        );
        assert_eq!(client.service().unwrap().rc_path(), "/tmp/appsec-rc-a");

        // The service bound at init is no longer held, so the next insert
        // sweeps it.
        let _other = cache
            .get_or_create(
                &EngineSettings::default(),
                &RemoteConfigSettings::default(),
                &ServiceIdentity::new("api", "test", std::iter::empty::<String>()),
            )
            .unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_config_sync_keeps_the_current_service() {
        let mut rules = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut rules,
            br#"{"version": "2.1", "rules": [{
                "id": "r1",
                "name": "n",
                "tags": {"type": "lfi", "category": "attack_attempt"},
                "conditions": [{"operator": "phrase_match", "parameters": {
                    "inputs": [{"address": "server.request.uri.raw"}],
                    "list": ["../"]
                }}]
            }]}"#,
        )
        .unwrap();
        let settings = EngineSettings {
            rules_file: Some(rules.path().to_string_lossy().into_owned()),
            ..EngineSettings::default()
        };

        let mut client = Client::new(ServiceCache::default(), Duration::from_millis(500));
        let response = client.dispatch(client_init(Some(true), settings));
        assert!(matches!(response, Response::ClientInit(r) if r.status == InitStatus::Ok));

        // The rules file is gone, so a service for the new path cannot be built.
        rules.close().unwrap();
        let sync = Request::ConfigSync(ConfigSync {
            rem_cfg_path: Some("/tmp/other-rc".to_owned()),
        });
        assert_eq!(
            client.dispatch(sync),
            Response::ConfigFeatures { enabled: true }
        );
        assert!(client.is_initialized());
        assert_eq!(client.service().unwrap().rc_path(), "");

        assert!(matches!(
            client.dispatch(request_init(map(&[("server.request.uri.raw", "/../etc")]))),
            Response::RequestInit(_)
        ));
    }

    #[test]
    fn sampled_shutdown_extracts_schema() {
        let mut client = Client::new(ServiceCache::default(), Duration::from_millis(500));
        let settings = EngineSettings {
            schema_extraction: SchemaExtraction {
                enabled: true,
                sample_rate: 1.0,
            },
            ..EngineSettings::default()
        };
        client.dispatch(client_init(Some(true), settings));

        client.dispatch(request_init(map(&[])));
        let Response::RequestShutdown(first) =
            client.dispatch(request_shutdown(map(&[]), Some(7)))
        else {
            panic!("expected request_shutdown response");
        };
        assert!(first
            .response
            .actions
            .contains(&Action::new(Verdict::ExtractSchema)));
        assert!(first.metrics.contains_key(appsec_engine::metrics::WAF_DURATION));

        // Same key within the period is not sampled again.
        client.dispatch(request_init(map(&[])));
        let Response::RequestShutdown(second) =
            client.dispatch(request_shutdown(map(&[]), Some(7)))
        else {
            panic!("expected request_shutdown response");
        };
        assert_eq!(second.response.actions, vec![Action::new(Verdict::Ok)]);
    }

    #[test]
    fn record_is_added_for_triggers_and_stack_traces() {
        let result = EngineResult {
            actions: vec![],
            triggers: vec!["{}".to_owned()],
        };
        assert_eq!(massage_actions(&result), vec![Action::new(Verdict::Record)]);

        let result = EngineResult {
            actions: vec![ActionDefinition::new("stack_trace", ActionType::GenerateStack)],
            triggers: vec![],
        };
        assert_eq!(
            massage_actions(&result),
            vec![Action::new(Verdict::StackTrace), Action::new(Verdict::Record)]
        );

        let block = ActionDefinition::new("block", ActionType::BlockRequest)
            .with_parameter("status_code", "403");
        let result = EngineResult {
            actions: vec![block, ActionDefinition::new("monitor", ActionType::Monitor)],
            triggers: vec!["{}".to_owned()],
        };
        let actions = massage_actions(&result);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].verdict, Verdict::Block);
        assert_eq!(actions[0].parameters["status_code"], "403");

        assert_eq!(
            massage_actions(&EngineResult::default()),
            vec![Action::new(Verdict::Ok)]
        );
    }
}
