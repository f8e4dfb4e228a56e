//! Services: one engine plus its remote configuration wiring.
//!
//! A [`Service`] is built once per distinct configuration and shared by every
//! session that asks for it through the [`ServiceCache`].

mod cache;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use appsec_engine::Engine;
use appsec_proto::{EngineSettings, RemoteConfigSettings, ServiceIdentity};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::ServiceError;
use crate::rc::RemoteConfigHandler;
use crate::sampler::SchemaSampler;

pub use cache::{ServiceCache, ServiceHandle, ServiceKey};

/// Remote enablement of the security product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmStatus {
    /// No remote decision; the local default applies.
    Unset,
    Enabled,
    Disabled,
}

impl AsmStatus {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Unset => 0,
            Self::Enabled => 1,
            Self::Disabled => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Enabled,
            2 => Self::Disabled,
            _ => Self::Unset,
        }
    }
}

/// Automated user activity tracking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoUserInstrumMode {
    Undefined,
    Disabled,
    Identification,
    Anonymization,
}

impl AutoUserInstrumMode {
    /// Parses a mode name. Unknown names are `Undefined`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "disabled" => Self::Disabled,
            "identification" | "ident" => Self::Identification,
            "anonymization" | "anon" => Self::Anonymization,
            _ => Self::Undefined,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Disabled => "disabled",
            Self::Identification => "identification",
            Self::Anonymization => "anonymization",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Disabled => 1,
            Self::Identification => 2,
            Self::Anonymization => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Disabled,
            2 => Self::Identification,
            3 => Self::Anonymization,
            _ => Self::Undefined,
        }
    }
}

/// Live settings of a service, written by remote configuration and read by
/// sessions.
#[derive(Debug)]
pub struct ServiceConfig {
    asm: AtomicU8,
    auto_user_instrum: AtomicU8,
}

impl ServiceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            asm: AtomicU8::new(0),
            auto_user_instrum: AtomicU8::new(0),
        }
    }

    pub fn enable_asm(&self) {
        self.set_asm(AsmStatus::Enabled);
    }

    pub fn disable_asm(&self) {
        self.set_asm(AsmStatus::Disabled);
    }

    pub fn unset_asm(&self) {
        self.set_asm(AsmStatus::Unset);
    }

    #[must_use]
    pub fn asm_status(&self) -> AsmStatus {
        AsmStatus::from_u8(self.asm.load(Ordering::Acquire))
    }

    pub fn set_auto_user_instrum_mode(&self, mode: AutoUserInstrumMode) {
        self.auto_user_instrum
            .store(mode.to_u8(), Ordering::Release);
    }

    #[must_use]
    pub fn auto_user_instrum_mode(&self) -> AutoUserInstrumMode {
        AutoUserInstrumMode::from_u8(self.auto_user_instrum.load(Ordering::Acquire))
    }

    fn set_asm(&self, status: AsmStatus) {
        let previous = AsmStatus::from_u8(self.asm.swap(status.to_u8(), Ordering::AcqRel));
        if previous != status {
            info!(from = ?previous, to = ?status, "Remote enablement changed");
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Options shared by every service a cache builds.
#[derive(Clone)]
pub struct ServiceOptions {
    pub clock: Arc<dyn Clock>,
    pub rc_poll_interval: Duration,
}

/// One engine and the remote configuration feeding it.
pub struct Service {
    engine: Engine,
    config: Arc<ServiceConfig>,
    identity: ServiceIdentity,
    sampler: Option<SchemaSampler>,
    rc: RemoteConfigHandler,
}

impl Service {
    /// Builds the engine and starts remote configuration polling.
    pub fn new(
        engine_settings: &EngineSettings,
        rc_settings: &RemoteConfigSettings,
        identity: ServiceIdentity,
        options: &ServiceOptions,
    ) -> Result<Self, ServiceError> {
        let engine = Engine::create(engine_settings)?;
        let config = Arc::new(ServiceConfig::new());

        let sampler = engine_settings.schema_extraction.enabled.then(|| {
            SchemaSampler::new(
                engine_settings.schema_extraction.sample_rate,
                Arc::clone(&options.clock),
            )
        });

        let mut rc = RemoteConfigHandler::new(
            rc_settings.clone(),
            Arc::clone(&config),
            options.rc_poll_interval,
        );
        if rc.start() {
            debug!(path = %rc_settings.shmem_path, "Remote configuration polling started");
        }

        info!(
            service = %identity.service_name,
            env = %identity.env_name,
            schema_sampling = sampler.is_some(),
            "Service created"
        );

        Ok(Self {
            engine,
            config,
            identity,
            sampler,
            rc,
        })
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub const fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    #[must_use]
    pub const fn schema_sampler(&self) -> Option<&SchemaSampler> {
        self.sampler.as_ref()
    }

    /// Path of the remote configuration directory file, empty when unset.
    #[must_use]
    pub fn rc_path(&self) -> &str {
        self.rc.path()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("identity", &self.identity)
            .field("asm", &self.config.asm_status())
            .field("rc_path", &self.rc.path())
            .finish_non_exhaustive()
    }
}
