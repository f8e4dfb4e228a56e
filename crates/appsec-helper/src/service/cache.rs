//! Reference-counted cache of services.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use appsec_proto::{EngineSettings, RemoteConfigSettings, SchemaExtraction, ServiceIdentity};
use tracing::debug;

use super::{Service, ServiceOptions};
use crate::clock::SystemClock;
use crate::error::ServiceError;

/// The settings that shape a service. `trace_rate_limit` is per session and
/// takes no part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    rules_file: Option<String>,
    waf_timeout_us: u64,
    obfuscator_key_regex: Option<String>,
    obfuscator_value_regex: Option<String>,
    schema_extraction: SchemaExtraction,
    rc_settings: RemoteConfigSettings,
    identity: ServiceIdentity,
}

impl ServiceKey {
    #[must_use]
    pub fn new(
        engine_settings: &EngineSettings,
        rc_settings: &RemoteConfigSettings,
        identity: &ServiceIdentity,
    ) -> Self {
        Self {
            rules_file: engine_settings.rules_file.clone(),
            waf_timeout_us: engine_settings.waf_timeout_us,
            obfuscator_key_regex: engine_settings.obfuscator_key_regex.clone(),
            obfuscator_value_regex: engine_settings.obfuscator_value_regex.clone(),
            schema_extraction: engine_settings.schema_extraction,
            rc_settings: rc_settings.clone(),
            identity: identity.clone(),
        }
    }
}

struct CacheEntry {
    service: Arc<Service>,
    refs: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<ServiceKey, CacheEntry>,
    last_inserted: Option<ServiceKey>,
}

impl CacheInner {
    /// Drops entries no session holds, keeping the newest one.
    fn sweep(&mut self) {
        let Self {
            entries,
            last_inserted,
        } = self;
        entries.retain(|key, entry| {
            let keep = entry.refs > 0 || last_inserted.as_ref() == Some(key);
            if !keep {
                debug!(service = %key.identity.service_name, "Evicting unused service");
            }
            keep
        });
    }
}

fn lock(inner: &Mutex<CacheInner>) -> MutexGuard<'_, CacheInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memoizes services by [`ServiceKey`].
#[derive(Clone)]
pub struct ServiceCache {
    inner: Arc<Mutex<CacheInner>>,
    options: ServiceOptions,
}

impl ServiceCache {
    #[must_use]
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            options,
        }
    }

    /// Returns the service for these settings, building it on a miss.
    ///
    /// Every call sweeps services no session holds any more, except the one
    /// created most recently.
    pub fn get_or_create(
        &self,
        engine_settings: &EngineSettings,
        rc_settings: &RemoteConfigSettings,
        identity: &ServiceIdentity,
    ) -> Result<ServiceHandle, ServiceError> {
        let key = ServiceKey::new(engine_settings, rc_settings, identity);
        let mut inner = lock(&self.inner);

        let service = if let Some(entry) = inner.entries.get_mut(&key) {
            entry.refs += 1;
            debug!(service = %identity.service_name, refs = entry.refs, "Service cache hit");
            Arc::clone(&entry.service)
        } else {
            let service = Arc::new(Service::new(
                engine_settings,
                rc_settings,
                identity.clone(),
                &self.options,
            )?);
            inner.entries.insert(
                key.clone(),
                CacheEntry {
                    service: Arc::clone(&service),
                    refs: 1,
                },
            );
            inner.last_inserted = Some(key.clone());
            service
        };
        inner.sweep();

        Ok(ServiceHandle {
            key,
            service,
            cache: Arc::clone(&self.inner),
        })
    }

    /// Number of cached services.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new(ServiceOptions {
            clock: Arc::new(SystemClock),
            rc_poll_interval: Duration::from_secs(1),
        })
    }
}

/// A session's claim on a cached service. Dropping the last handle makes the
/// service eligible for eviction.
pub struct ServiceHandle {
    key: ServiceKey,
    service: Arc<Service>,
    cache: Arc<Mutex<CacheInner>>,
}

impl ServiceHandle {
    #[must_use]
    pub const fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Whether two handles refer to the same service.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.service, &other.service)
    }
}

impl Deref for ServiceHandle {
    type Target = Service;

    fn deref(&self) -> &Service {
        &self.service
    }
}

impl Clone for ServiceHandle {
    fn clone(&self) -> Self {
        if let Some(entry) = lock(&self.cache).entries.get_mut(&self.key) {
            entry.refs += 1;
        }
        Self {
            key: self.key.clone(),
            service: Arc::clone(&self.service),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        if let Some(entry) = lock(&self.cache).entries.get_mut(&self.key) {
            if Arc::ptr_eq(&entry.service, &self.service) {
                entry.refs = entry.refs.saturating_sub(1);
            }
        }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}
