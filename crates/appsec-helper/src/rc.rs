//! File-backed remote configuration.
//!
//! The tracer side publishes a directory file listing the active
//! configurations:
//!
//! ```text
//! <runtime id>
//! <config file path>:<limiter index>:<base64url(rc path)>
//! ...
//! ```
//!
//! The rc path names the product, as in
//! `datadog/2/ASM_FEATURES/asm_features_activation/config`. Only
//! `ASM_FEATURES` is applied here; it drives the service's remote enablement
//! and user instrumentation mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use appsec_proto::RemoteConfigSettings;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RcError;
use crate::service::{AutoUserInstrumMode, ServiceConfig};

const ASM_FEATURES: &str = "ASM_FEATURES";

/// One line of the directory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub file: PathBuf,
    pub limiter_index: u32,
    pub rc_path: String,
}

impl ConfigEntry {
    /// Returns the product segment of the rc path.
    #[must_use]
    pub fn product(&self) -> Option<&str> {
        let parts: Vec<&str> = self.rc_path.split('/').collect();
        match parts.as_slice() {
            ["datadog", _, product, _, ..] | ["employee", product, _, ..] => Some(*product),
            _ => None,
        }
    }
}

/// Parsed directory file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub runtime_id: String,
    pub entries: Vec<ConfigEntry>,
}

impl Directory {
    /// Parses a directory file. Relative config paths resolve against `base`.
    pub fn parse(contents: &str, base: &Path) -> Result<Self, RcError> {
        let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
        let runtime_id = lines
            .next()
            .map(|l| l.trim().to_owned())
            .ok_or_else(|| RcError::Directory("missing runtime id".to_owned()))?;

        let entries = lines
            .map(|line| parse_entry(line.trim(), base))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            runtime_id,
            entries,
        })
    }
}

fn parse_entry(line: &str, base: &Path) -> Result<ConfigEntry, RcError> {
    let invalid = || RcError::Directory(format!("malformed entry '{line}'"));

    // The file path may itself contain ':', so split from the right.
    let mut parts = line.rsplitn(3, ':');
    let encoded = parts.next().ok_or_else(invalid)?;
    let limiter_index = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)?;
    let file = parts.next().filter(|f| !f.is_empty()).ok_or_else(invalid)?;

    let decoded = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| invalid())?;
    let rc_path = String::from_utf8(decoded).map_err(|_| invalid())?;

    Ok(ConfigEntry {
        file: base.join(file),
        limiter_index,
        rc_path,
    })
}

#[derive(Debug, Deserialize)]
struct AsmFeatures {
    asm: Option<AsmToggle>,
    auto_user_instrum: Option<AutoUserInstrum>,
}

#[derive(Debug, Deserialize)]
struct AsmToggle {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct AutoUserInstrum {
    mode: String,
}

/// Applies the `ASM_FEATURES` documents to `config`.
///
/// With no document carrying an `asm` toggle, remote enablement is unset.
fn apply_asm_features(config: &ServiceConfig, documents: &[AsmFeatures]) {
    let toggle = documents.iter().rev().find_map(|d| d.asm.as_ref());
    match toggle {
        Some(AsmToggle { enabled: true }) => config.enable_asm(),
        Some(AsmToggle { enabled: false }) => config.disable_asm(),
        None => config.unset_asm(),
    }

    if let Some(mode) = documents
        .iter()
        .rev()
        .find_map(|d| d.auto_user_instrum.as_ref())
    {
        config.set_auto_user_instrum_mode(AutoUserInstrumMode::from_name(&mode.mode));
    }
}

/// Polls the directory file of one service.
pub struct RemoteConfigHandler {
    settings: RemoteConfigSettings,
    config: Arc<ServiceConfig>,
    poll_interval: Duration,
    cancel: CancellationToken,
    started: bool,
}

impl RemoteConfigHandler {
    #[must_use]
    pub fn new(
        settings: RemoteConfigSettings,
        config: Arc<ServiceConfig>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            settings,
            config,
            poll_interval,
            cancel: CancellationToken::new(),
            started: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.settings.shmem_path
    }

    /// Starts polling. Returns false when remote configuration is disabled,
    /// has no path, or no tokio runtime is available.
    pub fn start(&mut self) -> bool {
        if self.started {
            return true;
        }
        if !self.settings.enabled || self.settings.shmem_path.is_empty() {
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No runtime available, remote configuration not started");
            return false;
        };

        let poller = Poller {
            directory: PathBuf::from(&self.settings.shmem_path),
            config: Arc::clone(&self.config),
            last_modified: None,
        };
        handle.spawn(poller.run(self.poll_interval, self.cancel.clone()));
        self.started = true;
        true
    }
}

impl Drop for RemoteConfigHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Poller {
    directory: PathBuf,
    config: Arc<ServiceConfig>,
    last_modified: Option<SystemTime>,
}

impl Poller {
    async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(path = %self.directory.display(), "Remote configuration poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!(
                            error = %e,
                            path = %self.directory.display(),
                            "Remote configuration poll failed"
                        );
                    }
                }
            }
        }
    }

    async fn poll(&mut self) -> Result<(), RcError> {
        let io_error = |path: &Path| {
            let path = path.display().to_string();
            move |source| RcError::Io { path, source }
        };

        let modified = tokio::fs::metadata(&self.directory)
            .await
            .and_then(|m| m.modified())
            .map_err(io_error(&self.directory))?;
        if self.last_modified == Some(modified) {
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&self.directory)
            .await
            .map_err(io_error(&self.directory))?;
        let base = self.directory.parent().unwrap_or_else(|| Path::new("/"));
        let directory = Directory::parse(&contents, base)?;

        let mut documents = Vec::new();
        for entry in directory
            .entries
            .iter()
            .filter(|e| e.product() == Some(ASM_FEATURES))
        {
            let raw = tokio::fs::read(&entry.file)
                .await
                .map_err(io_error(&entry.file))?;
            let document: AsmFeatures = serde_json::from_slice(&raw).map_err(|source| RcError::Json {
                path: entry.file.display().to_string(),
                source,
            })?;
            documents.push(document);
        }

        info!(
            runtime_id = %directory.runtime_id,
            configs = directory.entries.len(),
            asm_features = documents.len(),
            "Applying remote configuration"
        );
        apply_asm_features(&self.config, &documents);
        self.last_modified = Some(modified);
        Ok(())
    }
}
