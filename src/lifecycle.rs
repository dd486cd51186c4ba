//! Worker lifecycle: install, activate, client claiming
//!
//! ```text
//! Parsed -> Installing -> Installed -> Activating -> Activated
//!               |                          |
//!               v                          v (deletion failed)
//!           Redundant                  Installed
//! ```
//!
//! Phases are serialized through a single mutex held for the whole phase.
//! Calling a phase from the wrong state fails with
//! [`EngineError::Lifecycle`] and leaves the state untouched.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fetcher::Fetcher;
use crate::models::{resolve_against, CacheRequest, GenerationKind};
use crate::store::CacheStorage;
use crate::write_behind::WriteBehind;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never activates
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Outcome of the install phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Precache paths stored in the static generation
    pub cached: Vec<String>,
    /// Precache paths that could not be stored, with the reason
    pub failed: Vec<(String, String)>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of the activate phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale generations removed
    pub deleted: Vec<String>,
    /// Clients that came under this version's control
    pub claimed: usize,
}

/// Open clients and the version controlling each
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Option<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; returns false if it was already known
    pub async fn register(&self, client_id: &str) -> bool {
        let mut clients = self.clients.write().await;
        if clients.contains_key(client_id) {
            return false;
        }
        clients.insert(client_id.to_string(), None);
        true
    }

    pub async fn unregister(&self, client_id: &str) -> bool {
        self.clients.write().await.remove(client_id).is_some()
    }

    /// Version controlling a client, if any
    pub async fn controller(&self, client_id: &str) -> Option<String> {
        self.clients.read().await.get(client_id).cloned().flatten()
    }

    /// Take control of every open client at once
    pub async fn claim(&self, version: &str) -> usize {
        let mut clients = self.clients.write().await;
        for controller in clients.values_mut() {
            *controller = Some(version.to_string());
        }
        clients.len()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

/// Drives install and activate for one cache version
pub struct Lifecycle {
    config: Arc<EngineConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    writer: Arc<WriteBehind>,
    clients: Arc<ClientRegistry>,
    state: RwLock<LifecycleState>,
    phase: Mutex<()>,
}

impl Lifecycle {
    pub fn new(
        config: Arc<EngineConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        writer: Arc<WriteBehind>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Lifecycle {
            config,
            storage,
            fetcher,
            writer,
            clients,
            state: RwLock::new(LifecycleState::Parsed),
            phase: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == LifecycleState::Activated
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Precache the shell into the static generation
    ///
    /// Individual fetch or write failures are logged and reported but do not
    /// fail the phase. Failing to open the static generation does, and marks
    /// this version redundant.
    pub async fn install(&self) -> Result<InstallReport> {
        let _phase = self.phase.lock().await;
        self.transition(LifecycleState::Parsed, LifecycleState::Installing)
            .await?;

        let static_cache = self.config.generation_name(GenerationKind::Static);
        info!(
            "Installing version {}: precaching {} resources into {}",
            self.config.cache_version,
            self.config.precache.len(),
            static_cache
        );

        if let Err(e) = self.storage.open(&static_cache).await {
            warn!("Install failed, cannot open {}: {}", static_cache, e);
            self.set_state(LifecycleState::Redundant).await;
            return Err(e);
        }

        let origin = self.config.origin_url()?;
        let mut report = InstallReport::default();

        for path in &self.config.precache {
            match self.precache_one(&origin, path, &static_cache).await {
                Ok(()) => {
                    debug!("Precached {}", path);
                    report.cached.push(path.clone());
                }
                Err(e) => {
                    warn!("Failed to precache {}: {}", path, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        self.set_state(LifecycleState::Installed).await;
        info!(
            "Install complete: cached={}, failed={}",
            report.cached.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Delete stale generations and claim every open client
    pub async fn activate(&self) -> Result<ActivationReport> {
        let _phase = self.phase.lock().await;
        self.activate_locked().await
    }

    /// Activate now if installed and waiting; otherwise do nothing
    ///
    /// Returns the activation report when an activation ran.
    pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>> {
        let _phase = self.phase.lock().await;
        if self.state().await != LifecycleState::Installed {
            debug!("Skip-waiting ignored in state {}", self.state().await);
            return Ok(None);
        }
        self.activate_locked().await.map(Some)
    }

    async fn activate_locked(&self) -> Result<ActivationReport> {
        self.transition(LifecycleState::Installed, LifecycleState::Activating)
            .await?;

        match self.delete_stale_generations().await {
            Ok(deleted) => {
                let claimed = self.clients.claim(&self.config.cache_version).await;
                self.set_state(LifecycleState::Activated).await;
                info!(
                    "Activated version {}: deleted {} stale generations, claimed {} clients",
                    self.config.cache_version,
                    deleted.len(),
                    claimed
                );
                Ok(ActivationReport { deleted, claimed })
            }
            Err(e) => {
                warn!("Activation failed, staying installed: {}", e);
                self.set_state(LifecycleState::Installed).await;
                Err(e)
            }
        }
    }

    async fn delete_stale_generations(&self) -> Result<Vec<String>> {
        // Queued writes must land before the store is enumerated
        self.writer.flush().await;
        let mut deleted = Vec::new();

        for name in self.storage.keys().await? {
            if self.config.is_current_generation(&name) {
                continue;
            }
            info!("Deleting stale generation {}", name);
            if self.storage.delete(&name).await? {
                deleted.push(name);
            }
        }

        Ok(deleted)
    }

    async fn precache_one(&self, origin: &url::Url, path: &str, generation: &str) -> Result<()> {
        let url = resolve_against(origin, path)?;
        let request = CacheRequest::new(http::Method::GET, url);
        let response = self.fetcher.fetch(&request).await?;

        if !response.is_ok() {
            return Err(EngineError::Network(format!(
                "precache fetch returned status {}",
                response.status
            )));
        }

        self.storage.put(generation, &request.key(), response).await
    }

    async fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != from {
            return Err(EngineError::Lifecycle(format!(
                "cannot enter {} from {} (expected {})",
                to, *state, from
            )));
        }
        *state = to;
        Ok(())
    }

    async fn set_state(&self, to: LifecycleState) {
        *self.state.write().await = to;
    }
}
