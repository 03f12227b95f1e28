//! Application state shared by every handler
//!
//! Replaces process-wide singletons: the configuration, the event bus, the
//! orchestrator slot and the auto-cycle handle all live here and are passed
//! to handlers through axum's `State` extractor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use coordination::{
    BackendKind, DiscoveryConfig, EventBus, GatewaySet, Orchestrator, OrchestratorState,
    PersonaRegistry, Roster, ScriptedBackend, SharedEventBus, ToyWorld,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::auto_cycle::AutoCycle;
use crate::error::{ApiError, ApiResult};

/// Snapshot served by `GET /api/state` and sent first on every WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub initialized: bool,
    pub offline: bool,
    /// Auto-cycle interval in milliseconds while the timer runs.
    #[serde(default)]
    pub auto_cycle_ms: Option<u64>,
    #[serde(default)]
    pub orchestrator: Option<OrchestratorState>,
    pub uptime_secs: i64,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DiscoveryConfig>,

    /// Event bus shared with every orchestrator this server builds
    pub events: SharedEventBus,

    /// `None` until `/api/initialize` succeeds. Held for the whole of a
    /// cycle, so at most one cycle runs at a time.
    pub orchestrator: Arc<Mutex<Option<Orchestrator>>>,

    auto_cycle: Arc<StdMutex<Option<AutoCycle>>>,

    /// Use canned offline replies instead of hosted models
    pub offline: bool,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DiscoveryConfig, offline: bool) -> Self {
        let events = EventBus::with_history(config.server.event_history).shared();
        Self {
            config: Arc::new(config),
            events,
            orchestrator: Arc::new(Mutex::new(None)),
            auto_cycle: Arc::new(StdMutex::new(None)),
            offline,
            started_at: Utc::now(),
        }
    }

    /// Build a fresh orchestrator, replacing any previous one.
    ///
    /// `keys` override the configured API-key environment variables and
    /// `roster` overrides the configured roster.
    pub async fn initialize(
        &self,
        keys: HashMap<BackendKind, String>,
        roster: Option<Roster>,
    ) -> ApiResult<OrchestratorState> {
        let registry = match roster {
            Some(roster) => PersonaRegistry::builtin(roster),
            None => self
                .config
                .load_personas()
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        };
        let gateways = if self.offline {
            GatewaySet::uniform(Arc::new(ScriptedBackend::offline()), self.config.retry_policy())
        } else {
            self.config.build_gateways(&keys)
        };
        let orchestrator = Orchestrator::from_registry(
            &registry,
            &gateways,
            self.config.agent_settings(),
            Box::new(ToyWorld::new()),
            Arc::clone(&self.events),
            self.config.deliberation.clone(),
        )?
        .with_language(self.config.language);

        self.stop_auto().await;
        let mut slot = self.orchestrator.try_lock().map_err(|_| busy())?;
        let snapshot = orchestrator.state();
        *slot = Some(orchestrator);
        info!(agents = registry.len(), offline = self.offline, "Orchestrator initialized");
        Ok(snapshot)
    }

    /// Lock the orchestrator without waiting, for operations that call
    /// models. A cycle in flight makes this a conflict.
    pub fn try_orchestrator(&self) -> ApiResult<MutexGuard<'_, Option<Orchestrator>>> {
        let slot = self.orchestrator.try_lock().map_err(|_| busy())?;
        if slot.is_none() {
            return Err(ApiError::NotInitialized);
        }
        Ok(slot)
    }

    /// Lock the orchestrator, waiting for a cycle in flight to finish.
    pub async fn orchestrator(&self) -> ApiResult<MutexGuard<'_, Option<Orchestrator>>> {
        let slot = self.orchestrator.lock().await;
        if slot.is_none() {
            return Err(ApiError::NotInitialized);
        }
        Ok(slot)
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let orchestrator = self.orchestrator.lock().await.as_ref().map(Orchestrator::state);
        StateSnapshot {
            initialized: orchestrator.is_some(),
            offline: self.offline,
            auto_cycle_ms: self.auto_interval().map(|i| i.as_millis() as u64),
            orchestrator,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }

    /// Start the auto-cycle timer, replacing a running one.
    pub async fn start_auto(&self, interval_ms: Option<u64>) -> ApiResult<u64> {
        let interval_ms = interval_ms.unwrap_or(self.config.server.auto_interval_ms);
        if interval_ms == 0 {
            return Err(ApiError::BadRequest("interval_ms must be positive".to_string()));
        }
        {
            let slot = self.orchestrator.lock().await;
            match slot.as_ref() {
                None => return Err(ApiError::NotInitialized),
                Some(orchestrator) if !orchestrator.is_running() => {
                    return Err(ApiError::Conflict("No active session".to_string()));
                }
                Some(_) => {}
            }
        }

        self.stop_auto().await;
        let handle = AutoCycle::spawn(self.clone(), Duration::from_millis(interval_ms));
        *self.auto_slot() = Some(handle);
        Ok(interval_ms)
    }

    /// Stop the auto-cycle timer. Returns the cycles it ran, if it was running.
    pub async fn stop_auto(&self) -> Option<u64> {
        let handle = self.auto_slot().take()?;
        Some(handle.stop().await)
    }

    pub fn auto_interval(&self) -> Option<Duration> {
        self.auto_slot()
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map(AutoCycle::interval)
    }

    fn auto_slot(&self) -> StdMutexGuard<'_, Option<AutoCycle>> {
        match self.auto_cycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn busy() -> ApiError {
    ApiError::Conflict("A cycle is already running".to_string())
}
