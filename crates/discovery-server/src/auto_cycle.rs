//! Auto-cycle timer
//!
//! Runs one cycle per tick while a session is active. A tick that finds no
//! session, or finds a cycle already in flight, is skipped. Cancellation is
//! only observed between cycles, so a running cycle always completes.

use std::time::Duration;

use coordination::DiscoveryEvent;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Handle to a running auto-cycle task.
pub struct AutoCycle {
    token: CancellationToken,
    task: JoinHandle<u64>,
    interval: Duration,
}

impl AutoCycle {
    pub fn spawn(state: AppState, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(state, interval, token.clone()));
        Self {
            token,
            task,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the task, returning the number of cycles it ran.
    pub async fn stop(self) -> u64 {
        self.token.cancel();
        match self.task.await {
            Ok(cycles_run) => cycles_run,
            Err(e) => {
                warn!(error = %e, "Auto-cycle task ended abnormally");
                0
            }
        }
    }
}

async fn run(state: AppState, interval: Duration, token: CancellationToken) -> u64 {
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    info!(interval_ms, "Auto-cycle started");
    state
        .events
        .publish(DiscoveryEvent::AutoCycleStarted { interval_ms });

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; the first cycle waits a full interval.
    ticker.tick().await;

    let mut cycles_run = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(mut slot) = state.orchestrator.try_lock() else {
                    debug!("Cycle in flight, skipping auto tick");
                    continue;
                };
                let Some(orchestrator) = slot.as_mut() else {
                    debug!("Orchestrator not initialized, skipping auto tick");
                    continue;
                };
                if !orchestrator.is_running() {
                    debug!("No active session, skipping auto tick");
                    continue;
                }
                match orchestrator.run_cycle().await {
                    Ok(record) => {
                        cycles_run += 1;
                        debug!(cycle = record.number, "Auto cycle finished");
                    }
                    Err(e) => warn!(error = %e, "Auto cycle rejected"),
                }
            }
        }
    }

    info!(cycles_run, "Auto-cycle stopped");
    state
        .events
        .publish(DiscoveryEvent::AutoCycleStopped { cycles_run });
    cycles_run
}
