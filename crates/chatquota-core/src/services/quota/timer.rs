//! Sweep scheduler
//!
//! Background timer that keeps usage records honest while no banner is
//! seen. One loop at the finest cadence: every tick runs a light sweep
//! (expire only), every Nth tick a full sweep (roll forward, then expire).
//! The first tick is always full.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                SweepScheduler                │
//! │  ┌────────────┐  ┌────────────┐  ┌────────┐  │
//! │  │ SweepConfig│  │ Timer Loop │  │ Status │  │
//! │  │ - tick     │  │ - sweep()  │  │ - last │  │
//! │  │ - full N   │  │ - sleep()  │  │ - runs │  │
//! │  └────────────┘  └────────────┘  └────────┘  │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//!                 TrackerHandle::sweep
//! ```
//!
//! Each sweep is awaited before the next sleep starts, so sweeps never
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use super::tracker::{SweepKind, SweepReport, TrackerHandle};

// ============================================================================
// Constants
// ============================================================================

/// Default seconds between ticks
pub const DEFAULT_TICK_SECS: u64 = 15;

/// Default ticks per full sweep (about a minute at the default tick)
pub const DEFAULT_FULL_SWEEP_EVERY: u32 = 4;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between ticks (minimum 1)
    pub tick_secs: u64,
    /// Full sweep every N ticks (minimum 1)
    pub full_sweep_every: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            full_sweep_every: DEFAULT_FULL_SWEEP_EVERY,
        }
    }
}

impl SweepConfig {
    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        Self {
            tick_secs: self.tick_secs.max(1),
            full_sweep_every: self.full_sweep_every.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// Sweep kind for a zero-based tick number
    pub fn kind_for_tick(&self, tick: u64) -> SweepKind {
        if tick % self.full_sweep_every.max(1) as u64 == 0 {
            SweepKind::Full
        } else {
            SweepKind::Light
        }
    }
}

// ============================================================================
// Scheduler Status
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStatus {
    pub is_running: bool,
    /// Whether a sweep is in progress
    pub is_sweeping: bool,
    /// Completion time of the last sweep (RFC 3339)
    pub last_sweep_at: Option<String>,
    pub last_sweep_kind: Option<String>,
    /// Records changed by the last sweep
    pub last_changed: usize,
    pub last_error: Option<String>,
    pub sweeps_run: u64,
}

// ============================================================================
// Scheduler State
// ============================================================================

#[derive(Debug, Default)]
pub struct SweepState {
    pub config: SweepConfig,
    pub status: SweepStatus,
    /// Ticks completed since start
    pub tick: u64,
}

impl SweepState {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config: config.validate(),
            status: SweepStatus::default(),
            tick: 0,
        }
    }

    pub fn update_config(&mut self, config: SweepConfig) {
        self.config = config.validate();
    }

    /// Mark as started
    pub fn start(&mut self) {
        self.status.is_running = true;
        self.tick = 0;
    }

    /// Mark as stopped
    pub fn stop(&mut self) {
        self.status.is_running = false;
        self.status.is_sweeping = false;
    }

    pub fn begin_sweep(&mut self) {
        self.status.is_sweeping = true;
    }

    /// Record a finished sweep and advance the tick
    pub fn complete_sweep(&mut self, kind: SweepKind, result: Result<&SweepReport, String>) {
        self.status.is_sweeping = false;
        self.status.last_sweep_at = Some(chrono::Utc::now().to_rfc3339());
        self.status.last_sweep_kind = Some(kind.to_string());
        match result {
            Ok(report) => {
                self.status.last_changed = report.changed.len();
                self.status.last_error = if report.failed.is_empty() {
                    None
                } else {
                    Some(format!("skipped: {}", report.failed.join(", ")))
                };
            }
            Err(e) => {
                self.status.last_changed = 0;
                self.status.last_error = Some(e);
            }
        }
        self.status.sweeps_run += 1;
        self.tick += 1;
    }
}

/// Shared state wrapper for thread-safe access
pub type SharedSweepState = Arc<RwLock<SweepState>>;

pub fn create_shared_state(config: SweepConfig) -> SharedSweepState {
    Arc::new(RwLock::new(SweepState::new(config)))
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns the sweep loop task
pub struct SweepScheduler {
    state: SharedSweepState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweepScheduler {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            state: create_shared_state(config),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> SharedSweepState {
        Arc::clone(&self.state)
    }

    pub async fn status(&self) -> SweepStatus {
        self.state.read().await.status.clone()
    }

    /// Start sweeping through `tracker`; returns `false` if already running
    pub async fn start(&mut self, tracker: TrackerHandle) -> bool {
        {
            let mut state = self.state.write().await;
            if state.status.is_running {
                log::info!("[quota:timer] Sweeps already running");
                return false;
            }
            state.start();
        }

        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);
        self.task = Some(tokio::spawn(sweep_loop(Arc::clone(&self.state), tracker, rx)));
        true
    }

    /// Stop the loop and wait for an in-flight sweep to finish
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            // loop may already have exited
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[quota:timer] Sweep loop panicked: {}", e);
            }
        }
        self.state.write().await.stop();
    }
}

async fn sweep_loop(
    state: SharedSweepState,
    tracker: TrackerHandle,
    mut shutdown: oneshot::Receiver<()>,
) {
    log::info!("[quota:timer] Sweep loop started");

    loop {
        let (kind, interval) = {
            let mut state = state.write().await;
            if !state.status.is_running {
                break;
            }
            state.begin_sweep();
            (state.config.kind_for_tick(state.tick), state.config.interval())
        };

        let result = tracker.sweep(kind).await;
        {
            let mut state = state.write().await;
            match &result {
                Ok(report) => state.complete_sweep(kind, Ok(report)),
                Err(e) => {
                    log::error!("[quota:timer] {} sweep failed: {}", kind, e);
                    state.complete_sweep(kind, Err(e.to_string()));
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                log::info!("[quota:timer] Received shutdown signal");
                break;
            }
        }
    }

    state.write().await.stop();
    log::info!("[quota:timer] Sweep loop exited");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackerConfig;
    use crate::services::quota::counter::MemoryCounterStore;
    use crate::services::quota::tracker::UsageTracker;
    use crate::services::quota::types::PlanId;
    use chrono::Utc;

    #[test]
    fn test_default_config() {
        let config = SweepConfig::default();
        assert_eq!(config.tick_secs, 15);
        assert_eq!(config.full_sweep_every, 4);
        assert_eq!(config.interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_validate() {
        let config = SweepConfig {
            tick_secs: 0,
            full_sweep_every: 0,
        }
        .validate();
        assert_eq!(config.tick_secs, 1);
        assert_eq!(config.full_sweep_every, 1);
    }

    #[test]
    fn test_kind_for_tick() {
        let config = SweepConfig::default();
        let kinds: Vec<SweepKind> = (0..6).map(|t| config.kind_for_tick(t)).collect();
        assert_eq!(
            kinds,
            vec![
                SweepKind::Full,
                SweepKind::Light,
                SweepKind::Light,
                SweepKind::Light,
                SweepKind::Full,
                SweepKind::Light,
            ]
        );
    }

    #[test]
    fn test_state_lifecycle() {
        let mut state = SweepState::new(SweepConfig::default());
        state.start();
        assert!(state.status.is_running);

        state.begin_sweep();
        assert!(state.status.is_sweeping);

        let report = SweepReport {
            kind: SweepKind::Full,
            examined: 3,
            changed: vec!["o3".to_string()],
            failed: vec![],
        };
        state.complete_sweep(SweepKind::Full, Ok(&report));
        assert!(!state.status.is_sweeping);
        assert_eq!(state.status.sweeps_run, 1);
        assert_eq!(state.status.last_changed, 1);
        assert_eq!(state.status.last_sweep_kind.as_deref(), Some("full"));
        assert_eq!(state.tick, 1);

        state.complete_sweep(SweepKind::Light, Err("store offline".to_string()));
        assert_eq!(state.status.last_error.as_deref(), Some("store offline"));

        state.stop();
        assert!(!state.status.is_running);
    }

    #[tokio::test]
    async fn test_scheduler_runs_and_stops() {
        let tracker = UsageTracker::load(
            Arc::new(MemoryCounterStore::new()),
            TrackerConfig {
                default_plan: PlanId::Plus,
                ..Default::default()
            },
            Utc,
        )
        .await
        .unwrap();
        let (handle, task) = tracker.spawn();

        let mut scheduler = SweepScheduler::new(SweepConfig {
            tick_secs: 3600,
            full_sweep_every: 4,
        });
        assert!(scheduler.start(handle.clone()).await);
        assert!(!scheduler.start(handle.clone()).await);

        // first sweep runs immediately
        for _ in 0..100 {
            if scheduler.status().await.sweeps_run > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = scheduler.status().await;
        assert_eq!(status.sweeps_run, 1);
        assert_eq!(status.last_sweep_kind.as_deref(), Some("full"));

        scheduler.stop().await;
        assert!(!scheduler.status().await.is_running);

        handle.shutdown().await;
        task.await.unwrap();
    }
}
